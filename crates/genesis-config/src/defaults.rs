use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::capability::{CapabilityLevel, ReconcilePolicy};

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default per-service probe budget.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Default drain budget for in-flight work at shutdown.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;

/// File name of the write-ahead log inside the state directory.
pub const DEFAULT_WAL_FILE: &str = "genesis.wal";

/// Default log filter expression used by the daemon.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default capability level, in its textual form.
#[must_use]
pub fn default_capability_level_string() -> String {
    CapabilityLevel::Baseline.to_string()
}

/// Default reconciliation policy, in its textual form.
#[must_use]
pub fn default_reconcile_policy_string() -> String {
    ReconcilePolicy::default().to_string()
}

/// Default probe timeout in milliseconds.
#[must_use]
pub const fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

/// Default drain timeout in milliseconds.
#[must_use]
pub const fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

/// Computes the default state directory for the engine.
///
/// Prefers the user runtime directory and otherwise falls back to a
/// per-user directory beneath the system temporary directory.
#[must_use]
pub fn default_state_dir() -> Utf8PathBuf {
    default_state_dir_inner()
}

#[cfg(unix)]
fn default_state_dir_inner() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("genesis");
    if apply_namespace {
        base.push(user_namespace());
    }
    base
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(not(unix))]
fn default_state_dir_inner() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push("genesis");
    base
}
