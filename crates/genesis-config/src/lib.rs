//! Layered configuration for the Genesis engine.
//!
//! Configuration is assembled by [`ortho_config`] from built-in defaults, an
//! optional configuration file, `GENESIS_*` environment variables and
//! command-line flags, in increasing order of precedence. Assembly performs
//! no semantic checks: [`Config::validate`] is the only way to obtain a
//! [`ValidatedConfig`], and the pre-boot gate refuses to continue without
//! one.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod capability;
mod defaults;
mod logging;
mod runtime;
mod services;
mod validate;

pub use capability::{
    CapabilityLevel, LevelResolution, ReconcilePolicy, ReconcilePolicyParseError,
};
pub use defaults::{
    DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_WAL_FILE,
    default_capability_level_string, default_drain_timeout_ms, default_log_filter,
    default_log_filter_string, default_log_format, default_probe_timeout_ms,
    default_reconcile_policy_string, default_state_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use services::{ServiceDeclaration, ServiceKind, ServiceParseError};
pub use validate::{ValidatedConfig, Violation};

/// Canonical configuration assembled from every configured layer.
///
/// Every key carries an `ortho_config` default, so the defaults layer is a
/// complete configuration and loading succeeds with no file, environment
/// or flags present. The struct is plain data. Callers that need
/// guarantees about its contents must go through [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "GENESIS")]
pub struct Config {
    /// `tracing` filter expression used by the daemon.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the daemon logs.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Requested capability level (`baseline` or `advanced`).
    ///
    /// Kept as text so that unrecognised values fall back to
    /// [`CapabilityLevel::Baseline`] instead of failing the load.
    #[serde(default = "default_capability_level_string")]
    #[ortho_config(default = default_capability_level_string())]
    pub capability_level: String,
    /// Directory holding lock, PID, health, checkpoint and shutdown files.
    #[serde(default = "default_state_dir")]
    #[ortho_config(default = default_state_dir())]
    pub state_dir: Utf8PathBuf,
    /// Location of the write-ahead log. Defaults to a file in `state_dir`.
    #[serde(default)]
    pub wal_path: Option<Utf8PathBuf>,
    /// Declared backing services.
    #[serde(default)]
    #[ortho_config(default = Vec::new(), merge_strategy = "replace")]
    pub services: Vec<ServiceDeclaration>,
    /// Connectivity-check budget for each backing service, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    #[ortho_config(default = default_probe_timeout_ms())]
    pub probe_timeout_ms: u64,
    /// Time allowed for in-flight work to finish during shutdown.
    #[serde(default = "default_drain_timeout_ms")]
    #[ortho_config(default = default_drain_timeout_ms())]
    pub drain_timeout_ms: u64,
    /// Policy applied to in-flight work found after a crash.
    #[serde(default = "default_reconcile_policy_string")]
    #[ortho_config(default = default_reconcile_policy_string())]
    pub reconcile_policy: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            capability_level: default_capability_level_string(),
            state_dir: default_state_dir(),
            wal_path: None,
            services: Vec::new(),
            probe_timeout_ms: default_probe_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            reconcile_policy: default_reconcile_policy_string(),
        }
    }
}

impl Config {
    /// Returns the configured log filter.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the declared backing services in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceDeclaration] {
        self.services.as_slice()
    }

    /// Resolves the WAL path, falling back to `<state_dir>/genesis.wal`.
    #[must_use]
    pub fn resolved_wal_path(&self) -> Utf8PathBuf {
        self.wal_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join(DEFAULT_WAL_FILE))
    }
}
