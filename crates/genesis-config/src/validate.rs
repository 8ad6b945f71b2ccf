//! Configuration validation.
//!
//! Validation is local and cheap: it never touches the network. Every
//! violation found is returned, in check order, so the first entry is the
//! one surfaced as the fatal diagnostic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::capability::{CapabilityLevel, LevelResolution, ReconcilePolicy};
use crate::services::{ServiceDeclaration, ServiceKind};
use crate::Config;

const PROBE_TIMEOUT_RANGE_MS: (u64, u64) = (1, 60_000);
const DRAIN_TIMEOUT_RANGE_MS: (u64, u64) = (1, 3_600_000);

/// A single configuration defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key}: {reason}")]
pub struct Violation {
    /// Configuration key (or `services.<name>`) at fault.
    pub key: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl Violation {
    fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration that has passed every local check.
///
/// Only [`Config::validate`] constructs this type. The wrapped configuration
/// is shared immutably for the rest of the process lifetime.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    config: Arc<Config>,
    level: LevelResolution,
    reconcile_policy: ReconcilePolicy,
    wal_path: Utf8PathBuf,
}

impl ValidatedConfig {
    /// Returns the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Capability level for this process.
    #[must_use]
    pub const fn capability_level(&self) -> CapabilityLevel {
        self.level.level
    }

    /// Text of a capability level that was absent or unrecognised and fell
    /// back to baseline.
    #[must_use]
    pub fn rejected_capability_level(&self) -> Option<&str> {
        self.level.rejected.as_deref()
    }

    /// Policy applied to in-flight work during crash recovery.
    #[must_use]
    pub const fn reconcile_policy(&self) -> ReconcilePolicy {
        self.reconcile_policy
    }

    /// Per-service probe budget.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.probe_timeout_ms)
    }

    /// Budget for draining in-flight work during shutdown.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.config.drain_timeout_ms)
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn state_dir(&self) -> &Utf8Path {
        self.config.state_dir.as_path()
    }

    /// Resolved location of the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> &Utf8Path {
        self.wal_path.as_path()
    }

    /// Declared backing services in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceDeclaration] {
        self.config.services()
    }
}

impl Config {
    /// Checks required keys, value ranges and internal consistency.
    ///
    /// Returns every violation found, ordered by check; the list is never
    /// empty on the error path.
    pub fn validate(&self) -> Result<ValidatedConfig, Vec<Violation>> {
        let mut violations = Vec::new();
        check_service_names(&self.services, &mut violations);
        check_endpoints(&self.services, &mut violations);
        check_unique_kinds(&self.services, &mut violations);
        check_mandatory_kinds(&self.services, &mut violations);
        check_range(
            "probe_timeout_ms",
            self.probe_timeout_ms,
            PROBE_TIMEOUT_RANGE_MS,
            &mut violations,
        );
        check_range(
            "drain_timeout_ms",
            self.drain_timeout_ms,
            DRAIN_TIMEOUT_RANGE_MS,
            &mut violations,
        );
        let reconcile_policy = match ReconcilePolicy::parse_strict(&self.reconcile_policy) {
            Ok(policy) => Some(policy),
            Err(error) => {
                violations.push(Violation::new("reconcile_policy", error.to_string()));
                None
            }
        };
        if self.log_filter.trim().is_empty() {
            violations.push(Violation::new("log_filter", "must not be empty"));
        }
        if self.state_dir.as_str().trim().is_empty() {
            violations.push(Violation::new("state_dir", "must not be empty"));
        }
        if let Some(path) = &self.wal_path
            && path.file_name().is_none()
        {
            violations.push(Violation::new("wal_path", "must name a file"));
        }

        match reconcile_policy {
            Some(reconcile_policy) if violations.is_empty() => Ok(ValidatedConfig {
                config: Arc::new(self.clone()),
                level: CapabilityLevel::resolve(&self.capability_level),
                reconcile_policy,
                wal_path: self.resolved_wal_path(),
            }),
            _ => Err(violations),
        }
    }
}

fn check_service_names(services: &[ServiceDeclaration], violations: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    for service in services {
        let name = service.name.as_str();
        if name.is_empty() {
            violations.push(Violation::new("services", "service name must not be empty"));
            continue;
        }
        if !name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
        {
            violations.push(Violation::new(
                format!("services.{name}"),
                "name may only contain [a-z0-9_-]",
            ));
        }
        if !seen.insert(name) {
            violations.push(Violation::new(
                format!("services.{name}"),
                "declared more than once",
            ));
        }
    }
}

fn check_endpoints(services: &[ServiceDeclaration], violations: &mut Vec<Violation>) {
    for service in services {
        let scheme = service.endpoint.scheme();
        if !service.kind.accepts_scheme(scheme) {
            violations.push(Violation::new(
                format!("services.{}", service.name),
                format!("scheme '{scheme}' is not valid for {} services", service.kind),
            ));
            continue;
        }
        if scheme == "tcp"
            && (service.endpoint.host_str().is_none() || service.endpoint.port().is_none())
        {
            violations.push(Violation::new(
                format!("services.{}", service.name),
                "tcp endpoints need both a host and a port",
            ));
        }
    }
}

fn check_unique_kinds(services: &[ServiceDeclaration], violations: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    for service in services {
        if !seen.insert(service.kind) {
            violations.push(Violation::new(
                format!("services.{}", service.name),
                format!("a {} service is already declared", service.kind),
            ));
        }
    }
}

fn check_mandatory_kinds(services: &[ServiceDeclaration], violations: &mut Vec<Violation>) {
    for kind in ServiceKind::MANDATORY {
        match services.iter().find(|service| service.kind == kind) {
            None => violations.push(Violation::new(
                "services",
                format!("no {kind} service declared"),
            )),
            Some(first) => {
                if !first.required {
                    violations.push(Violation::new(
                        "services",
                        format!("{kind} services must be declared required"),
                    ));
                }
            }
        }
    }
}

fn check_range(key: &str, value: u64, (min, max): (u64, u64), violations: &mut Vec<Violation>) {
    if !(min..=max).contains(&value) {
        violations.push(Violation::new(
            key,
            format!("{value} is outside the accepted range {min}..={max}"),
        ));
    }
}
