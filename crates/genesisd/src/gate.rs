//! The pre-boot gate: configuration validation followed by connectivity
//! checks.
//!
//! Validation runs first and never touches the network. Probes then run
//! one at a time in declaration order and stop at the first failed
//! required service, so an operator sees exactly one failing check.

use std::collections::BTreeMap;
use std::fmt;

use genesis_config::{Config, ServiceDeclaration, ServiceKind, ValidatedConfig, Violation};
use thiserror::Error;

use crate::health::HealthReporter;
use crate::probe::{BackingClient, Connector, ProbeResult, probe_service};

/// Fatal pre-boot failure. Displays as
/// `pre-boot check failed: <component>: <reason>`.
#[derive(Debug, Error)]
pub enum PreBootError {
    /// The configuration is malformed or inconsistent.
    #[error("pre-boot check failed: {component}: {reason}")]
    Configuration {
        /// Configuration key at fault.
        component: String,
        /// First violation reason.
        reason: String,
        /// Every violation found, in check order.
        violations: Vec<Violation>,
    },
    /// A required backing service failed its connectivity check.
    #[error("pre-boot check failed: {component}: {reason}")]
    Connectivity {
        /// Name of the failing service.
        component: String,
        /// Probe failure reason.
        reason: String,
        /// Results gathered before the gate stopped.
        results: Vec<ProbeResult>,
    },
}

impl PreBootError {
    pub(crate) fn from_violations(violations: Vec<Violation>) -> Self {
        let (component, reason) = violations
            .first()
            .map(|violation| (violation.key.clone(), violation.reason.clone()))
            .unwrap_or_else(|| ("configuration".to_owned(), "invalid".to_owned()));
        Self::Configuration {
            component,
            reason,
            violations,
        }
    }

    /// The component named in the diagnostic.
    #[must_use]
    pub fn component(&self) -> &str {
        match self {
            Self::Configuration { component, .. } | Self::Connectivity { component, .. } => {
                component
            }
        }
    }
}

/// A service whose probe passed, with its verified client.
pub(crate) struct LiveService {
    pub(crate) declaration: ServiceDeclaration,
    pub(crate) client: Box<dyn BackingClient>,
}

impl fmt::Debug for LiveService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LiveService")
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

/// Everything the gate hands to capability construction.
///
/// Verified clients are only reachable from inside the crate; callers see
/// the validated configuration and probe results.
#[derive(Debug)]
pub struct GateClearance {
    config: ValidatedConfig,
    results: Vec<ProbeResult>,
    pub(crate) live: BTreeMap<ServiceKind, LiveService>,
}

impl GateClearance {
    /// Validated configuration for the rest of the boot.
    #[must_use]
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Results of every probe, in declaration order.
    #[must_use]
    pub fn probe_results(&self) -> &[ProbeResult] {
        &self.results
    }

    /// Transfers the verified clients to the caller.
    pub(crate) fn into_parts(
        mut self,
    ) -> (
        ValidatedConfig,
        Vec<ProbeResult>,
        BTreeMap<ServiceKind, LiveService>,
    ) {
        let live = std::mem::take(&mut self.live);
        let results = std::mem::take(&mut self.results);
        (self.config.clone(), results, live)
    }
}

impl Drop for GateClearance {
    fn drop(&mut self) {
        for service in self.live.values_mut() {
            service.client.close();
        }
    }
}

/// Sequences validation and probing.
pub struct PreBootGate<'a> {
    connector: &'a dyn Connector,
    reporter: &'a dyn HealthReporter,
}

impl<'a> PreBootGate<'a> {
    /// Builds a gate that opens clients through `connector`.
    #[must_use]
    pub fn new(connector: &'a dyn Connector, reporter: &'a dyn HealthReporter) -> Self {
        Self {
            connector,
            reporter,
        }
    }

    /// Validates `config` and probes every declared service.
    ///
    /// Optional services that fail are recorded and skipped. The first
    /// failing required service stops the gate; clients opened so far are
    /// closed before the error is returned.
    pub fn run(&self, config: &Config) -> Result<GateClearance, PreBootError> {
        let validated = config.validate().map_err(PreBootError::from_violations)?;
        if let Some(raw) = validated.rejected_capability_level() {
            self.reporter.capability_level_fallback(raw);
        }

        let timeout = validated.probe_timeout();
        let mut clearance = GateClearance {
            results: Vec::with_capacity(validated.services().len()),
            live: BTreeMap::new(),
            config: validated.clone(),
        };
        for service in validated.services() {
            let (result, client) = probe_service(self.connector, service, timeout);
            self.reporter.probe_completed(&result);
            let failure = result.failure_reason().map(str::to_owned);
            clearance.results.push(result);
            match (client, failure) {
                (Some(client), _) => {
                    clearance.live.insert(
                        service.kind,
                        LiveService {
                            declaration: service.clone(),
                            client,
                        },
                    );
                }
                (None, Some(reason)) if service.required => {
                    // Dropping the clearance closes the clients opened so far.
                    let results = std::mem::take(&mut clearance.results);
                    return Err(PreBootError::Connectivity {
                        component: service.name.clone(),
                        reason,
                        results,
                    });
                }
                (None, _) => {}
            }
        }
        self.reporter.gate_passed(&clearance.config);
        Ok(clearance)
    }
}
