//! Structured health reporting for boot and lifecycle events.

use std::sync::Arc;

use genesis_config::{CapabilityLevel, ValidatedConfig};

use crate::bootstrap::BootstrapError;
use crate::lifecycle::{Hook, PreviousShutdown, ShutdownReport};
use crate::probe::ProbeResult;
use crate::recovery::RecoveryReport;
use crate::registry::{AbsentReason, CapabilityKind};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface boot and lifecycle events to telemetry
/// sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn boot_starting(&self);

    /// Invoked when boot fails at any stage.
    fn boot_failed(&self, error: &BootstrapError);

    /// Invoked when the configured capability level was absent or invalid
    /// and baseline was chosen instead.
    fn capability_level_fallback(&self, raw: &str);

    /// Invoked after each connectivity probe.
    fn probe_completed(&self, result: &ProbeResult);

    /// Invoked once the pre-boot gate has passed.
    fn gate_passed(&self, config: &ValidatedConfig);

    /// Invoked for each capability that was constructed.
    fn capability_constructed(&self, kind: CapabilityKind, service: Option<&str>);

    /// Invoked for each capability that is absent.
    fn capability_absent(&self, kind: CapabilityKind, reason: &AbsentReason);

    /// Invoked after each hook body ran, successfully or not.
    fn hook_fired(&self, hook: Hook, level: CapabilityLevel);

    /// Invoked when the shutdown record shows the previous process died.
    fn crash_detected(&self, previous: &PreviousShutdown);

    /// Invoked after crash recovery finished.
    fn recovery_completed(&self, report: &RecoveryReport);

    /// Invoked when readiness flips true.
    fn ready(&self, config: &ValidatedConfig);

    /// Invoked when draining starts.
    fn shutdown_begun(&self);

    /// Invoked when shutdown completed.
    fn shutdown_completed(&self, report: &ShutdownReport);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn boot_starting(&self) {
        (**self).boot_starting();
    }

    fn boot_failed(&self, error: &BootstrapError) {
        (**self).boot_failed(error);
    }

    fn capability_level_fallback(&self, raw: &str) {
        (**self).capability_level_fallback(raw);
    }

    fn probe_completed(&self, result: &ProbeResult) {
        (**self).probe_completed(result);
    }

    fn gate_passed(&self, config: &ValidatedConfig) {
        (**self).gate_passed(config);
    }

    fn capability_constructed(&self, kind: CapabilityKind, service: Option<&str>) {
        (**self).capability_constructed(kind, service);
    }

    fn capability_absent(&self, kind: CapabilityKind, reason: &AbsentReason) {
        (**self).capability_absent(kind, reason);
    }

    fn hook_fired(&self, hook: Hook, level: CapabilityLevel) {
        (**self).hook_fired(hook, level);
    }

    fn crash_detected(&self, previous: &PreviousShutdown) {
        (**self).crash_detected(previous);
    }

    fn recovery_completed(&self, report: &RecoveryReport) {
        (**self).recovery_completed(report);
    }

    fn ready(&self, config: &ValidatedConfig) {
        (**self).ready(config);
    }

    fn shutdown_begun(&self) {
        (**self).shutdown_begun();
    }

    fn shutdown_completed(&self, report: &ShutdownReport) {
        (**self).shutdown_completed(report);
    }
}

/// Default reporter that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn boot_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "boot_starting",
            "starting engine boot"
        );
    }

    fn boot_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "boot_failed",
            category = ?error.category(),
            error = %error,
            "engine boot failed"
        );
    }

    fn capability_level_fallback(&self, raw: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "capability_level_fallback",
            configured = raw,
            "capability level absent or unrecognised; running at baseline"
        );
    }

    fn probe_completed(&self, result: &ProbeResult) {
        match result.failure_reason() {
            None => tracing::info!(
                target: HEALTH_TARGET,
                event = "probe_passed",
                service = %result.service,
                kind = %result.kind,
                latency_ms = result.latency.as_millis(),
                "backing service verified"
            ),
            Some(reason) => tracing::warn!(
                target: HEALTH_TARGET,
                event = "probe_failed",
                service = %result.service,
                kind = %result.kind,
                required = result.required,
                latency_ms = result.latency.as_millis(),
                reason,
                "backing service failed its probe"
            ),
        }
    }

    fn gate_passed(&self, config: &ValidatedConfig) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "gate_passed",
            services = config.services().len(),
            capability_level = %config.capability_level(),
            "pre-boot gate passed"
        );
    }

    fn capability_constructed(&self, kind: CapabilityKind, service: Option<&str>) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "capability_constructed",
            capability = %kind,
            service,
            "capability constructed"
        );
    }

    fn capability_absent(&self, kind: CapabilityKind, reason: &AbsentReason) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "capability_absent",
            capability = %kind,
            reason = %reason,
            "capability absent"
        );
    }

    fn hook_fired(&self, hook: Hook, level: CapabilityLevel) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "hook_fired",
            hook = %hook,
            capability_level = %level,
            "lifecycle hook fired"
        );
    }

    fn crash_detected(&self, previous: &PreviousShutdown) {
        let previous_pid = match previous {
            PreviousShutdown::Crashed(Some(record)) | PreviousShutdown::Graceful(record) => {
                Some(record.pid)
            }
            PreviousShutdown::Crashed(None) | PreviousShutdown::FirstBoot => None,
        };
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "crash_detected",
            previous_pid,
            "previous process terminated uncleanly"
        );
    }

    fn recovery_completed(&self, report: &RecoveryReport) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "recovery_completed",
            replayed = report.replayed,
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            checkpoint_sequence = report.checkpoint_sequence,
            "crash recovery completed"
        );
    }

    fn ready(&self, config: &ValidatedConfig) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "ready",
            capability_level = %config.capability_level(),
            state_dir = %config.state_dir(),
            "engine ready"
        );
    }

    fn shutdown_begun(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_begun",
            "draining"
        );
    }

    fn shutdown_completed(&self, report: &ShutdownReport) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            incomplete = report.incomplete.len(),
            checkpoint_sequence = report.checkpoint_sequence,
            released = report.released,
            "shutdown completed"
        );
    }
}
