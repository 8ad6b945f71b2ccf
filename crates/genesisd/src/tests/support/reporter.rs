//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::fmt;
use std::sync::Mutex;

use genesis_config::{CapabilityLevel, ValidatedConfig};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::lifecycle::{Hook, PreviousShutdown, ShutdownReport};
use crate::probe::ProbeResult;
use crate::recovery::RecoveryReport;
use crate::registry::{AbsentReason, CapabilityKind};

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootStarting,
    BootFailed(String),
    LevelFallback(String),
    Probe { service: String, passed: bool },
    GatePassed,
    Constructed(CapabilityKind),
    Absent(CapabilityKind),
    HookFired(Hook, CapabilityLevel),
    CrashDetected,
    RecoveryCompleted(RecoveryReport),
    Ready,
    ShutdownBegun,
    ShutdownCompleted(ShutdownReport),
}

type HookAction = Box<dyn Fn() + Send + Sync>;

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
    after_hook: Mutex<Option<(Hook, HookAction)>>,
}

impl fmt::Debug for RecordingHealthReporter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RecordingHealthReporter")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl RecordingHealthReporter {
    /// Runs `action` on the engine's thread each time `hook` is reported.
    pub fn after_hook(&self, hook: Hook, action: impl Fn() + Send + Sync + 'static) {
        *self
            .after_hook
            .lock()
            .expect("health reporter mutex poisoned") = Some((hook, Box::new(action)));
    }

    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Hooks fired so far, in order.
    #[must_use]
    pub fn hooks(&self) -> Vec<Hook> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::HookFired(hook, _) => Some(hook),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn boot_starting(&self) {
        self.record(HealthEvent::BootStarting);
    }

    fn boot_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootFailed(error.to_string()));
    }

    fn capability_level_fallback(&self, raw: &str) {
        self.record(HealthEvent::LevelFallback(raw.to_owned()));
    }

    fn probe_completed(&self, result: &ProbeResult) {
        self.record(HealthEvent::Probe {
            service: result.service.clone(),
            passed: result.passed(),
        });
    }

    fn gate_passed(&self, _config: &ValidatedConfig) {
        self.record(HealthEvent::GatePassed);
    }

    fn capability_constructed(&self, kind: CapabilityKind, _service: Option<&str>) {
        self.record(HealthEvent::Constructed(kind));
    }

    fn capability_absent(&self, kind: CapabilityKind, _reason: &AbsentReason) {
        self.record(HealthEvent::Absent(kind));
    }

    fn hook_fired(&self, hook: Hook, level: CapabilityLevel) {
        self.record(HealthEvent::HookFired(hook, level));
        let after_hook = self
            .after_hook
            .lock()
            .expect("health reporter mutex poisoned");
        if let Some((watched, action)) = after_hook.as_ref()
            && *watched == hook
        {
            action();
        }
    }

    fn crash_detected(&self, _previous: &PreviousShutdown) {
        self.record(HealthEvent::CrashDetected);
    }

    fn recovery_completed(&self, report: &RecoveryReport) {
        self.record(HealthEvent::RecoveryCompleted(report.clone()));
    }

    fn ready(&self, _config: &ValidatedConfig) {
        self.record(HealthEvent::Ready);
    }

    fn shutdown_begun(&self) {
        self.record(HealthEvent::ShutdownBegun);
    }

    fn shutdown_completed(&self, report: &ShutdownReport) {
        self.record(HealthEvent::ShutdownCompleted(report.clone()));
    }
}
