//! Unit tests for the pre-boot gate and the capability registry.

use genesis_config::{Config, ServiceKind};
use rstest::{fixture, rstest};
use strum::IntoEnumIterator;
use tempfile::TempDir;

use crate::bootstrap::{BootstrapError, ErrorCategory};
use crate::gate::{PreBootError, PreBootGate};
use crate::process::LaunchError;
use crate::registry::{
    AbsentReason, Capability, CapabilityKind, CapabilityRegistry, RuntimeCapabilityError,
    StandardProviders,
};

use super::support::{
    FailingFactory, MANDATORY_SERVICES, MemoryConnector, RecordingHealthReporter,
    TestConfigLoader,
};

struct Harness {
    _dir: TempDir,
    loader: TestConfigLoader,
    connector: MemoryConnector,
    reporter: RecordingHealthReporter,
}

impl Harness {
    fn config(&self) -> Config {
        self.loader.config().clone()
    }

    fn registry(&self) -> CapabilityRegistry {
        let clearance = PreBootGate::new(&self.connector, &self.reporter)
            .run(&self.config())
            .expect("gate should pass");
        CapabilityRegistry::build(clearance, &StandardProviders, &self.reporter)
            .expect("registry should build")
    }

    fn assert_all_closed(&self) {
        let mut opened = self.connector.opened();
        let mut closed = self.connector.closed();
        opened.sort();
        closed.sort();
        assert_eq!(opened, closed);
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let loader = TestConfigLoader::new(dir.path());
    Harness {
        _dir: dir,
        loader,
        connector: MemoryConnector::default(),
        reporter: RecordingHealthReporter::default(),
    }
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
fn first_failing_required_service_halts_the_gate(harness: Harness, #[case] index: usize) {
    let (name, _) = MANDATORY_SERVICES
        .get(index)
        .copied()
        .expect("mandatory service");
    harness.connector.fail(name, "connection refused");

    let error = PreBootGate::new(&harness.connector, &harness.reporter)
        .run(&harness.config())
        .err()
        .expect("gate should fail");

    assert_eq!(
        error.to_string(),
        format!("pre-boot check failed: {name}: unreachable: connection refused")
    );
    match error {
        PreBootError::Connectivity { results, .. } => {
            assert_eq!(results.len(), index + 1, "probing should stop at {name}");
            assert!(results.iter().take(index).all(|result| result.passed()));
        }
        other @ PreBootError::Configuration { .. } => panic!("unexpected error: {other}"),
    }
    harness.assert_all_closed();
}

#[rstest]
fn invalid_configuration_never_touches_the_network(harness: Harness) {
    let mut config = harness.config();
    config.probe_timeout_ms = 0;

    let error = PreBootGate::new(&harness.connector, &harness.reporter)
        .run(&config)
        .err()
        .expect("gate should fail");

    assert_eq!(error.component(), "probe_timeout_ms");
    assert!(harness.connector.opened().is_empty());
    assert!(harness.reporter.events().is_empty());
}

#[rstest]
fn handles_exist_only_for_services_that_passed(mut harness: Harness) {
    harness.loader = harness
        .loader
        .clone()
        .with_optional("search", ServiceKind::Search)
        .with_optional("telemetry", ServiceKind::Telemetry);
    harness.connector.fail("telemetry", "connection refused");

    let registry = harness.registry();

    assert!(registry.capability(CapabilityKind::SearchIndex).is_present());
    match registry.capability(CapabilityKind::TelemetrySink) {
        Capability::Absent {
            reason: AbsentReason::ProbeFailed { service, .. },
            ..
        } => assert_eq!(service, "telemetry"),
        other => panic!("telemetry sink should be absent: {other:?}"),
    }
    for result in registry.probe_results() {
        let kind = CapabilityKind::iter()
            .find(|kind| kind.backing_service() == Some(result.kind))
            .expect("every service kind backs a capability");
        assert_eq!(registry.capability(kind).is_present(), result.passed());
    }
}

#[rstest]
fn absent_capabilities_fail_loudly(harness: Harness) {
    let registry = harness.registry();

    let error = registry
        .capability(CapabilityKind::Inference)
        .require()
        .err()
        .expect("inference is not declared");

    assert_eq!(
        error,
        RuntimeCapabilityError::Absent {
            kind: CapabilityKind::Inference,
            reason: AbsentReason::NotDeclared,
        }
    );
    assert_eq!(
        error.to_string(),
        "capability inference is absent: no backing service declared"
    );
}

#[rstest]
#[case(CapabilityKind::IdentityRegistry)]
#[case(CapabilityKind::SessionDirectory)]
fn construction_failure_releases_everything(harness: Harness, #[case] failing: CapabilityKind) {
    let clearance = PreBootGate::new(&harness.connector, &harness.reporter)
        .run(&harness.config())
        .expect("gate should pass");

    let error = CapabilityRegistry::build(clearance, &FailingFactory::new(failing), &harness.reporter)
        .err()
        .expect("construction should fail");

    assert_eq!(error.node, failing);
    harness.assert_all_closed();

    let bootstrap = BootstrapError::from(error);
    assert_eq!(bootstrap.category(), ErrorCategory::Construction);
    assert_eq!(LaunchError::from(bootstrap).exit_code(), 3);
}

#[rstest]
fn teardown_is_idempotent_and_releases_handles(harness: Harness) {
    let mut registry = harness.registry();
    let handle = registry
        .capability(CapabilityKind::DurableLedger)
        .require()
        .cloned()
        .expect("ledger handle");
    let present = registry.handles().count();

    let released = registry.teardown();

    assert_eq!(released, present);
    assert_eq!(registry.teardown(), 0);
    assert!(handle.invoke(b"ping").is_err(), "released handle still works");
    assert!(matches!(
        registry.capability(CapabilityKind::DurableLedger),
        Capability::Absent {
            reason: AbsentReason::Released,
            ..
        }
    ));
    harness.assert_all_closed();
}
