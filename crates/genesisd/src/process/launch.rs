//! Supervises engine launch sequencing and shutdown.

use std::sync::Arc;

use genesis_config::RuntimePaths;
use tracing::info;

use crate::bootstrap::{
    ConfigLoader, EngineParts, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
use crate::gate::PreBootError;
use crate::health::{HealthReporter, StructuredHealthReporter};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::claim::{HealthState, RuntimeClaim};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to launch the engine.
pub struct LaunchPlan<L, S> {
    /// Configuration source.
    pub loader: L,
    /// Receives boot and lifecycle events.
    pub reporter: Arc<dyn HealthReporter>,
    /// Connector, provider factory and resumer.
    pub parts: EngineParts,
    /// Tells the engine when to shut down.
    pub shutdown: S,
}

/// Runs the engine using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        parts: EngineParts::production(),
        shutdown: SystemShutdownSignal::new(),
    })
}

/// Runs the engine with injected collaborators.
///
/// The singleton lock is taken before the journal is opened, so two
/// processes never recover the same state directory at once.
pub fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        parts,
        shutdown,
    } = plan;

    let config = loader.load()?;
    let validated = config.validate().map_err(PreBootError::from_violations)?;
    let claim = RuntimeClaim::take(
        RuntimePaths::from_config(&validated)?,
        validated.capability_level(),
    )?;
    claim.publish(HealthState::Starting)?;

    let engine = bootstrap_with(&StaticConfigLoader::new(config), reporter, parts)?;
    claim.publish(HealthState::Ready)?;
    info!(
        target: PROCESS_TARGET,
        capability_level = %engine.config().capability_level(),
        "engine running"
    );

    shutdown.wait()?;
    shutdown.arm_forced_exit()?;
    claim.publish(HealthState::Draining)?;
    let report = engine.shutdown()?;
    claim.publish(HealthState::Stopped)?;
    info!(
        target: PROCESS_TARGET,
        incomplete = report.incomplete.len(),
        "shutdown sequence completed"
    );
    Ok(())
}
