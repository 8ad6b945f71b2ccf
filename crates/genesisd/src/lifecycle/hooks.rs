//! Hook bodies for each capability level.
//!
//! Both levels implement every hook so the dispatcher's control flow is the
//! same at either level; only the bodies differ.

use std::fs;
use std::io;
use std::path::PathBuf;

use genesis_config::ValidatedConfig;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::LIFECYCLE_TARGET;
use super::record::{IncompleteOperation, PreviousShutdown};
use crate::health::HealthReporter;
use crate::journal::{CheckpointInfo, DrainOutcome, Journal, JournalError, OperationTracker};
use crate::recovery::{RecoveryCoordinator, RecoveryError, RecoveryReport};
use crate::registry::{Capability, CapabilityKind, CapabilityRegistry};
use crate::wal::Intent;

/// Reason journalled for work still running when the drain deadline passes.
pub const FORCE_TERMINATED_REASON: &str = "force-terminated during shutdown";

/// Failure inside a hook body.
#[derive(Debug, Error)]
pub enum HookError {
    /// The journal could not be verified, checkpointed or appended to.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Crash recovery failed.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    /// The state directory could not be read.
    #[error("state directory '{path}' is not readable: {source}")]
    StateDirectory {
        /// Directory checked.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl HookError {
    /// Returns `true` when the failure means persisted state cannot be
    /// trusted.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        match self {
            Self::Journal(error) => error.as_replay().is_some(),
            Self::Recovery(_) => true,
            Self::StateDirectory { .. } => false,
        }
    }
}

/// What hook bodies learned, carried into the shutdown record and reports.
#[derive(Debug, Default)]
pub(crate) struct HookNotes {
    pub(crate) recovery: Option<RecoveryReport>,
    pub(crate) checkpoint: Option<CheckpointInfo>,
    pub(crate) incomplete: Vec<IncompleteOperation>,
    pub(crate) released: usize,
}

/// Collaborators a hook body may touch.
pub(crate) struct HookContext<'a> {
    pub(crate) config: &'a ValidatedConfig,
    pub(crate) journal: &'a Journal,
    pub(crate) tracker: &'a OperationTracker,
    pub(crate) registry: &'a mut CapabilityRegistry,
    pub(crate) recovery: &'a RecoveryCoordinator,
    pub(crate) reporter: &'a dyn HealthReporter,
    pub(crate) notes: &'a mut HookNotes,
}

/// The five lifecycle hooks.
pub(crate) trait LifecycleHooks: Send + Sync {
    fn startup_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError>;
    fn startup_complete(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError>;
    fn shutdown_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError>;
    fn shutdown_complete(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError>;
    fn crash_detected(
        &self,
        ctx: &mut HookContext<'_>,
        previous: &PreviousShutdown,
    ) -> Result<(), HookError>;
}

/// Every body is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BaselineHooks;

impl LifecycleHooks for BaselineHooks {
    fn startup_begin(&self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn startup_complete(&self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn shutdown_begin(&self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn shutdown_complete(&self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn crash_detected(
        &self,
        _ctx: &mut HookContext<'_>,
        _previous: &PreviousShutdown,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Integrity checks, draining, checkpointing and crash recovery.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AdvancedHooks;

impl LifecycleHooks for AdvancedHooks {
    fn startup_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        let state_dir = ctx.config.state_dir().as_std_path();
        fs::read_dir(state_dir).map_err(|source| HookError::StateDirectory {
            path: state_dir.to_path_buf(),
            source,
        })?;
        let replayed = ctx.journal.rebuild()?;
        info!(
            target: LIFECYCLE_TARGET,
            replayed,
            "journal verified before startup"
        );
        Ok(())
    }

    fn startup_complete(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        let announcement = format!("READY genesisd {}", std::process::id());
        match ctx.registry.capability(CapabilityKind::TelemetrySink) {
            Capability::Present(handle) => {
                if let Err(error) = handle.invoke(announcement.as_bytes()) {
                    warn!(
                        target: LIFECYCLE_TARGET,
                        error = %error,
                        "failed to announce readiness to the telemetry sink"
                    );
                }
            }
            Capability::Absent { reason, .. } => {
                info!(
                    target: LIFECYCLE_TARGET,
                    announcement = %announcement,
                    absent = %reason,
                    "telemetry sink unavailable; readiness logged only"
                );
            }
        }
        Ok(())
    }

    fn shutdown_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        if let DrainOutcome::TimedOut { remaining } = ctx.tracker.drain(ctx.config.drain_timeout())
        {
            for (id, description) in remaining {
                ctx.journal.record(
                    |_| Intent::OperationFailed {
                        id,
                        reason: FORCE_TERMINATED_REASON.to_owned(),
                    },
                    Value::Null,
                )?;
                warn!(
                    target: LIFECYCLE_TARGET,
                    operation = id,
                    description = %description,
                    "operation force-terminated at drain deadline"
                );
                ctx.notes
                    .incomplete
                    .push(IncompleteOperation { id, description });
            }
        }
        ctx.notes.checkpoint = Some(ctx.journal.checkpoint()?);
        Ok(())
    }

    fn shutdown_complete(&self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        ctx.notes.released += ctx.registry.teardown();
        Ok(())
    }

    fn crash_detected(
        &self,
        ctx: &mut HookContext<'_>,
        previous: &PreviousShutdown,
    ) -> Result<(), HookError> {
        if let PreviousShutdown::Crashed(Some(record)) = previous {
            info!(
                target: LIFECYCLE_TARGET,
                previous_pid = record.pid,
                previous_status = ?record.status,
                "recovering after unclean termination"
            );
        }
        let report = ctx.recovery.recover(ctx.journal)?;
        ctx.reporter.recovery_completed(&report);
        ctx.notes.recovery = Some(report);
        Ok(())
    }
}
