//! Crash recovery: replay, validate, resume, reconcile.

use std::sync::Arc;

use genesis_config::ReconcilePolicy;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::journal::{Journal, JournalError, OperationRecord};
use crate::wal::{Intent, OperationId, ReplayError};

const RECOVERY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::recovery");

/// Reason journalled for in-flight work that recovery could not resume.
pub const RECONCILED_REASON: &str = "reconciled after crash";

/// Finishes interrupted operations found during recovery.
pub trait Resumer: Send + Sync {
    /// Attempts to run `operation` to completion. `Err` carries the reason
    /// it could not be resumed.
    fn resume(&self, id: OperationId, operation: &OperationRecord) -> Result<(), String>;
}

/// Resumer that declines everything, so every interrupted operation is
/// reconciled as failed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResume;

impl Resumer for NoResume {
    fn resume(&self, _id: OperationId, _operation: &OperationRecord) -> Result<(), String> {
        Err("no resumer configured".to_owned())
    }
}

/// What recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries replayed after the last checkpoint.
    pub replayed: usize,
    /// Operations resumed to completion.
    pub resumed: Vec<OperationId>,
    /// Operations reconciled as failed.
    pub failed: Vec<OperationId>,
    /// Sequence of the checkpoint written after reconciliation.
    pub checkpoint_sequence: u64,
}

/// Recovery could not establish trustworthy state.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The log or the state rebuilt from it is untrustworthy.
    #[error("recovery replay failed: {0}")]
    Replay(#[source] ReplayError),
    /// Journalling reconciliation or the checkpoint failed.
    #[error("recovery could not update the journal: {0}")]
    Journal(#[source] JournalError),
}

impl From<JournalError> for RecoveryError {
    fn from(error: JournalError) -> Self {
        match error.as_replay() {
            Some(replay) => Self::Replay(replay.clone()),
            None => Self::Journal(error),
        }
    }
}

/// Applies a [`ReconcilePolicy`] to the journal after a crash.
#[derive(Clone)]
pub struct RecoveryCoordinator {
    policy: ReconcilePolicy,
    resumer: Arc<dyn Resumer>,
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RecoveryCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RecoveryCoordinator {
    /// Builds a coordinator.
    #[must_use]
    pub fn new(policy: ReconcilePolicy, resumer: Arc<dyn Resumer>) -> Self {
        Self { policy, resumer }
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Rebuilds journal state, reconciles every in-flight operation and
    /// writes a fresh checkpoint.
    ///
    /// No in-flight operation is left unresolved: each one ends with either
    /// an `operation_completed` or an `operation_failed` entry.
    pub fn recover(&self, journal: &Journal) -> Result<RecoveryReport, RecoveryError> {
        let replayed = journal.rebuild()?;
        let state = journal.snapshot()?;
        let mut report = RecoveryReport {
            replayed,
            ..RecoveryReport::default()
        };

        for (id, operation) in state.in_flight() {
            if self.try_resume(id, operation) {
                journal.record(|_| Intent::OperationCompleted { id }, Value::Null)?;
                report.resumed.push(id);
            } else {
                journal.record(
                    |_| Intent::OperationFailed {
                        id,
                        reason: RECONCILED_REASON.to_owned(),
                    },
                    Value::Null,
                )?;
                report.failed.push(id);
            }
        }

        report.checkpoint_sequence = journal.checkpoint()?.through_sequence;
        info!(
            target: RECOVERY_TARGET,
            replayed = report.replayed,
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            policy = %self.policy,
            "recovery completed"
        );
        Ok(report)
    }

    fn try_resume(&self, id: OperationId, operation: &OperationRecord) -> bool {
        if self.policy == ReconcilePolicy::FailAll || !operation.resumable {
            return false;
        }
        match self.resumer.resume(id, operation) {
            Ok(()) => true,
            Err(reason) => {
                warn!(
                    target: RECOVERY_TARGET,
                    operation = id,
                    description = %operation.description,
                    reason = %reason,
                    "operation could not be resumed"
                );
                false
            }
        }
    }
}
