//! Admission and draining of journalled operations.
//!
//! Whoever removes an operation from the tracker's in-flight set owns its
//! terminal log entry. A caller completing its work and a drain deadline
//! force-terminating it therefore never both write one. The tracker stays
//! busy until that entry is durable.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::{JOURNAL_TARGET, Journal, JournalError};
use crate::lifecycle::FORCE_TERMINATED_REASON;
use crate::wal::{Intent, OperationId, WalAck};

/// Reason recorded when an operation guard is dropped unfinished.
pub(crate) const DROPPED_REASON: &str = "dropped without completion";

/// Errors surfaced while running operations.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The engine is not ready or is shutting down.
    #[error("new operations are not being admitted")]
    NotAdmitting,
    /// The drain deadline passed and the operation was recorded as failed.
    #[error("operation {0} was force-terminated during shutdown")]
    ForceTerminated(OperationId),
    /// The intent could not be made durable; nothing was committed.
    #[error("operation could not be journalled: {0}")]
    Journal(#[from] JournalError),
}

/// Description of an operation to admit.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    description: String,
    resumable: bool,
    parent: Option<String>,
    payload: Value,
}

impl OperationRequest {
    /// A non-resumable operation with no parent and no payload.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            resumable: false,
            parent: None,
            payload: Value::Null,
        }
    }

    /// Allows recovery to offer the operation to a resumer.
    #[must_use]
    pub fn resumable(mut self) -> Self {
        self.resumable = true;
        self
    }

    /// Names the artifact the operation works on.
    #[must_use]
    pub fn with_parent(mut self, artifact: impl Into<String>) -> Self {
        self.parent = Some(artifact.into());
        self
    }

    /// Attaches caller detail to the begin entry.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Outcome of [`OperationTracker::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every operation finished in time.
    Drained,
    /// The deadline passed with work still outstanding.
    ///
    /// `remaining` lists the operations whose failure the caller must
    /// record. It may be empty when the only outstanding work was a begin
    /// or terminal entry still being written; those writers settle their
    /// own operations.
    TimedOut {
        /// Operations still in flight, with descriptions.
        remaining: Vec<(OperationId, String)>,
    },
}

#[derive(Debug, Default)]
struct TrackerState {
    admitting: bool,
    /// Begin entries being written.
    pending: usize,
    /// Terminal entries being written.
    finishing: usize,
    /// Set when a drain deadline passes; late begin entries then fail.
    cut_off: bool,
    in_flight: BTreeMap<OperationId, String>,
}

impl TrackerState {
    fn busy(&self) -> bool {
        self.pending > 0 || self.finishing > 0 || !self.in_flight.is_empty()
    }
}

/// Counts admitted work so shutdown can wait for it.
///
/// Admission starts closed; the lifecycle dispatcher opens it once the
/// engine is ready.
#[derive(Debug, Default)]
pub struct OperationTracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

impl OperationTracker {
    /// Builds a tracker with admission closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts admitting new operations.
    pub fn open_admission(&self) {
        let mut state = self.lock();
        state.admitting = true;
        state.cut_off = false;
    }

    /// Stops admitting new operations. In-flight work is unaffected.
    pub fn close_admission(&self) {
        self.lock().admitting = false;
    }

    /// Returns `true` while new operations are admitted.
    pub fn is_admitting(&self) -> bool {
        self.lock().admitting
    }

    /// Number of operations admitted whose terminal entry is not yet
    /// durable.
    pub fn in_flight_count(&self) -> usize {
        let state = self.lock();
        state.pending + state.finishing + state.in_flight.len()
    }

    /// Operations currently running, in id order.
    pub fn in_flight(&self) -> Vec<(OperationId, String)> {
        self.lock()
            .in_flight
            .iter()
            .map(|(id, description)| (*id, description.clone()))
            .collect()
    }

    /// Closes admission and waits up to `timeout` for in-flight work.
    ///
    /// `Drained` means every admitted operation's terminal entry is
    /// durable. On timeout the running operations are removed from the
    /// tracker and returned; the caller records their failure. Operations
    /// whose begin entry lands after the deadline fail themselves.
    pub fn drain(&self, timeout: Duration) -> DrainOutcome {
        let mut state = self.lock();
        state.admitting = false;
        let (mut state, _) = self
            .idle
            .wait_timeout_while(state, timeout, |state| state.busy())
            .unwrap_or_else(PoisonError::into_inner);
        if !state.busy() {
            return DrainOutcome::Drained;
        }
        state.cut_off = true;
        let remaining = std::mem::take(&mut state.in_flight).into_iter().collect();
        DrainOutcome::TimedOut { remaining }
    }

    fn admit(&self) -> Result<(), OperationError> {
        let mut state = self.lock();
        if !state.admitting {
            return Err(OperationError::NotAdmitting);
        }
        state.pending += 1;
        Ok(())
    }

    /// Moves a begun operation into the in-flight set; `false` if a drain
    /// deadline passed while its begin entry was being written.
    fn activate(&self, id: OperationId, description: String) -> bool {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.cut_off {
            state.finishing += 1;
            return false;
        }
        state.in_flight.insert(id, description);
        true
    }

    fn withdraw(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        self.notify_if_idle(&state);
    }

    /// Removes `id` from the in-flight set; `true` if the caller now owns
    /// its terminal entry and must [`settle`](Self::settle) once written.
    fn claim(&self, id: OperationId) -> bool {
        let mut state = self.lock();
        let claimed = state.in_flight.remove(&id).is_some();
        if claimed {
            state.finishing += 1;
        }
        claimed
    }

    /// Marks a claimed operation's terminal entry as written or abandoned.
    fn settle(&self) {
        let mut state = self.lock();
        state.finishing = state.finishing.saturating_sub(1);
        self.notify_if_idle(&state);
    }

    fn contains(&self, id: OperationId) -> bool {
        self.lock().in_flight.contains_key(&id)
    }

    fn notify_if_idle(&self, state: &TrackerState) {
        if !state.busy() {
            self.idle.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // Tracker bookkeeping stays valid even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admits an operation and journals its begin intent.
pub(crate) fn begin_operation(
    journal: &Arc<Journal>,
    tracker: &Arc<OperationTracker>,
    request: OperationRequest,
) -> Result<Operation, OperationError> {
    tracker.admit()?;
    let OperationRequest {
        description,
        resumable,
        parent,
        payload,
    } = request;
    let recorded = journal.record(
        |id| Intent::OperationBegun {
            id,
            description: description.clone(),
            resumable,
            parent,
        },
        payload,
    );
    let ack = match recorded {
        Ok(ack) => ack,
        Err(error) => {
            tracker.withdraw();
            return Err(error.into());
        }
    };
    let id = ack.sequence;
    if !tracker.activate(id, description) {
        let failed = journal.record(
            |_| Intent::OperationFailed {
                id,
                reason: FORCE_TERMINATED_REASON.to_owned(),
            },
            Value::Null,
        );
        tracker.settle();
        failed?;
        return Err(OperationError::ForceTerminated(id));
    }
    Ok(Operation {
        id,
        journal: Arc::clone(journal),
        tracker: Arc::clone(tracker),
        finished: false,
    })
}

/// A running operation. Finish it with [`Operation::complete`] or
/// [`Operation::fail`]; dropping it unfinished records a failure.
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    journal: Arc<Journal>,
    tracker: Arc<OperationTracker>,
    finished: bool,
}

impl Operation {
    /// Identifier, equal to the sequence of the begin entry.
    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    /// Journals an artifact produced by this operation.
    pub fn record_artifact(
        &self,
        artifact: impl Into<String>,
        parent: Option<&str>,
        payload: Value,
    ) -> Result<WalAck, OperationError> {
        if !self.tracker.contains(self.id) {
            return Err(OperationError::ForceTerminated(self.id));
        }
        let artifact = artifact.into();
        let parent = parent.map(str::to_owned);
        Ok(self.journal.record(
            |_| Intent::ArtifactRecorded {
                id: artifact,
                operation: self.id,
                parent,
            },
            payload,
        )?)
    }

    /// Journals successful completion. The operation counts as committed
    /// only once this returns `Ok`.
    pub fn complete(mut self) -> Result<WalAck, OperationError> {
        self.finish(Intent::OperationCompleted { id: self.id })
    }

    /// Journals failure with `reason`.
    pub fn fail(mut self, reason: impl Into<String>) -> Result<WalAck, OperationError> {
        let reason = reason.into();
        self.finish(Intent::OperationFailed {
            id: self.id,
            reason,
        })
    }

    fn finish(&mut self, intent: Intent) -> Result<WalAck, OperationError> {
        self.finished = true;
        if !self.tracker.claim(self.id) {
            return Err(OperationError::ForceTerminated(self.id));
        }
        let recorded = self.journal.record(|_| intent, Value::Null);
        self.tracker.settle();
        Ok(recorded?)
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if self.finished || !self.tracker.claim(self.id) {
            return;
        }
        let id = self.id;
        let recorded = self.journal.record(
            |_| Intent::OperationFailed {
                id,
                reason: DROPPED_REASON.to_owned(),
            },
            Value::Null,
        );
        self.tracker.settle();
        if let Err(error) = recorded {
            warn!(
                target: JOURNAL_TARGET,
                operation = id,
                error = %error,
                "failed to journal abandoned operation"
            );
        }
    }
}
