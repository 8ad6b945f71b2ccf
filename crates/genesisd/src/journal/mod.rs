//! Journal state derived from the write-ahead log.
//!
//! [`JournalState`] is a pure function of a checkpoint snapshot plus the
//! entries replayed after it. Applying an entry at or below
//! `applied_through` is a no-op, so replaying a segment twice yields the
//! same state.

mod operations;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub use operations::{
    DrainOutcome, Operation, OperationError, OperationRequest, OperationTracker,
};
pub(crate) use operations::begin_operation;

use crate::files::atomic_write;
use crate::wal::{Intent, OperationId, ReplayError, WalAck, WalEntry, WalError, WriteAheadLog};

const JOURNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::journal");

/// Lifecycle of a journalled operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Begun but not yet finished.
    InFlight,
    /// Finished successfully.
    Completed,
    /// Failed, force-terminated or reconciled after a crash.
    Failed {
        /// Failure reason.
        reason: String,
    },
}

/// One operation as reconstructed from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Human-readable description.
    pub description: String,
    /// Current status.
    pub status: OperationStatus,
    /// Whether recovery may offer the operation to a resumer.
    pub resumable: bool,
    /// Artifact the operation works on.
    pub parent: Option<String>,
}

/// One artifact as reconstructed from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Operation that produced the artifact.
    pub operation: OperationId,
    /// Artifact this one derives from.
    pub parent: Option<String>,
}

/// Derived state rebuilt from checkpoints and replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalState {
    operations: BTreeMap<OperationId, OperationRecord>,
    artifacts: BTreeMap<String, ArtifactRecord>,
    applied_through: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    anomalies: Vec<String>,
}

impl JournalState {
    /// Applies one entry. Entries at or below `applied_through` are ignored.
    pub fn apply(&mut self, entry: &WalEntry) {
        if entry.sequence <= self.applied_through {
            return;
        }
        match &entry.intent {
            Intent::OperationBegun {
                id,
                description,
                resumable,
                parent,
            } => {
                if *id != entry.sequence {
                    self.anomalies.push(format!(
                        "operation {id} begun at sequence {}",
                        entry.sequence
                    ));
                }
                if self.operations.contains_key(id) {
                    self.anomalies.push(format!("operation {id} begun twice"));
                } else {
                    self.operations.insert(
                        *id,
                        OperationRecord {
                            description: description.clone(),
                            status: OperationStatus::InFlight,
                            resumable: *resumable,
                            parent: parent.clone(),
                        },
                    );
                }
            }
            Intent::OperationCompleted { id } => {
                self.finish(*id, OperationStatus::Completed, "completed");
            }
            Intent::OperationFailed { id, reason } => {
                self.finish(
                    *id,
                    OperationStatus::Failed {
                        reason: reason.clone(),
                    },
                    "failed",
                );
            }
            Intent::ArtifactRecorded {
                id,
                operation,
                parent,
            } => {
                self.artifacts.insert(
                    id.clone(),
                    ArtifactRecord {
                        operation: *operation,
                        parent: parent.clone(),
                    },
                );
            }
            Intent::Checkpoint { .. } => {}
        }
        self.applied_through = entry.sequence;
    }

    fn finish(&mut self, id: OperationId, status: OperationStatus, verb: &str) {
        match self.operations.get_mut(&id) {
            Some(record) if record.status == OperationStatus::InFlight => record.status = status,
            Some(_) => self
                .anomalies
                .push(format!("operation {id} {verb} after it had already finished")),
            None => self
                .anomalies
                .push(format!("operation {id} {verb} without having begun")),
        }
    }

    /// Checks referential consistency, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = self.anomalies.clone();
        for (id, artifact) in &self.artifacts {
            if let Some(parent) = &artifact.parent
                && !self.artifacts.contains_key(parent)
            {
                problems.push(format!("artifact {id} references unknown parent {parent}"));
            }
            if !self.operations.contains_key(&artifact.operation) {
                problems.push(format!(
                    "artifact {id} references unknown operation {}",
                    artifact.operation
                ));
            }
        }
        for (id, operation) in &self.operations {
            if let Some(parent) = &operation.parent
                && !self.artifacts.contains_key(parent)
            {
                problems.push(format!("operation {id} references unknown artifact {parent}"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Operations begun but not finished, in id order.
    #[must_use]
    pub fn in_flight(&self) -> Vec<(OperationId, &OperationRecord)> {
        self.operations
            .iter()
            .filter(|(_, record)| record.status == OperationStatus::InFlight)
            .map(|(id, record)| (*id, record))
            .collect()
    }

    /// Looks up one operation.
    #[must_use]
    pub fn operation(&self, id: OperationId) -> Option<&OperationRecord> {
        self.operations.get(&id)
    }

    /// Looks up one artifact.
    #[must_use]
    pub fn artifact(&self, id: &str) -> Option<&ArtifactRecord> {
        self.artifacts.get(id)
    }

    /// Highest sequence applied.
    #[must_use]
    pub const fn applied_through(&self) -> u64 {
        self.applied_through
    }
}

/// Snapshot of journal state through a WAL sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last sequence reflected in `state`.
    pub through_sequence: u64,
    /// Captured state.
    pub state: JournalState,
}

/// Result of [`Journal::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Sequence of the checkpoint marker entry.
    pub through_sequence: u64,
    /// Entries removed from the log by compaction.
    pub compacted: usize,
}

/// Persists checkpoints with an atomic replace.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the latest checkpoint, or `None` if none was ever written.
    pub fn load(&self) -> Result<Option<Checkpoint>, JournalError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| JournalError::CheckpointDecode {
                path: self.path.clone(),
                source,
            })
    }

    /// Writes `checkpoint` durably.
    pub fn persist(&self, checkpoint: &Checkpoint) -> Result<(), JournalError> {
        let bytes = serde_json::to_vec(checkpoint).map_err(|source| {
            JournalError::CheckpointDecode {
                path: self.path.clone(),
                source,
            }
        })?;
        atomic_write(&self.path, &bytes).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> JournalError {
        JournalError::Checkpoint {
            path: self.path.clone(),
            source,
        }
    }
}

/// Errors surfaced by the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The write-ahead log failed.
    #[error(transparent)]
    Wal(#[from] WalError),
    /// Reading or writing the checkpoint failed.
    #[error("checkpoint i/o on '{path}' failed: {source}")]
    Checkpoint {
        /// Checkpoint path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The checkpoint could not be encoded or decoded.
    #[error("checkpoint '{path}' is unreadable: {source}")]
    CheckpointDecode {
        /// Checkpoint path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A caller panicked while holding the journal lock.
    #[error("journal state lock poisoned")]
    Poisoned,
}

impl JournalError {
    /// Returns the replay error when the log or rebuilt state is
    /// untrustworthy.
    #[must_use]
    pub fn as_replay(&self) -> Option<&ReplayError> {
        match self {
            Self::Wal(WalError::Replay(error)) => Some(error),
            _ => None,
        }
    }
}

/// The write-ahead log together with the state derived from it.
#[derive(Debug)]
pub struct Journal {
    wal: WriteAheadLog,
    state: Mutex<JournalState>,
    checkpoints: CheckpointStore,
}

impl Journal {
    /// Opens the log and loads the latest checkpoint without replaying.
    ///
    /// Opening verifies every log entry, so a corrupt log fails here.
    pub fn open(wal_path: &Path, checkpoint_path: &Path) -> Result<Self, JournalError> {
        let wal = WriteAheadLog::open(wal_path)?;
        let checkpoints = CheckpointStore::new(checkpoint_path);
        let state = match checkpoints.load()? {
            Some(checkpoint) => {
                wal.continue_after(checkpoint.through_sequence)?;
                checkpoint.state
            }
            None => JournalState::default(),
        };
        Ok(Self {
            wal,
            state: Mutex::new(state),
            checkpoints,
        })
    }

    /// Rebuilds state from the latest checkpoint plus every later entry and
    /// validates it. Returns the number of entries replayed.
    pub fn rebuild(&self) -> Result<usize, JournalError> {
        let mut state = self.lock()?;
        let base = self.checkpoints.load()?;
        let (mut rebuilt, from) = match base {
            Some(checkpoint) => (checkpoint.state, checkpoint.through_sequence + 1),
            None => (JournalState::default(), 0),
        };
        let entries = self.wal.replay(from)?;
        for entry in &entries {
            rebuilt.apply(entry);
        }
        rebuilt
            .validate()
            .map_err(|problems| WalError::Replay(ReplayError::Inconsistent(problems)))?;
        info!(
            target: JOURNAL_TARGET,
            replayed = entries.len(),
            applied_through = rebuilt.applied_through,
            "journal state rebuilt"
        );
        *state = rebuilt;
        Ok(entries.len())
    }

    /// Appends an intent and applies it once it is durable.
    ///
    /// `intent` receives the sequence the entry will be assigned.
    pub fn record(
        &self,
        intent: impl FnOnce(u64) -> Intent,
        payload: Value,
    ) -> Result<WalAck, JournalError> {
        let mut state = self.lock()?;
        self.record_locked(&mut state, intent, payload)
    }

    fn record_locked(
        &self,
        state: &mut JournalState,
        intent: impl FnOnce(u64) -> Intent,
        payload: Value,
    ) -> Result<WalAck, JournalError> {
        let intent = intent(self.wal.next_sequence()?);
        let ack = self.wal.append(intent.clone(), payload.clone())?;
        state.apply(&WalEntry {
            sequence: ack.sequence,
            logical_ts: ack.logical_ts,
            intent,
            payload,
        });
        Ok(ack)
    }

    /// Captures state in a checkpoint and compacts the log behind it.
    ///
    /// Entries not yet reflected in memory are applied first, so
    /// compaction never discards unapplied work. The checkpoint marker
    /// itself stays in the log to carry sequence numbering forward.
    pub fn checkpoint(&self) -> Result<CheckpointInfo, JournalError> {
        let mut state = self.lock()?;
        for entry in self.wal.replay(state.applied_through + 1)? {
            state.apply(&entry);
        }
        let through = state.applied_through;
        let marker = self.record_locked(
            &mut state,
            |_| Intent::Checkpoint { through },
            Value::Null,
        )?;
        self.checkpoints.persist(&Checkpoint {
            through_sequence: marker.sequence,
            state: state.clone(),
        })?;
        let compacted = self.wal.compact(marker.sequence - 1)?;
        info!(
            target: JOURNAL_TARGET,
            through_sequence = marker.sequence,
            compacted,
            "checkpoint written"
        );
        Ok(CheckpointInfo {
            through_sequence: marker.sequence,
            compacted,
        })
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<JournalState, JournalError> {
        Ok(self.lock()?.clone())
    }

    /// The underlying log.
    #[must_use]
    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalState>, JournalError> {
        self.state.lock().map_err(|_| JournalError::Poisoned)
    }
}
