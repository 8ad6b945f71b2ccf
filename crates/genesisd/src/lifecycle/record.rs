//! The persisted shutdown record.
//!
//! The record is rewritten on every lifecycle edge that matters for crash
//! detection: `running` when startup begins, `draining` when shutdown
//! begins, `graceful` when shutdown completes. Any status other than
//! `graceful` found at boot means the previous process died.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use genesis_config::CapabilityLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::atomic_write;
use crate::wal::OperationId;

/// Status written to the shutdown record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownStatus {
    /// The process is starting or serving.
    Running,
    /// Shutdown began but has not completed. Tentative.
    Draining,
    /// `shutdown_complete` was reached.
    Graceful,
}

/// Work that was still running when shutdown completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteOperation {
    /// Operation identifier.
    pub id: OperationId,
    /// Operation description.
    pub description: String,
}

/// Persisted record of the most recent process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRecord {
    /// Lifecycle status.
    pub status: ShutdownStatus,
    /// Process that wrote the record.
    pub pid: u32,
    /// Wall-clock time of the write, in milliseconds since the epoch.
    pub updated_at_ms: u64,
    /// Capability level the process ran at.
    pub capability_level: CapabilityLevel,
    /// Operations force-terminated or abandoned during shutdown.
    #[serde(default)]
    pub incomplete_operations: Vec<IncompleteOperation>,
    /// Sequence of the checkpoint written during shutdown, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_sequence: Option<u64>,
}

impl ShutdownRecord {
    /// Fresh record for this process.
    #[must_use]
    pub fn new(status: ShutdownStatus, capability_level: CapabilityLevel) -> Self {
        Self {
            status,
            pid: std::process::id(),
            updated_at_ms: now_ms(),
            capability_level,
            incomplete_operations: Vec::new(),
            checkpoint_sequence: None,
        }
    }

    /// Returns `true` when the recorded lifetime ended gracefully.
    #[must_use]
    pub fn is_graceful(&self) -> bool {
        self.status == ShutdownStatus::Graceful
    }
}

/// How the previous process lifetime ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviousShutdown {
    /// No record exists.
    FirstBoot,
    /// The previous process reached `shutdown_complete`.
    Graceful(ShutdownRecord),
    /// The previous process died. `None` when the record was unreadable.
    Crashed(Option<ShutdownRecord>),
}

impl PreviousShutdown {
    /// Returns `true` when crash recovery is warranted.
    #[must_use]
    pub const fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed(_))
    }
}

/// Errors reading or writing the shutdown record.
#[derive(Debug, Error)]
pub enum ShutdownRecordError {
    /// Filesystem access failed.
    #[error("shutdown record i/o on '{path}' failed: {source}")]
    Io {
        /// Record path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The record could not be encoded.
    #[error("failed to encode shutdown record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reads and writes the shutdown record file.
#[derive(Debug, Clone)]
pub struct ShutdownRecordStore {
    path: PathBuf,
}

impl ShutdownRecordStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Classifies the previous lifetime. An undecodable record counts as a
    /// crash.
    pub fn previous(&self) -> Result<PreviousShutdown, ShutdownRecordError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(PreviousShutdown::FirstBoot);
            }
            Err(source) => {
                return Err(ShutdownRecordError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(match serde_json::from_slice::<ShutdownRecord>(&bytes) {
            Ok(record) if record.is_graceful() => PreviousShutdown::Graceful(record),
            Ok(record) => PreviousShutdown::Crashed(Some(record)),
            Err(_) => PreviousShutdown::Crashed(None),
        })
    }

    /// Loads the current record, if any.
    pub fn load(&self) -> Result<Option<ShutdownRecord>, ShutdownRecordError> {
        Ok(match self.previous()? {
            PreviousShutdown::FirstBoot | PreviousShutdown::Crashed(None) => None,
            PreviousShutdown::Graceful(record) | PreviousShutdown::Crashed(Some(record)) => {
                Some(record)
            }
        })
    }

    /// Writes `record` atomically.
    pub fn persist(&self, record: &ShutdownRecord) -> Result<(), ShutdownRecordError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        atomic_write(&self.path, &bytes).map_err(|source| ShutdownRecordError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
