//! WAL entry types and the line codec.
//!
//! One entry per line: the CRC-32 of the entry JSON as eight lowercase hex
//! digits, a tab, the entry JSON, then `\n`. The checksum covers the exact
//! bytes written so verification never depends on re-serialisation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ReplayError;

/// Identifier of a tracked operation, allocated by the journal.
pub type OperationId = u64;

/// A state-affecting intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// An operation was admitted.
    OperationBegun {
        /// Operation identifier.
        id: OperationId,
        /// Human-readable description.
        description: String,
        /// Whether recovery may offer the operation to a resumer.
        resumable: bool,
        /// Artifact the operation works on, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// An operation finished successfully.
    OperationCompleted {
        /// Operation identifier.
        id: OperationId,
    },
    /// An operation failed or was reconciled as failed.
    OperationFailed {
        /// Operation identifier.
        id: OperationId,
        /// Failure reason.
        reason: String,
    },
    /// An operation produced an artifact.
    ArtifactRecorded {
        /// Artifact identifier.
        id: String,
        /// Operation that produced it.
        operation: OperationId,
        /// Artifact this one derives from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// State through `through` was captured in a checkpoint.
    Checkpoint {
        /// Last sequence included in the checkpoint.
        through: u64,
    },
}

impl Intent {
    /// Short label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OperationBegun { .. } => "operation_begun",
            Self::OperationCompleted { .. } => "operation_completed",
            Self::OperationFailed { .. } => "operation_failed",
            Self::ArtifactRecorded { .. } => "artifact_recorded",
            Self::Checkpoint { .. } => "checkpoint",
        }
    }
}

/// One durable log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Gapless, strictly increasing position in the log.
    pub sequence: u64,
    /// Strictly increasing milliseconds; never behind the wall clock at
    /// append time.
    pub logical_ts: u64,
    /// What the entry records.
    pub intent: Intent,
    /// Caller-supplied detail.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

pub(super) fn encode(entry: &WalEntry) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(entry)?;
    let mut line = format!("{:08x}\t", crc32fast::hash(&json)).into_bytes();
    line.extend_from_slice(&json);
    line.push(b'\n');
    Ok(line)
}

/// Decodes one line without its terminator. `line_number` is 1-based.
pub(super) fn decode(line: &[u8], line_number: usize) -> Result<WalEntry, ReplayError> {
    let corrupt = |reason: &str| ReplayError::Corrupt {
        line: line_number,
        reason: reason.to_owned(),
    };
    let mut fields = line.splitn(2, |byte| *byte == b'\t');
    let (Some(checksum), Some(json)) = (fields.next(), fields.next()) else {
        return Err(corrupt("missing checksum separator"));
    };
    let expected = std::str::from_utf8(checksum)
        .ok()
        .and_then(|text| u32::from_str_radix(text, 16).ok())
        .ok_or_else(|| corrupt("malformed checksum"))?;
    if crc32fast::hash(json) != expected {
        return Err(ReplayError::ChecksumMismatch { line: line_number });
    }
    serde_json::from_slice(json).map_err(|error| corrupt(&error.to_string()))
}
