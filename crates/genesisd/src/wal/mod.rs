//! The write-ahead log.
//!
//! Every state-affecting intent is appended here, and flushed to stable
//! storage, before the mutation it guards counts as committed. A single
//! mutex serialises writers, which gives concurrent callers one total
//! order: sequence numbers are gapless and strictly increasing.

mod record;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use record::{Intent, OperationId, WalEntry};

use crate::files::atomic_write;

const WAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::wal");
const WAL_IO_MAX_ATTEMPTS: usize = 3;
const WAL_IO_BACKOFF: Duration = Duration::from_millis(20);

/// Proof that an entry is on stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalAck {
    /// Sequence assigned to the entry.
    pub sequence: u64,
    /// Logical timestamp assigned to the entry.
    pub logical_ts: u64,
}

/// The log's contents could not be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// A complete line could not be decoded.
    #[error("line {line} is corrupt: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Decoder message.
        reason: String,
    },
    /// A line's checksum does not match its contents.
    #[error("line {line} failed its checksum")]
    ChecksumMismatch {
        /// 1-based line number.
        line: usize,
    },
    /// Sequence numbers skip or go backwards.
    #[error("line {line} has sequence {found}, expected {expected}")]
    SequenceGap {
        /// 1-based line number.
        line: usize,
        /// Sequence that should have followed.
        expected: u64,
        /// Sequence actually found.
        found: u64,
    },
    /// Logical timestamps do not strictly increase.
    #[error("line {line} has a logical timestamp that does not advance")]
    ClockRegression {
        /// 1-based line number.
        line: usize,
    },
    /// The state rebuilt from the log is inconsistent.
    #[error("rebuilt state is inconsistent: {}", .0.join("; "))]
    Inconsistent(Vec<String>),
}

/// Errors surfaced by the write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    /// Reading or writing the log file failed.
    #[error("write-ahead log i/o on '{path}' failed: {source}")]
    Io {
        /// Log path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// An entry could not be serialised.
    #[error("failed to encode write-ahead log entry: {0}")]
    Encode(#[from] serde_json::Error),
    /// Existing contents failed verification.
    #[error("write-ahead log replay failed: {0}")]
    Replay(#[from] ReplayError),
    /// A writer panicked while holding the log lock.
    #[error("write-ahead log lock poisoned")]
    Poisoned,
    /// A failed append could not be rolled back; the log refuses further
    /// writes until reopened.
    #[error("write-ahead log is unusable after a failed append")]
    Broken,
}

struct WalWriter {
    file: File,
    next_sequence: u64,
    last_logical_ts: u64,
    len: u64,
    broken: bool,
}

/// Append-only intent log backed by one file.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    /// Opens or creates the log at `path`, verifying every entry.
    ///
    /// A final line without its terminator is the remains of an append that
    /// was never acknowledged; it is truncated. Any other defect is a
    /// [`ReplayError`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WalError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        let bytes = fs::read(&path).map_err(|source| io_error(&path, source))?;
        let scan = scan(&bytes)?;
        if scan.valid_len < bytes.len() as u64 {
            warn!(
                target: WAL_TARGET,
                path = %path.display(),
                discarded = bytes.len() as u64 - scan.valid_len,
                "truncating torn write-ahead log tail"
            );
            file.set_len(scan.valid_len)
                .and_then(|()| file.sync_all())
                .map_err(|source| io_error(&path, source))?;
        }
        let last = scan.entries.last();
        let writer = WalWriter {
            next_sequence: last.map_or(1, |entry| entry.sequence + 1),
            last_logical_ts: last.map_or(0, |entry| entry.logical_ts),
            len: scan.valid_len,
            broken: false,
            file,
        };
        debug!(
            target: WAL_TARGET,
            path = %path.display(),
            entries = scan.entries.len(),
            next_sequence = writer.next_sequence,
            "write-ahead log opened"
        );
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence the next append will receive.
    pub fn next_sequence(&self) -> Result<u64, WalError> {
        Ok(self.lock()?.next_sequence)
    }

    /// Raises the next sequence to at least `floor + 1`.
    ///
    /// Used when a checkpoint is newer than every surviving entry, so that
    /// numbering never restarts below it.
    pub fn continue_after(&self, floor: u64) -> Result<(), WalError> {
        let mut writer = self.lock()?;
        writer.next_sequence = writer.next_sequence.max(floor + 1);
        Ok(())
    }

    /// Appends one entry and blocks until it is on stable storage.
    ///
    /// On failure nothing is acknowledged and the file is rolled back to its
    /// previous length.
    pub fn append(&self, intent: Intent, payload: Value) -> Result<WalAck, WalError> {
        let mut writer = self.lock()?;
        if writer.broken {
            return Err(WalError::Broken);
        }
        let entry = WalEntry {
            sequence: writer.next_sequence,
            logical_ts: writer.last_logical_ts.saturating_add(1).max(wall_clock_ms()),
            intent,
            payload,
        };
        let line = record::encode(&entry)?;

        let written = retry_io(
            || {
                writer.file.write_all(&line)?;
                writer.file.flush()
            },
            "write",
            &self.path,
        )
        .and_then(|()| retry_io(|| writer.file.sync_data(), "sync", &self.path));
        if let Err(source) = written {
            let len = writer.len;
            if writer
                .file
                .set_len(len)
                .and_then(|()| writer.file.sync_all())
                .is_err()
            {
                writer.broken = true;
            }
            return Err(io_error(&self.path, source));
        }

        writer.len += line.len() as u64;
        writer.next_sequence += 1;
        writer.last_logical_ts = entry.logical_ts;
        debug!(
            target: WAL_TARGET,
            sequence = entry.sequence,
            intent = entry.intent.label(),
            "entry appended"
        );
        Ok(WalAck {
            sequence: entry.sequence,
            logical_ts: entry.logical_ts,
        })
    }

    /// Returns every entry with `sequence >= from_sequence`, in order.
    pub fn replay(&self, from_sequence: u64) -> Result<Vec<WalEntry>, WalError> {
        let _writer = self.lock()?;
        let bytes = fs::read(&self.path).map_err(|source| io_error(&self.path, source))?;
        let scan = scan(&bytes)?;
        Ok(scan
            .entries
            .into_iter()
            .filter(|entry| entry.sequence >= from_sequence)
            .collect())
    }

    /// Atomically rewrites the log keeping only entries after `through`.
    ///
    /// Sequence numbering continues where it left off. Returns the number
    /// of entries removed.
    pub fn compact(&self, through: u64) -> Result<usize, WalError> {
        let mut writer = self.lock()?;
        let bytes = fs::read(&self.path).map_err(|source| io_error(&self.path, source))?;
        let entries = scan(&bytes)?.entries;
        let before = entries.len();
        let mut kept = Vec::new();
        let mut retained = 0;
        for entry in entries.iter().filter(|entry| entry.sequence > through) {
            kept.extend_from_slice(&record::encode(entry)?);
            retained += 1;
        }
        atomic_write(&self.path, &kept).map_err(|source| io_error(&self.path, source))?;
        writer.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| io_error(&self.path, source))?;
        writer.len = kept.len() as u64;
        writer.broken = false;
        let removed = before - retained;
        debug!(
            target: WAL_TARGET,
            through,
            removed,
            retained,
            "write-ahead log compacted"
        );
        Ok(removed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, WalWriter>, WalError> {
        self.writer.lock().map_err(|_| WalError::Poisoned)
    }
}

struct Scan {
    entries: Vec<WalEntry>,
    valid_len: u64,
}

fn scan(bytes: &[u8]) -> Result<Scan, ReplayError> {
    let mut entries: Vec<WalEntry> = Vec::new();
    let mut offset = 0;
    let mut line_number = 0;
    for chunk in bytes.split_inclusive(|byte| *byte == b'\n') {
        // A final chunk without a terminator is a torn write.
        let Some((b'\n', line)) = chunk.split_last() else {
            break;
        };
        line_number += 1;
        let entry = record::decode(line, line_number)?;
        if let Some(previous) = entries.last() {
            if entry.sequence != previous.sequence + 1 {
                return Err(ReplayError::SequenceGap {
                    line: line_number,
                    expected: previous.sequence + 1,
                    found: entry.sequence,
                });
            }
            if entry.logical_ts <= previous.logical_ts {
                return Err(ReplayError::ClockRegression { line: line_number });
            }
        }
        entries.push(entry);
        offset += chunk.len();
    }
    Ok(Scan {
        entries,
        valid_len: offset as u64,
    })
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn io_error(path: &Path, source: io::Error) -> WalError {
    WalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn retry_io<F>(mut op: F, label: &str, path: &Path) -> io::Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(error) if should_retry(&error) && attempt < WAL_IO_MAX_ATTEMPTS => {
                warn!(
                    target: WAL_TARGET,
                    operation = label,
                    path = %path.display(),
                    attempt,
                    error = %error,
                    "retrying write-ahead log i/o"
                );
                thread::sleep(WAL_IO_BACKOFF);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn should_retry(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
