//! Defines the unified error surface for engine launch and supervision.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use genesis_config::RuntimePathsError;
use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;

use crate::bootstrap::{BootstrapError, ErrorCategory};
use crate::gate::PreBootError;
use crate::lifecycle::LifecycleError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the engine process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("pre-boot check failed: configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration failed validation before the lock was taken.
    #[error(transparent)]
    PreBoot(#[from] PreBootError),
    /// The state directory could not be prepared.
    #[error("failed to prepare runtime paths: {source}")]
    Runtime {
        /// Underlying filesystem error.
        #[source]
        source: RuntimePathsError,
    },
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The lock file reappeared after a stale claim was cleared.
    #[error("lock file '{path}' is contended by another starting engine")]
    LockContended {
        /// Lock file path.
        path: PathBuf,
    },
    /// A running engine already holds the lock.
    #[error("engine already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded by the running engine.
        pid: u32,
    },
    /// Removing a stale runtime artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the artefact that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the health snapshot failed.
    #[error("failed to write health snapshot '{path}': {source}")]
    HealthWrite {
        /// Health file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising the health snapshot failed.
    #[error("failed to serialise health snapshot: {source}")]
    HealthSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Probing an existing PID failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID that failed to probe.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// Booting the engine failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Draining or finalising shutdown failed.
    #[error("shutdown failed: {source}")]
    Lifecycle {
        /// Underlying lifecycle error.
        #[source]
        source: LifecycleError,
    },
}

impl LaunchError {
    /// Process exit status for this failure.
    ///
    /// Pre-boot failures exit `2`, construction failures `3`, replay and
    /// recovery failures `4`, anything else `1`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        let category = match self {
            Self::Config { .. } | Self::PreBoot(PreBootError::Configuration { .. }) => {
                ErrorCategory::Configuration
            }
            Self::PreBoot(PreBootError::Connectivity { .. }) => ErrorCategory::Connectivity,
            Self::Bootstrap(error) => error.category(),
            Self::Lifecycle { source } if source.is_replay() => ErrorCategory::Replay,
            _ => ErrorCategory::Other,
        };
        match category {
            ErrorCategory::Configuration | ErrorCategory::Connectivity => 2,
            ErrorCategory::Construction => 3,
            ErrorCategory::Replay => 4,
            ErrorCategory::Other => 1,
        }
    }

    /// The error as exactly one line of text.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        self.to_string()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        Self::Runtime { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<LifecycleError> for LaunchError {
    fn from(source: LifecycleError) -> Self {
        Self::Lifecycle { source }
    }
}
