//! Runtime artefact paths derived from validated configuration.

use std::fs::DirBuilder;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::validate::ValidatedConfig;

/// Filesystem locations the engine owns for one state directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    state_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
    shutdown_record_path: PathBuf,
    checkpoint_path: PathBuf,
    wal_path: PathBuf,
}

impl RuntimePaths {
    /// Derives the runtime paths and creates the state directory with
    /// owner-only permissions.
    pub fn from_config(config: &ValidatedConfig) -> Result<Self, RuntimePathsError> {
        let state_dir = config.state_dir().as_std_path().to_path_buf();
        create_private_dir(&state_dir)?;
        let wal_path = config.wal_path().as_std_path().to_path_buf();
        if let Some(parent) = wal_path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_private_dir(parent)?;
        }
        Ok(Self {
            lock_path: state_dir.join("genesisd.lock"),
            pid_path: state_dir.join("genesisd.pid"),
            health_path: state_dir.join("genesisd.health"),
            shutdown_record_path: state_dir.join("genesis.shutdown"),
            checkpoint_path: state_dir.join("genesis.checkpoint"),
            wal_path,
            state_dir,
        })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the PID file.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    #[must_use]
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }

    /// Path to the persisted shutdown record.
    #[must_use]
    pub fn shutdown_record_path(&self) -> &Path {
        self.shutdown_record_path.as_path()
    }

    /// Path to the latest journal checkpoint.
    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        self.checkpoint_path.as_path()
    }

    /// Path to the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> &Path {
        self.wal_path.as_path()
    }
}

fn create_private_dir(path: &Path) -> Result<(), RuntimePathsError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    match builder.create(path) {
        Err(source) if source.kind() != std::io::ErrorKind::AlreadyExists => {
            Err(RuntimePathsError::StateDirectory {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Errors raised while deriving runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating a runtime directory failed.
    #[error("failed to prepare state directory '{path}': {source}")]
    StateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
