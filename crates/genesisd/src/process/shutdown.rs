use std::io;
use std::sync::Mutex;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use super::{FORCED_EXIT_CODE, PROCESS_TARGET};

const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should begin.
    fn wait(&self) -> Result<(), ShutdownError>;

    /// Called once draining starts. A further signal should end the process
    /// at once, leaving the shutdown record non-graceful.
    fn arm_forced_exit(&self) -> Result<(), ShutdownError> {
        Ok(())
    }
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the forced-exit watcher failed.
    #[error("failed to start forced-exit watcher: {source}")]
    Watcher {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A panic left the listener unusable.
    #[error("shutdown listener lock poisoned")]
    Poisoned,
}

/// Shutdown listener for SIGTERM, SIGINT, SIGQUIT and SIGHUP.
///
/// The same registration serves both the first signal and the forced-exit
/// watcher, so no signal is lost between the two.
#[derive(Debug, Default)]
pub struct SystemShutdownSignal {
    signals: Mutex<Option<Signals>>,
}

impl SystemShutdownSignal {
    /// Builds a listener; handlers are installed on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn take_or_install(&self) -> Result<Signals, ShutdownError> {
        let installed = self
            .signals
            .lock()
            .map_err(|_| ShutdownError::Poisoned)?
            .take();
        match installed {
            Some(signals) => Ok(signals),
            None => {
                Signals::new(TERMINATION_SIGNALS).map_err(|source| ShutdownError::Install { source })
            }
        }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = self.take_or_install()?;
        if let Some(signal) = signals.forever().next() {
            info!(
                target: PROCESS_TARGET,
                signal,
                "shutdown signal received"
            );
        }
        *self.signals.lock().map_err(|_| ShutdownError::Poisoned)? = Some(signals);
        Ok(())
    }

    fn arm_forced_exit(&self) -> Result<(), ShutdownError> {
        let mut signals = self.take_or_install()?;
        thread::Builder::new()
            .name("genesisd-forced-exit".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    warn!(
                        target: PROCESS_TARGET,
                        signal,
                        "second termination signal; exiting without completing shutdown"
                    );
                    std::process::exit(i32::from(FORCED_EXIT_CODE));
                }
            })
            .map_err(|source| ShutdownError::Watcher { source })?;
        Ok(())
    }
}
