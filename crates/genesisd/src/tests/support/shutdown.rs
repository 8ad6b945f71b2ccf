//! Shutdown signals a test can trigger from another thread.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::process::{ShutdownError, ShutdownSignal};

#[derive(Debug, Clone, Default)]
pub struct TestShutdownSignal {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    /// Releases every waiter.
    pub fn trigger(&self) {
        let (lock, condvar) = &*self.state;
        *lock.lock().expect("shutdown mutex poisoned") = true;
        condvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (lock, condvar) = &*self.state;
        let mut triggered = lock.lock().map_err(|_| ShutdownError::Poisoned)?;
        while !*triggered {
            triggered = condvar
                .wait(triggered)
                .map_err(|_| ShutdownError::Poisoned)?;
        }
        Ok(())
    }
}

/// Shutdown signal whose forced-exit watcher freezes the state directory
/// when a second signal arrives.
///
/// The process cannot exit under test, so the watcher copies every runtime
/// file into `image_dir` instead. The copy is what a process ending at that
/// instant leaves on disk; the engine itself carries on.
#[derive(Debug, Clone)]
pub struct ForcedExitSignal {
    first: TestShutdownSignal,
    second: TestShutdownSignal,
    exited: TestShutdownSignal,
    failure: Arc<Mutex<Option<String>>>,
    state_dir: PathBuf,
    image_dir: PathBuf,
}

impl ForcedExitSignal {
    /// Waits on `first` for the initial signal.
    #[must_use]
    pub fn new(first: TestShutdownSignal, state_dir: &Path, image_dir: &Path) -> Self {
        Self {
            first,
            second: TestShutdownSignal::default(),
            exited: TestShutdownSignal::default(),
            failure: Arc::default(),
            state_dir: state_dir.to_path_buf(),
            image_dir: image_dir.to_path_buf(),
        }
    }

    /// Delivers the second signal and blocks until the watcher has frozen
    /// the state directory.
    pub fn trigger_again(&self) {
        self.second.trigger();
        self.exited
            .wait()
            .expect("forced-exit latch should not be poisoned");
    }

    /// Error from freezing the state directory, if any.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .expect("forced-exit failure mutex poisoned")
            .clone()
    }

    fn freeze(&self) -> io::Result<()> {
        fs::create_dir_all(&self.image_dir)?;
        for entry in fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), self.image_dir.join(entry.file_name()))?;
            }
        }
        Ok(())
    }
}

impl ShutdownSignal for ForcedExitSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        self.first.wait()
    }

    fn arm_forced_exit(&self) -> Result<(), ShutdownError> {
        let signal = self.clone();
        thread::Builder::new()
            .name("forced-exit-watcher".to_owned())
            .spawn(move || {
                if signal.second.wait().is_ok() {
                    if let Err(error) = signal.freeze() {
                        *signal
                            .failure
                            .lock()
                            .expect("forced-exit failure mutex poisoned") = Some(error.to_string());
                    }
                    signal.exited.trigger();
                }
            })
            .map_err(|source| ShutdownError::Watcher { source })?;
        Ok(())
    }
}
