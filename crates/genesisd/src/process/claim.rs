//! Exclusive claim on a state directory.
//!
//! The journal and the shutdown record assume a single writer, so the claim
//! is taken before either is opened. It consists of a lock file created with
//! `O_EXCL`, a PID file, and a health snapshot that mirrors the lifecycle
//! state for external supervisors.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use genesis_config::{CapabilityLevel, RuntimePaths};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use crate::files::atomic_write;

/// One attempt on a free directory, one more after clearing a stale claim.
const LOCK_ATTEMPTS: usize = 2;

/// Held for the life of the engine process.
///
/// Dropping the claim removes the lock and PID files. The health snapshot
/// stays behind so its final status remains observable.
#[derive(Debug)]
pub(super) struct RuntimeClaim {
    paths: RuntimePaths,
    pid: u32,
    level: CapabilityLevel,
    _lock: File,
}

impl RuntimeClaim {
    pub(super) fn take(paths: RuntimePaths, level: CapabilityLevel) -> Result<Self, LaunchError> {
        let pid = std::process::id();
        let lock = take_lock(&paths, pid)?;
        let claim = Self {
            paths,
            pid,
            level,
            _lock: lock,
        };
        claim.record_pid()?;
        Ok(claim)
    }

    fn record_pid(&self) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        atomic_write(path, format!("{}\n", self.pid).as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!(target: PROCESS_TARGET, pid = self.pid, file = %path.display(), "pid recorded");
        Ok(())
    }

    /// Replaces the health snapshot with `state`.
    pub(super) fn publish(&self, state: HealthState) -> Result<(), LaunchError> {
        let path = self.paths.health_path();
        let snapshot = HealthSnapshot {
            status: state.as_str(),
            ready: state.is_ready(),
            pid: self.pid,
            capability_level: self.level,
            updated_at_ms: now_ms(),
        };
        let mut bytes = serde_json::to_vec(&snapshot)?;
        bytes.push(b'\n');
        atomic_write(path, &bytes).map_err(|source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            event = "health_published",
            status = state.as_str(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for RuntimeClaim {
    fn drop(&mut self) {
        for path in [self.paths.pid_path(), self.paths.lock_path()] {
            if let Err(error) = remove_if_present(path) {
                warn!(
                    target: PROCESS_TARGET,
                    file = %path.display(),
                    error = %error,
                    "failed to release runtime file"
                );
            }
        }
    }
}

/// Lifecycle state mirrored into the health snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Booting.
    Starting,
    /// Accepting work.
    Ready,
    /// Finishing in-flight work.
    Draining,
    /// Shutdown completed.
    Stopped,
}

impl HealthState {
    /// Status text written to the snapshot.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Only `ready` admits traffic.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: &'static str,
    ready: bool,
    pid: u32,
    capability_level: CapabilityLevel,
    updated_at_ms: u128,
}

/// Who holds an existing lock file.
#[derive(Debug, PartialEq, Eq)]
enum Holder {
    Alive(u32),
    Gone(Option<u32>),
}

fn take_lock(paths: &RuntimePaths, pid: u32) -> Result<File, LaunchError> {
    let lock_path = paths.lock_path();
    for _ in 0..LOCK_ATTEMPTS {
        match create_lock(lock_path, pid) {
            Ok(file) => {
                info!(target: PROCESS_TARGET, file = %lock_path.display(), "state directory claimed");
                return Ok(file);
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(LaunchError::LockCreate {
                    path: lock_path.to_path_buf(),
                    source,
                });
            }
        }
        match holder(paths)? {
            Holder::Alive(holder) => {
                info!(target: PROCESS_TARGET, pid = holder, "refusing to start: engine alive");
                return Err(LaunchError::AlreadyRunning { pid: holder });
            }
            Holder::Gone(stale) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid = ?stale,
                    "previous engine is gone; clearing its runtime files"
                );
                clear(paths.lock_path())?;
                clear(paths.pid_path())?;
            }
        }
    }
    Err(LaunchError::LockContended {
        path: lock_path.to_path_buf(),
    })
}

fn create_lock(path: &Path, pid: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    writeln!(file, "{pid}")?;
    Ok(file)
}

fn holder(paths: &RuntimePaths) -> Result<Holder, LaunchError> {
    let recorded = read_pid(paths.pid_path()).or_else(|| read_pid(paths.lock_path()));
    match recorded {
        Some(pid) if pid == std::process::id() => Ok(Holder::Alive(pid)),
        Some(pid) if pid != 0 && is_alive(pid)? => Ok(Holder::Alive(pid)),
        other => Ok(Holder::Gone(other)),
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn clear(path: &Path) -> Result<(), LaunchError> {
    remove_if_present(path).map_err(|source| LaunchError::Cleanup {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn is_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(LaunchError::CheckProcess { pid, source: errno }),
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_config::{Config, ServiceDeclaration, ServiceKind};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use url::Url;

    struct StateDir {
        _dir: TempDir,
        paths: RuntimePaths,
    }

    #[fixture]
    fn state_dir() -> StateDir {
        let dir = TempDir::new().expect("temp dir");
        let endpoint = |port: u16| Url::parse(&format!("tcp://127.0.0.1:{port}")).expect("url");
        let config = Config {
            state_dir: camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
                .expect("utf-8 temp dir"),
            services: vec![
                ServiceDeclaration::required("ledger", ServiceKind::Ledger, endpoint(1)),
                ServiceDeclaration::required("cache", ServiceKind::Cache, endpoint(2)),
                ServiceDeclaration::required("registry", ServiceKind::Registry, endpoint(3)),
                ServiceDeclaration::required("blob", ServiceKind::Blob, endpoint(4)),
            ],
            ..Config::default()
        };
        let validated = config.validate().expect("valid config");
        let paths = RuntimePaths::from_config(&validated).expect("runtime paths");
        StateDir { _dir: dir, paths }
    }

    #[rstest]
    fn a_second_claim_in_the_same_process_is_refused(state_dir: StateDir) {
        let _first = RuntimeClaim::take(state_dir.paths.clone(), CapabilityLevel::Baseline)
            .expect("first claim");

        let second = RuntimeClaim::take(state_dir.paths.clone(), CapabilityLevel::Baseline);

        assert!(matches!(
            second,
            Err(LaunchError::AlreadyRunning { pid }) if pid == std::process::id()
        ));
    }

    #[rstest]
    #[case(b"0\n".as_slice())]
    #[case(b"not a pid".as_slice())]
    fn stale_claims_are_cleared(state_dir: StateDir, #[case] recorded: &[u8]) {
        let paths = &state_dir.paths;
        fs::write(paths.lock_path(), b"").expect("stale lock");
        fs::write(paths.pid_path(), recorded).expect("stale pid");

        let claim = RuntimeClaim::take(paths.clone(), CapabilityLevel::Baseline).expect("claim");

        assert_eq!(read_pid(paths.pid_path()), Some(std::process::id()));
        drop(claim);
        assert!(!paths.lock_path().exists());
        assert!(!paths.pid_path().exists());
    }

    #[rstest]
    fn the_health_snapshot_outlives_the_claim(state_dir: StateDir) {
        let paths = &state_dir.paths;
        let claim = RuntimeClaim::take(paths.clone(), CapabilityLevel::Advanced).expect("claim");
        claim.publish(HealthState::Stopped).expect("health");
        drop(claim);

        let snapshot: serde_json::Value =
            serde_json::from_slice(&fs::read(paths.health_path()).expect("read health"))
                .expect("json");
        assert_eq!(snapshot["status"], "stopped");
        assert_eq!(snapshot["ready"], false);
        assert_eq!(snapshot["capability_level"], "advanced");
        assert_eq!(snapshot["pid"], std::process::id());
    }
}
