//! Process supervision: singleton lock, PID and health files, signals and
//! exit codes.

mod claim;
mod errors;
mod launch;
mod shutdown;

pub use claim::HealthState;
pub use errors::LaunchError;
pub use launch::{LaunchPlan, run_daemon, run_daemon_with};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Exit status used when a second termination signal cuts draining short.
pub const FORCED_EXIT_CODE: u8 = 130;
