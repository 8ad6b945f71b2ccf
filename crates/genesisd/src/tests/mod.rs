//! Test suites for engine boot, recovery and shutdown.

mod boot_behaviour;
mod recovery_behaviour;
mod support;
mod unit;
