//! Test harness utilities shared by the behavioural and unit suites.

mod config_loader;
mod connector;
mod factory;
mod reporter;
mod shutdown;
mod world;

pub use config_loader::{MANDATORY_SERVICES, TestConfigLoader};
pub use connector::MemoryConnector;
pub use factory::FailingFactory;
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use shutdown::{ForcedExitSignal, TestShutdownSignal};
pub use world::{TestWorld, world};
