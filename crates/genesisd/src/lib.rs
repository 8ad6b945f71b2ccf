//! Boot sequencing and lifecycle governance for the Genesis engine.
//!
//! The engine takes a process from cold start to a state where it may accept
//! work, and governs its shutdown and its recovery from an unclean
//! termination. Boot is one ordered pipeline:
//!
//! 1. **Pre-boot gate**: configuration is loaded and validated, then every
//!    declared backing service gets one authenticated connectivity probe. The
//!    first failure halts boot with `pre-boot check failed: <component>:
//!    <reason>`.
//! 2. **Capability registry**: verified clients are wrapped in providers in
//!    the order fixed by a static dependency graph. Upper layers only ever see
//!    [`CapabilityHandle`]s; a capability whose service did not pass is
//!    reported as [`Capability::Absent`].
//! 3. **Journal**: a write-ahead log of operation intents, checkpointed and
//!    compacted on shutdown and replayed on recovery.
//! 4. **Lifecycle hooks**: `startup_begin`, `crash_detected`,
//!    `startup_complete`, and later `shutdown_begin` and
//!    `shutdown_complete`. The configured [`CapabilityLevel`] selects no-op
//!    or full hook bodies once per process.
//!
//! Health reporting hooks emit structured telemetry at each stage so an
//! operator can find the first failing check without reading a stack trace.
//!
//! [`CapabilityLevel`]: genesis_config::CapabilityLevel

mod bootstrap;
mod files;
mod gate;
mod health;
mod journal;
mod lifecycle;
mod probe;
mod process;
mod recovery;
mod registry;
pub mod telemetry;
pub mod wal;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Engine, EngineParts, ErrorCategory, StaticConfigLoader,
    SystemConfigLoader, bootstrap, bootstrap_with,
};
pub use gate::{GateClearance, PreBootError, PreBootGate};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use journal::{
    ArtifactRecord, Checkpoint, CheckpointInfo, CheckpointStore, DrainOutcome, Journal,
    JournalError, JournalState, Operation, OperationError, OperationRecord, OperationRequest,
    OperationStatus, OperationTracker,
};
pub use lifecycle::{
    FORCE_TERMINATED_REASON, Hook, HookError, IncompleteOperation, LifecycleDispatcher,
    LifecycleError, LifecycleState, PreviousShutdown, Readiness, ShutdownRecord,
    ShutdownRecordError, ShutdownRecordStore, ShutdownReport, ShutdownStatus,
};
pub use probe::{
    BackingClient, ClientError, Connector, NetworkConnector, ProbeFailure, ProbeOutcome,
    ProbeResult,
};
pub use process::{
    FORCED_EXIT_CODE, HealthState, LaunchError, LaunchPlan, ShutdownError, ShutdownSignal,
    SystemShutdownSignal, run_daemon, run_daemon_with,
};
pub use recovery::{
    NoResume, RECONCILED_REASON, RecoveryCoordinator, RecoveryError, RecoveryReport, Resumer,
};
pub use registry::{
    AbsentReason, Capability, CapabilityError, CapabilityHandle, CapabilityKind,
    CapabilityKindParseError, CapabilityProvider, CapabilityRegistry, CompositeProvider,
    ConstructionError, GraphError, PrimaryProvider, ProviderError, ProviderFactory,
    RuntimeCapabilityError, StandardProviders,
};

#[cfg(test)]
mod tests;
