//! Engine bootstrap orchestration.
//!
//! Boot is one ordered pipeline: load configuration, install telemetry,
//! pass the pre-boot gate, construct the capability registry, open the
//! journal, then run the startup hooks (including crash recovery). Any
//! failure ends the boot; nothing partially built is returned.

use std::sync::Arc;

use genesis_config::{Config, RuntimePaths, RuntimePathsError, ValidatedConfig};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::gate::{PreBootError, PreBootGate};
use crate::health::HealthReporter;
use crate::journal::{
    Journal, JournalError, JournalState, Operation, OperationError, OperationRequest,
    OperationTracker, begin_operation,
};
use crate::lifecycle::{
    HookContext, HookNotes, LifecycleDispatcher, LifecycleError, LifecycleState,
    PreviousShutdown, Readiness, ShutdownRecordStore, ShutdownReport,
};
use crate::probe::{Connector, NetworkConnector, ProbeResult};
use crate::recovery::{NoResume, RecoveryCoordinator, RecoveryReport, Resumer};
use crate::registry::{
    Capability, CapabilityKind, CapabilityRegistry, ConstructionError, ProviderFactory,
    StandardProviders,
};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the engine configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a configuration loaded earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already loaded configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Swappable collaborators behind the boot pipeline.
pub struct EngineParts {
    /// Opens backing-service clients for the gate.
    pub connector: Box<dyn Connector>,
    /// Builds capability providers from verified clients.
    pub factory: Box<dyn ProviderFactory>,
    /// Finishes interrupted operations during crash recovery.
    pub resumer: Arc<dyn Resumer>,
}

impl EngineParts {
    /// Network connector, standard providers and no resumer.
    #[must_use]
    pub fn production() -> Self {
        Self {
            connector: Box::new(NetworkConnector),
            factory: Box::new(StandardProviders),
            resumer: Arc::new(NoResume),
        }
    }
}

impl std::fmt::Debug for EngineParts {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("EngineParts").finish_non_exhaustive()
    }
}

/// Coarse classification of boot failures, used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or missing configuration.
    Configuration,
    /// A required backing service failed its probe.
    Connectivity,
    /// A capability graph node failed to build.
    Construction,
    /// The log or the state rebuilt from it cannot be trusted.
    Replay,
    /// Anything else.
    Other,
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("pre-boot check failed: configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Validation or a connectivity probe failed.
    #[error(transparent)]
    PreBoot(#[from] PreBootError),
    /// The state directory could not be prepared.
    #[error("failed to prepare runtime paths: {source}")]
    Runtime {
        /// Underlying filesystem error.
        #[source]
        source: RuntimePathsError,
    },
    /// A capability failed to construct.
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    /// The journal could not be opened.
    #[error("failed to open the journal: {source}")]
    Journal {
        /// Underlying journal error.
        #[source]
        source: JournalError,
    },
    /// A startup hook or the shutdown record failed.
    #[error("startup failed: {source}")]
    Lifecycle {
        /// Underlying lifecycle error.
        #[source]
        source: LifecycleError,
    },
}

impl BootstrapError {
    /// Taxonomy bucket for this failure.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::PreBoot(PreBootError::Configuration { .. }) => {
                ErrorCategory::Configuration
            }
            Self::PreBoot(PreBootError::Connectivity { .. }) => ErrorCategory::Connectivity,
            Self::Construction(_) => ErrorCategory::Construction,
            Self::Journal { source } if source.as_replay().is_some() => ErrorCategory::Replay,
            Self::Lifecycle { source } if source.is_replay() => ErrorCategory::Replay,
            Self::Telemetry { .. }
            | Self::Runtime { .. }
            | Self::Journal { .. }
            | Self::Lifecycle { .. } => ErrorCategory::Other,
        }
    }
}

/// A booted engine: capabilities constructed, journal open, lifecycle at
/// `ready`.
pub struct Engine {
    config: ValidatedConfig,
    paths: RuntimePaths,
    registry: CapabilityRegistry,
    journal: Arc<Journal>,
    tracker: Arc<OperationTracker>,
    recovery: RecoveryCoordinator,
    dispatcher: LifecycleDispatcher,
    notes: HookNotes,
    reporter: Arc<dyn HealthReporter>,
    telemetry: TelemetryHandle,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("state", &self.dispatcher.state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validated configuration.
    #[must_use]
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Runtime file locations.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.dispatcher.state()
    }

    /// Readiness signal; cloneable for health endpoints.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.dispatcher.readiness()
    }

    /// Looks up one capability.
    #[must_use]
    pub fn capability(&self, kind: CapabilityKind) -> Capability {
        self.registry.capability(kind)
    }

    /// Every capability, present or absent, in construction order.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        self.registry.capabilities()
    }

    /// Probe results from this boot's gate.
    #[must_use]
    pub fn probe_results(&self) -> &[ProbeResult] {
        self.registry.probe_results()
    }

    /// How the previous process ended.
    #[must_use]
    pub const fn previous_shutdown(&self) -> Option<&PreviousShutdown> {
        self.dispatcher.previous()
    }

    /// What crash recovery did, when it ran.
    #[must_use]
    pub const fn recovery_report(&self) -> Option<&RecoveryReport> {
        self.notes.recovery.as_ref()
    }

    /// Admits an operation and journals its begin intent.
    pub fn begin_operation(&self, request: OperationRequest) -> Result<Operation, OperationError> {
        begin_operation(&self.journal, &self.tracker, request)
    }

    /// Number of operations currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.tracker.in_flight_count()
    }

    /// Copy of the current journal state.
    pub fn journal_state(&self) -> Result<JournalState, JournalError> {
        self.journal.snapshot()
    }

    /// Telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Drains, checkpoints and releases every capability.
    ///
    /// On failure the lifecycle is marked crashed and the shutdown record
    /// is left non-graceful, so the next boot recovers.
    pub fn shutdown(mut self) -> Result<ShutdownReport, LifecycleError> {
        let outcome = self.with_context(|dispatcher, ctx| {
            dispatcher.begin_shutdown(ctx)?;
            dispatcher.complete_shutdown(ctx)
        });
        match outcome {
            Ok(report) => {
                self.reporter.shutdown_completed(&report);
                Ok(report)
            }
            Err(error) => {
                self.dispatcher.mark_crashed();
                Err(error)
            }
        }
    }

    fn start(&mut self) -> Result<(), LifecycleError> {
        self.with_context(|dispatcher, ctx| {
            dispatcher.begin_startup(ctx)?;
            dispatcher.complete_startup(ctx)
        })
    }

    fn with_context<T>(
        &mut self,
        step: impl FnOnce(&mut LifecycleDispatcher, &mut HookContext<'_>) -> T,
    ) -> T {
        let Self {
            config,
            registry,
            journal,
            tracker,
            recovery,
            dispatcher,
            notes,
            reporter,
            ..
        } = self;
        let mut ctx = HookContext {
            config,
            journal,
            tracker,
            registry,
            recovery,
            reporter: reporter.as_ref(),
            notes,
        };
        step(dispatcher, &mut ctx)
    }
}

/// Boots the engine with the production collaborators.
pub fn bootstrap(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Engine, BootstrapError> {
    bootstrap_with(loader, reporter, EngineParts::production())
}

/// Boots the engine using the supplied collaborators.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    parts: EngineParts,
) -> Result<Engine, BootstrapError> {
    reporter.boot_starting();
    let booted = boot(loader, &reporter, parts);
    if let Err(error) = &booted {
        reporter.boot_failed(error);
    }
    booted
}

fn boot(
    loader: &dyn ConfigLoader,
    reporter: &Arc<dyn HealthReporter>,
    parts: EngineParts,
) -> Result<Engine, BootstrapError> {
    let EngineParts {
        connector,
        factory,
        resumer,
    } = parts;
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let clearance = PreBootGate::new(connector.as_ref(), reporter.as_ref()).run(&config)?;
    let validated = clearance.config().clone();
    let paths = RuntimePaths::from_config(&validated)
        .map_err(|source| BootstrapError::Runtime { source })?;
    let registry = CapabilityRegistry::build(clearance, factory.as_ref(), reporter.as_ref())?;
    let journal = Journal::open(paths.wal_path(), paths.checkpoint_path())
        .map_err(|source| BootstrapError::Journal { source })?;

    let mut engine = Engine {
        recovery: RecoveryCoordinator::new(validated.reconcile_policy(), resumer),
        dispatcher: LifecycleDispatcher::new(
            validated.capability_level(),
            ShutdownRecordStore::new(paths.shutdown_record_path()),
        ),
        config: validated,
        paths,
        registry,
        journal: Arc::new(journal),
        tracker: Arc::new(OperationTracker::new()),
        notes: HookNotes::default(),
        reporter: Arc::clone(reporter),
        telemetry,
    };
    if let Err(source) = engine.start() {
        engine.dispatcher.mark_crashed();
        return Err(BootstrapError::Lifecycle { source });
    }
    Ok(engine)
}
