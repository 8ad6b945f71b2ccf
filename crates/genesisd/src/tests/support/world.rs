//! BDD test world: owns a state directory and boots engines against it.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use genesis_config::RuntimePaths;
use tempfile::TempDir;

use crate::bootstrap::{BootstrapError, ConfigLoader, Engine, EngineParts, bootstrap_with};
use crate::journal::{Operation, OperationRecord, OperationRequest};
use crate::lifecycle::{
    LifecycleError, Readiness, ShutdownRecord, ShutdownRecordStore, ShutdownReport,
};
use crate::recovery::{NoResume, Resumer};
use crate::registry::{CapabilityKind, ProviderFactory, StandardProviders};
use crate::wal::OperationId;

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::connector::MemoryConnector;
use super::factory::FailingFactory;
use super::reporter::RecordingHealthReporter;

/// Resumer that finishes every operation offered to it.
struct ResumeEverything;

impl Resumer for ResumeEverything {
    fn resume(&self, _id: OperationId, _operation: &OperationRecord) -> Result<(), String> {
        Ok(())
    }
}

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    _state_dir: TempDir,
    loader: TestConfigLoader,
    failing_loader: bool,
    failing_node: Option<CapabilityKind>,
    resume_everything: bool,
    pub connector: MemoryConnector,
    pub reporter: Arc<RecordingHealthReporter>,
    engine: Option<Engine>,
    paths: Option<RuntimePaths>,
    boot_error: Option<BootstrapError>,
    shutdown: Option<Result<ShutdownReport, LifecycleError>>,
    operations: Vec<OperationId>,
    held: Vec<Operation>,
    workers: Vec<JoinHandle<Result<(), String>>>,
    readiness: Option<Readiness>,
}

impl TestWorld {
    /// Builds a baseline world over a fresh state directory.
    #[must_use]
    pub fn new() -> Self {
        let state_dir = TempDir::new().expect("failed to create temporary state directory");
        let loader = TestConfigLoader::new(state_dir.path());
        Self {
            _state_dir: state_dir,
            loader,
            failing_loader: false,
            failing_node: None,
            resume_everything: false,
            connector: MemoryConnector::default(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            engine: None,
            paths: None,
            boot_error: None,
            shutdown: None,
            operations: Vec::new(),
            held: Vec::new(),
            workers: Vec::new(),
            readiness: None,
        }
    }

    /// Rewrites the configuration used by later boots.
    pub fn configure(&mut self, change: impl FnOnce(TestConfigLoader) -> TestConfigLoader) {
        self.loader = change(self.loader.clone());
    }

    /// Makes configuration loading fail.
    pub const fn use_failing_loader(&mut self) {
        self.failing_loader = true;
    }

    /// Makes construction of `node` fail.
    pub const fn fail_construction_of(&mut self, node: CapabilityKind) {
        self.failing_node = Some(node);
    }

    /// Resumes every interrupted operation during recovery.
    pub const fn resume_everything(&mut self) {
        self.resume_everything = true;
    }

    /// Boots an engine, recording either the engine or the error. Each boot
    /// gets a fresh reporter.
    pub fn boot(&mut self) {
        self.reporter = Arc::new(RecordingHealthReporter::default());
        self.boot_error = None;
        self.shutdown = None;
        let factory: Box<dyn ProviderFactory> = match self.failing_node {
            Some(node) => Box::new(FailingFactory::new(node)),
            None => Box::new(StandardProviders),
        };
        let resumer: Arc<dyn Resumer> = if self.resume_everything {
            Arc::new(ResumeEverything)
        } else {
            Arc::new(NoResume)
        };
        let parts = EngineParts {
            connector: Box::new(self.connector.clone()),
            factory,
            resumer,
        };
        let loader: &dyn ConfigLoader = if self.failing_loader {
            &FailingConfigLoader
        } else {
            &self.loader
        };
        match bootstrap_with(loader, self.reporter.clone(), parts) {
            Ok(engine) => {
                self.paths = Some(engine.paths().clone());
                self.readiness = Some(engine.readiness());
                self.engine = Some(engine);
            }
            Err(error) => self.boot_error = Some(error),
        }
    }

    /// The running engine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.engine.as_ref().expect("engine should be running")
    }

    /// Error from the last boot, if it failed.
    #[must_use]
    pub const fn boot_error(&self) -> Option<&BootstrapError> {
        self.boot_error.as_ref()
    }

    /// Admits an operation and hands it to the caller.
    pub fn begin(&mut self, description: &str, resumable: bool) -> Operation {
        let request = OperationRequest::new(description);
        let request = if resumable { request.resumable() } else { request };
        let operation = self
            .engine()
            .begin_operation(request)
            .expect("operation should be admitted");
        self.operations.push(operation.id());
        operation
    }

    /// Admits an operation and leaves it running until the engine goes away.
    pub fn begin_and_hold(&mut self, description: &str, resumable: bool) {
        let operation = self.begin(description, resumable);
        self.held.push(operation);
    }

    /// Admits an operation that completes on another thread after `delay`.
    pub fn spawn_operation(&mut self, description: &str, delay: Duration) {
        let operation = self.begin(description, false);
        self.workers.push(thread::spawn(move || {
            thread::sleep(delay);
            operation
                .complete()
                .map(drop)
                .map_err(|error| error.to_string())
        }));
    }

    /// Waits for every spawned operation and returns the failures.
    pub fn join_workers(&mut self) -> Vec<String> {
        self.workers
            .drain(..)
            .filter_map(|worker| match worker.join() {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error),
                Err(_) => Some("operation thread panicked".to_owned()),
            })
            .collect()
    }

    /// Readiness signal of the last engine that booted.
    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        self.readiness.as_ref().expect("an engine should have booted")
    }

    /// Identifiers of every operation admitted, in order.
    #[must_use]
    pub fn operations(&self) -> &[OperationId] {
        &self.operations
    }

    /// Ends the engine the way a killed process would: no hooks, no
    /// shutdown record update.
    pub fn crash(&mut self) {
        // A killed process never journals its in-flight work as dropped.
        for operation in self.held.drain(..) {
            std::mem::forget(operation);
        }
        drop(self.engine.take());
    }

    /// Runs the shutdown sequence on the running engine.
    pub fn shut_down(&mut self) {
        let held = std::mem::take(&mut self.held);
        let engine = self.engine.take().expect("engine should be running");
        self.shutdown = Some(engine.shutdown());
        drop(held);
    }

    /// Report from the last shutdown.
    #[must_use]
    pub fn shutdown_report(&self) -> &ShutdownReport {
        match self.shutdown.as_ref() {
            Some(Ok(report)) => report,
            Some(Err(error)) => panic!("shutdown failed: {error}"),
            None => panic!("shutdown has not run"),
        }
    }

    /// Shutdown record as persisted in the state directory.
    #[must_use]
    pub fn shutdown_record(&self) -> ShutdownRecord {
        let paths = self.paths.as_ref().expect("an engine should have booted");
        ShutdownRecordStore::new(paths.shutdown_record_path())
            .load()
            .expect("shutdown record should be readable")
            .expect("shutdown record should exist")
    }

    /// Runtime paths of the last engine that booted.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        self.paths.as_ref().expect("an engine should have booted")
    }
}

/// Fresh world for one scenario.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
