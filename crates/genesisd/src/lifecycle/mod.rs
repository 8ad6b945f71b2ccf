//! Lifecycle state machine and hook dispatch.
//!
//! The dispatcher owns the process lifecycle state and the readiness flag.
//! It fires the five hooks at fixed points and keeps the shutdown record in
//! step with the state, so crash detection works at either capability
//! level.

mod hooks;
mod record;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use genesis_config::CapabilityLevel;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;
use tracing::{error, info};

pub use hooks::{FORCE_TERMINATED_REASON, HookError};
pub(crate) use hooks::{HookContext, HookNotes};
pub use record::{
    IncompleteOperation, PreviousShutdown, ShutdownRecord, ShutdownRecordError,
    ShutdownRecordStore, ShutdownStatus,
};

use hooks::{AdvancedHooks, BaselineHooks, LifecycleHooks};

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Process lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing has started.
    Cold,
    /// Startup hooks and recovery are running.
    Starting,
    /// Work is admitted.
    Ready,
    /// Admission is closed and in-flight work is finishing.
    Draining,
    /// Shutdown completed.
    Stopped,
    /// An unhandled fault stopped the lifecycle.
    Crashed,
}

impl LifecycleState {
    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Cold, Self::Starting)
                | (Self::Starting, Self::Ready)
                | (Self::Ready, Self::Draining)
                | (Self::Draining, Self::Stopped)
                | (Self::Starting | Self::Ready | Self::Draining, Self::Crashed)
        )
    }
}

/// The five lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Hook {
    /// Fired on entering `starting`.
    StartupBegin,
    /// Fired just before readiness flips true.
    StartupComplete,
    /// Fired on entering `draining`.
    ShutdownBegin,
    /// Fired once draining has finished.
    ShutdownComplete,
    /// Fired during startup when the previous process died.
    CrashDetected,
}

/// Errors raised by the dispatcher.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A transition the state machine does not allow was attempted.
    #[error("illegal lifecycle transition from {from} to {to}")]
    IllegalTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
    /// A hook body failed.
    #[error("{hook} hook failed: {source}")]
    Hook {
        /// Hook that failed.
        hook: Hook,
        /// Failure.
        #[source]
        source: HookError,
    },
    /// The shutdown record could not be read or written.
    #[error(transparent)]
    ShutdownRecord(#[from] ShutdownRecordError),
}

impl LifecycleError {
    /// Returns `true` when the failure means persisted state cannot be
    /// trusted.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Hook { source, .. } if source.is_replay())
    }
}

/// Shared view of the readiness signal.
///
/// True only between `startup_complete` and `shutdown_begin`.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// Returns `true` while the engine accepts work.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

/// Work left over when shutdown completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Operations force-terminated or still running.
    pub incomplete: Vec<IncompleteOperation>,
    /// Sequence of the shutdown checkpoint, when one was written.
    pub checkpoint_sequence: Option<u64>,
    /// Capability providers released.
    pub released: usize,
}

/// Owns the lifecycle state and fires hooks.
pub struct LifecycleDispatcher {
    state: LifecycleState,
    level: CapabilityLevel,
    readiness: Readiness,
    hooks: Box<dyn LifecycleHooks>,
    records: ShutdownRecordStore,
    previous: Option<PreviousShutdown>,
}

impl fmt::Debug for LifecycleDispatcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LifecycleDispatcher")
            .field("state", &self.state)
            .field("level", &self.level)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

impl LifecycleDispatcher {
    /// Builds a dispatcher in `cold`. Hook bodies are fixed here for the
    /// lifetime of the process.
    pub(crate) fn new(level: CapabilityLevel, records: ShutdownRecordStore) -> Self {
        let hooks: Box<dyn LifecycleHooks> = match level {
            CapabilityLevel::Baseline => Box::new(BaselineHooks),
            CapabilityLevel::Advanced => Box::new(AdvancedHooks),
        };
        Self {
            state: LifecycleState::Cold,
            level,
            readiness: Readiness::default(),
            hooks,
            records,
            previous: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Readiness signal shared with observers.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// How the previous process ended; known once startup has begun.
    #[must_use]
    pub const fn previous(&self) -> Option<&PreviousShutdown> {
        self.previous.as_ref()
    }

    /// `cold → starting`: records `running`, fires `startup_begin`, then
    /// `crash_detected` when the previous process died.
    pub(crate) fn begin_startup(&mut self, ctx: &mut HookContext<'_>) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Starting)?;
        let previous = self.records.previous()?;
        self.persist(ShutdownStatus::Running, Vec::new(), None)?;
        self.fire(Hook::StartupBegin, ctx, |hooks, ctx| hooks.startup_begin(ctx))?;
        if previous.is_crash() {
            ctx.reporter.crash_detected(&previous);
            self.fire(Hook::CrashDetected, ctx, |hooks, ctx| {
                hooks.crash_detected(ctx, &previous)
            })?;
        }
        self.previous = Some(previous);
        Ok(())
    }

    /// `starting → ready`: fires `startup_complete`, opens admission and
    /// raises readiness.
    pub(crate) fn complete_startup(
        &mut self,
        ctx: &mut HookContext<'_>,
    ) -> Result<(), LifecycleError> {
        self.ensure_can_become(LifecycleState::Ready)?;
        self.fire(Hook::StartupComplete, ctx, |hooks, ctx| {
            hooks.startup_complete(ctx)
        })?;
        self.transition(LifecycleState::Ready)?;
        ctx.tracker.open_admission();
        self.readiness.set(true);
        ctx.reporter.ready(ctx.config);
        Ok(())
    }

    /// `ready → draining`: lowers readiness, records `draining`, closes
    /// admission and fires `shutdown_begin`.
    pub(crate) fn begin_shutdown(&mut self, ctx: &mut HookContext<'_>) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Draining)?;
        self.readiness.set(false);
        ctx.reporter.shutdown_begun();
        self.persist(ShutdownStatus::Draining, Vec::new(), None)?;
        ctx.tracker.close_admission();
        self.fire(Hook::ShutdownBegin, ctx, |hooks, ctx| hooks.shutdown_begin(ctx))
    }

    /// `draining → stopped`: fires `shutdown_complete`, releases every
    /// capability and records `graceful`.
    pub(crate) fn complete_shutdown(
        &mut self,
        ctx: &mut HookContext<'_>,
    ) -> Result<ShutdownReport, LifecycleError> {
        self.ensure_can_become(LifecycleState::Stopped)?;
        self.fire(Hook::ShutdownComplete, ctx, |hooks, ctx| {
            hooks.shutdown_complete(ctx)
        })?;
        ctx.notes.released += ctx.registry.teardown();

        let mut incomplete = std::mem::take(&mut ctx.notes.incomplete);
        incomplete.extend(
            ctx.tracker
                .in_flight()
                .into_iter()
                .map(|(id, description)| IncompleteOperation { id, description }),
        );
        let checkpoint_sequence = ctx.notes.checkpoint.map(|info| info.through_sequence);
        self.persist(
            ShutdownStatus::Graceful,
            incomplete.clone(),
            checkpoint_sequence,
        )?;
        self.transition(LifecycleState::Stopped)?;
        Ok(ShutdownReport {
            incomplete,
            checkpoint_sequence,
            released: ctx.notes.released,
        })
    }

    /// Moves to `crashed` after an unhandled fault. The shutdown record is
    /// left as it is, so the next boot detects the crash.
    pub(crate) fn mark_crashed(&mut self) {
        if self.state.can_become(LifecycleState::Crashed) {
            error!(
                target: LIFECYCLE_TARGET,
                from = %self.state,
                "lifecycle crashed"
            );
            self.state = LifecycleState::Crashed;
        }
        self.readiness.set(false);
    }

    fn fire(
        &self,
        hook: Hook,
        ctx: &mut HookContext<'_>,
        body: impl FnOnce(&dyn LifecycleHooks, &mut HookContext<'_>) -> Result<(), HookError>,
    ) -> Result<(), LifecycleError> {
        let outcome = body(self.hooks.as_ref(), ctx);
        ctx.reporter.hook_fired(hook, self.level);
        outcome.map_err(|source| LifecycleError::Hook { hook, source })
    }

    fn ensure_can_become(&self, to: LifecycleState) -> Result<(), LifecycleError> {
        if self.state.can_become(to) {
            Ok(())
        } else {
            Err(LifecycleError::IllegalTransition {
                from: self.state,
                to,
            })
        }
    }

    fn transition(&mut self, to: LifecycleState) -> Result<(), LifecycleError> {
        self.ensure_can_become(to)?;
        info!(
            target: LIFECYCLE_TARGET,
            from = %self.state,
            to = %to,
            "lifecycle transition"
        );
        self.state = to;
        Ok(())
    }

    fn persist(
        &self,
        status: ShutdownStatus,
        incomplete_operations: Vec<IncompleteOperation>,
        checkpoint_sequence: Option<u64>,
    ) -> Result<(), ShutdownRecordError> {
        let mut record = ShutdownRecord::new(status, self.level);
        record.incomplete_operations = incomplete_operations;
        record.checkpoint_sequence = checkpoint_sequence;
        self.records.persist(&record)
    }
}
