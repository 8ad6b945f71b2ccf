//! The capability registry.
//!
//! The registry is the only owner of verified backing-service clients.
//! Everything above it receives [`CapabilityHandle`]s, which carry a shared
//! provider but never the client itself. A handle exists for a primary
//! capability if and only if its backing service passed its probe; anything
//! else is reported as [`Capability::Absent`] with the reason.

mod graph;
mod provider;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use genesis_config::{ServiceKind, ValidatedConfig};
use thiserror::Error;
use tracing::info;

pub use graph::{CapabilityKind, CapabilityKindParseError, GraphError};
pub use provider::{
    CapabilityError, CapabilityProvider, CompositeProvider, PrimaryProvider, ProviderError,
    ProviderFactory, StandardProviders,
};

use crate::gate::{GateClearance, LiveService};
use crate::health::HealthReporter;
use crate::probe::ProbeResult;

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Opaque, cloneable reference to one constructed capability.
#[derive(Clone)]
pub struct CapabilityHandle {
    kind: CapabilityKind,
    service: Option<String>,
    provider: Arc<dyn CapabilityProvider>,
}

impl CapabilityHandle {
    /// Capability this handle exposes.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Declared name of the backing service; `None` for composites.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Forwards `request` to the provider.
    pub fn invoke(&self, request: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        self.provider.invoke(request)
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CapabilityHandle")
            .field("kind", &self.kind)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Why a capability has no handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsentReason {
    /// No service of the backing kind was declared.
    NotDeclared,
    /// The backing service was declared optional and failed its probe.
    ProbeFailed {
        /// Declared service name.
        service: String,
        /// Probe failure reason.
        reason: String,
    },
    /// A capability this one depends on is absent.
    DependencyAbsent(CapabilityKind),
    /// The registry has been torn down.
    Released,
}

impl fmt::Display for AbsentReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDeclared => formatter.write_str("no backing service declared"),
            Self::ProbeFailed { service, reason } => {
                write!(formatter, "service {service} failed its probe: {reason}")
            }
            Self::DependencyAbsent(kind) => write!(formatter, "dependency {kind} is absent"),
            Self::Released => formatter.write_str("released during shutdown"),
        }
    }
}

/// A capability as seen by callers: present with a handle, or explicitly
/// absent.
#[derive(Debug, Clone)]
pub enum Capability {
    /// The capability was constructed.
    Present(CapabilityHandle),
    /// The capability was not constructed.
    Absent {
        /// Capability that is missing.
        kind: CapabilityKind,
        /// Why it is missing.
        reason: AbsentReason,
    },
}

impl Capability {
    /// Returns the handle or fails loudly; absence is never papered over.
    pub fn require(&self) -> Result<&CapabilityHandle, RuntimeCapabilityError> {
        match self {
            Self::Present(handle) => Ok(handle),
            Self::Absent { kind, reason } => Err(RuntimeCapabilityError::Absent {
                kind: *kind,
                reason: reason.clone(),
            }),
        }
    }

    /// Returns `true` when a handle is available.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Capability kind.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        match self {
            Self::Present(handle) => handle.kind,
            Self::Absent { kind, .. } => *kind,
        }
    }
}

/// Use of a capability that is not available.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeCapabilityError {
    /// The capability was never constructed.
    #[error("capability {kind} is absent: {reason}")]
    Absent {
        /// Capability requested.
        kind: CapabilityKind,
        /// Why it is absent.
        reason: AbsentReason,
    },
}

/// A graph node failed to build. No partially built registry escapes.
#[derive(Debug, Error)]
#[error("capability {node} failed to construct: {reason}")]
pub struct ConstructionError {
    /// Node that failed.
    pub node: CapabilityKind,
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConstructionError {
    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.reason.as_str()
    }

    fn from_graph(error: GraphError) -> Self {
        Self {
            node: error.node().unwrap_or(CapabilityKind::DurableLedger),
            reason: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    fn from_provider(node: CapabilityKind, error: ProviderError) -> Self {
        let (reason, source) = error.into_parts();
        Self {
            node,
            reason,
            source,
        }
    }
}

/// Constructed capabilities, in construction order.
pub struct CapabilityRegistry {
    config: ValidatedConfig,
    probe_results: Vec<ProbeResult>,
    entries: Vec<Capability>,
    torn_down: bool,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CapabilityRegistry")
            .field("entries", &self.entries)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl CapabilityRegistry {
    /// Builds every node of the dependency graph from the gate's verified
    /// clients.
    ///
    /// On the first construction failure the nodes already built are torn
    /// down in reverse order, unused clients are closed, and the failing
    /// node is reported.
    pub fn build(
        clearance: GateClearance,
        factory: &dyn ProviderFactory,
        reporter: &dyn HealthReporter,
    ) -> Result<Self, ConstructionError> {
        let order = graph::construction_order(graph::NODES).map_err(ConstructionError::from_graph)?;
        let (config, probe_results, mut live) = clearance.into_parts();
        let mut registry = Self {
            config,
            probe_results,
            entries: Vec::with_capacity(order.len()),
            torn_down: false,
        };

        for kind in order {
            let built = match kind.backing_service() {
                Some(service_kind) => {
                    registry.build_primary(kind, service_kind, &mut live, factory)
                }
                None => registry.build_composite(kind, factory),
            };
            match built {
                Ok(capability) => {
                    match &capability {
                        Capability::Present(handle) => {
                            reporter.capability_constructed(kind, handle.service());
                        }
                        Capability::Absent { reason, .. } => {
                            reporter.capability_absent(kind, reason);
                        }
                    }
                    registry.entries.push(capability);
                }
                Err(error) => {
                    close_unused(&mut live);
                    registry.teardown();
                    return Err(error);
                }
            }
        }
        close_unused(&mut live);
        Ok(registry)
    }

    fn build_primary(
        &self,
        kind: CapabilityKind,
        service_kind: ServiceKind,
        live: &mut BTreeMap<ServiceKind, LiveService>,
        factory: &dyn ProviderFactory,
    ) -> Result<Capability, ConstructionError> {
        let Some(LiveService {
            declaration,
            client,
        }) = live.remove(&service_kind)
        else {
            let reason = self
                .probe_results
                .iter()
                .find(|result| result.kind == service_kind)
                .map_or(AbsentReason::NotDeclared, |result| AbsentReason::ProbeFailed {
                    service: result.service.clone(),
                    reason: result.failure_reason().unwrap_or("not verified").to_owned(),
                });
            return Ok(Capability::Absent { kind, reason });
        };
        let provider = factory
            .primary(kind, &declaration, client)
            .map_err(|error| ConstructionError::from_provider(kind, error))?;
        Ok(Capability::Present(CapabilityHandle {
            kind,
            service: Some(declaration.name),
            provider,
        }))
    }

    fn build_composite(
        &self,
        kind: CapabilityKind,
        factory: &dyn ProviderFactory,
    ) -> Result<Capability, ConstructionError> {
        let mut members = Vec::new();
        for dependency in kind.dependencies() {
            match self.capability(*dependency) {
                Capability::Present(handle) => members.push(handle),
                Capability::Absent { .. } => {
                    return Ok(Capability::Absent {
                        kind,
                        reason: AbsentReason::DependencyAbsent(*dependency),
                    });
                }
            }
        }
        let provider = factory
            .composite(kind, members)
            .map_err(|error| ConstructionError::from_provider(kind, error))?;
        Ok(Capability::Present(CapabilityHandle {
            kind,
            service: None,
            provider,
        }))
    }

    /// Looks up a capability. Unknown or torn-down capabilities are absent.
    #[must_use]
    pub fn capability(&self, kind: CapabilityKind) -> Capability {
        if self.torn_down {
            return Capability::Absent {
                kind,
                reason: AbsentReason::Released,
            };
        }
        self.entries
            .iter()
            .find(|entry| entry.kind() == kind)
            .cloned()
            .unwrap_or(Capability::Absent {
                kind,
                reason: AbsentReason::NotDeclared,
            })
    }

    /// Every present handle, in construction order.
    pub fn handles(&self) -> impl Iterator<Item = &CapabilityHandle> {
        self.entries.iter().filter_map(|entry| match entry {
            Capability::Present(handle) => Some(handle),
            Capability::Absent { .. } => None,
        })
    }

    /// Every capability, present or absent, in construction order.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.entries
    }

    /// Validated configuration the registry was built from.
    #[must_use]
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Probe results from the gate that cleared this registry.
    #[must_use]
    pub fn probe_results(&self) -> &[ProbeResult] {
        &self.probe_results
    }

    /// Returns `true` once [`CapabilityRegistry::teardown`] has run.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Shuts providers down in reverse construction order. Idempotent;
    /// returns the number of providers released by this call.
    pub fn teardown(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        let mut released = 0;
        for entry in self.entries.iter().rev() {
            if let Capability::Present(handle) = entry {
                handle.provider.shutdown();
                released += 1;
            }
        }
        info!(
            target: REGISTRY_TARGET,
            released,
            "capability registry torn down"
        );
        released
    }
}

impl Drop for CapabilityRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn close_unused(live: &mut BTreeMap<ServiceKind, LiveService>) {
    for (_, mut service) in std::mem::take(live) {
        service.client.close();
    }
}
