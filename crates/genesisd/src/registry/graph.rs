//! The statically declared capability dependency graph.
//!
//! Construction order is derived from [`NODES`] alone. Nothing is inferred
//! at runtime, so the order is stable across releases and checked by tests.

use std::collections::BTreeSet;

use genesis_config::ServiceKind;
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use self::CapabilityKind as K;

/// Capabilities the registry can construct.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    IntoStaticStr,
    EnumIter,
    EnumCount,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CapabilityKind {
    /// Append-only business state, backed by the ledger store.
    DurableLedger,
    /// Work queue, backed by the cache.
    WorkQueue,
    /// Identity lookups, backed by the registry store.
    IdentityRegistry,
    /// Blob storage.
    BlobStorage,
    /// Service discovery.
    ServiceDiscovery,
    /// Search index.
    SearchIndex,
    /// Analytical queries.
    Analytics,
    /// Telemetry sink.
    TelemetrySink,
    /// Auxiliary inference backend.
    Inference,
    /// Artifacts recorded in the ledger with content in blob storage.
    ArtifactCatalog,
    /// Session lookups combining identity, queue and ledger.
    SessionDirectory,
}

impl CapabilityKind {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Service kind backing a primitive capability; `None` for composites.
    #[must_use]
    pub const fn backing_service(self) -> Option<ServiceKind> {
        match self {
            Self::DurableLedger => Some(ServiceKind::Ledger),
            Self::WorkQueue => Some(ServiceKind::Cache),
            Self::IdentityRegistry => Some(ServiceKind::Registry),
            Self::BlobStorage => Some(ServiceKind::Blob),
            Self::ServiceDiscovery => Some(ServiceKind::Discovery),
            Self::SearchIndex => Some(ServiceKind::Search),
            Self::Analytics => Some(ServiceKind::Analytics),
            Self::TelemetrySink => Some(ServiceKind::Telemetry),
            Self::Inference => Some(ServiceKind::Inference),
            Self::ArtifactCatalog | Self::SessionDirectory => None,
        }
    }

    /// Capabilities that must be present before this one is built.
    #[must_use]
    pub fn dependencies(self) -> &'static [Self] {
        NODES
            .iter()
            .find(|node| node.kind == self)
            .map_or(&[], |node| node.depends_on)
    }
}

/// Error returned when parsing a capability kind fails.
pub type CapabilityKindParseError = strum::ParseError;

/// One node of the construction graph.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphNode {
    pub(crate) kind: CapabilityKind,
    pub(crate) depends_on: &'static [CapabilityKind],
}

const fn node(kind: CapabilityKind, depends_on: &'static [CapabilityKind]) -> GraphNode {
    GraphNode { kind, depends_on }
}

/// Ledger-backed state first, registry-backed lookups next, composites last.
pub(crate) const NODES: &[GraphNode] = &[
    node(K::DurableLedger, &[]),
    node(K::WorkQueue, &[]),
    node(K::IdentityRegistry, &[K::DurableLedger]),
    node(K::BlobStorage, &[]),
    node(K::ServiceDiscovery, &[]),
    node(K::SearchIndex, &[]),
    node(K::Analytics, &[]),
    node(K::TelemetrySink, &[]),
    node(K::Inference, &[]),
    node(K::ArtifactCatalog, &[K::DurableLedger, K::BlobStorage]),
    node(
        K::SessionDirectory,
        &[K::IdentityRegistry, K::WorkQueue, K::DurableLedger],
    ),
];

/// Defects in a graph declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A node depends on a capability that is not declared.
    #[error("{node} depends on undeclared capability {dependency}")]
    UnknownDependency {
        /// Node declaring the dependency.
        node: CapabilityKind,
        /// Missing dependency.
        dependency: CapabilityKind,
    },
    /// The declaration contains a cycle.
    #[error("dependency cycle among {}", render(.remaining))]
    Cycle {
        /// Nodes that could not be ordered.
        remaining: Vec<CapabilityKind>,
    },
}

impl GraphError {
    /// Node the error is attributed to.
    #[must_use]
    pub fn node(&self) -> Option<CapabilityKind> {
        match self {
            Self::UnknownDependency { node, .. } => Some(*node),
            Self::Cycle { remaining } => remaining.first().copied(),
        }
    }
}

fn render(kinds: &[CapabilityKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Orders `nodes` so every dependency precedes its dependants.
///
/// Kahn's algorithm; among nodes that are ready at the same time the one
/// declared first is built first.
pub(crate) fn construction_order(nodes: &[GraphNode]) -> Result<Vec<CapabilityKind>, GraphError> {
    let declared: BTreeSet<CapabilityKind> = nodes.iter().map(|node| node.kind).collect();
    for node in nodes {
        if let Some(dependency) = node
            .depends_on
            .iter()
            .find(|dependency| !declared.contains(dependency))
        {
            return Err(GraphError::UnknownDependency {
                node: node.kind,
                dependency: *dependency,
            });
        }
    }

    // Unplaced nodes in declaration order, each with its count of unbuilt
    // dependencies.
    let mut waiting: Vec<(&GraphNode, usize)> = nodes
        .iter()
        .map(|node| (node, node.depends_on.len()))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = waiting.iter().position(|(_, unbuilt)| *unbuilt == 0) {
        let (built, _) = waiting.remove(next);
        order.push(built.kind);
        for (node, unbuilt) in &mut waiting {
            let satisfied = node.depends_on.iter().filter(|dep| **dep == built.kind).count();
            *unbuilt = unbuilt.saturating_sub(satisfied);
        }
    }

    if waiting.is_empty() {
        Ok(order)
    } else {
        let remaining = waiting.into_iter().map(|(node, _)| node.kind).collect();
        Err(GraphError::Cycle { remaining })
    }
}
