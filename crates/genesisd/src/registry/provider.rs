//! Capability providers: the objects behind capability handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use genesis_config::ServiceDeclaration;
use thiserror::Error;
use tracing::debug;

use super::graph::CapabilityKind;
use super::{CapabilityHandle, REGISTRY_TARGET};
use crate::probe::{BackingClient, ClientError};

/// Behaviour exposed through a [`CapabilityHandle`].
///
/// Providers are shared between callers once the engine is ready and must
/// serialise access to their own resources.
pub trait CapabilityProvider: Send + Sync {
    /// Handles one request.
    fn invoke(&self, request: &[u8]) -> Result<Vec<u8>, CapabilityError>;

    /// Releases backing resources. Later invocations fail with
    /// [`CapabilityError::Released`].
    fn shutdown(&self);
}

/// Errors returned by capability invocations.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The backing service rejected or failed the request.
    #[error("{capability} request failed: {source}")]
    Client {
        /// Capability that failed.
        capability: CapabilityKind,
        /// Client failure.
        #[source]
        source: ClientError,
    },
    /// The capability was torn down.
    #[error("{0} has been released")]
    Released(CapabilityKind),
    /// A previous caller panicked while holding the provider lock.
    #[error("{0} is unusable after a panic in another caller")]
    Poisoned(CapabilityKind),
}

/// Failure reported by a [`ProviderFactory`].
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProviderError {
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        reason: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub(super) fn into_parts(
        self,
    ) -> (String, Option<Box<dyn std::error::Error + Send + Sync>>) {
        (self.reason, self.source)
    }
}

/// Builds providers for graph nodes.
pub trait ProviderFactory: Send + Sync {
    /// Wraps a verified client. On failure the factory must close `client`.
    fn primary(
        &self,
        kind: CapabilityKind,
        service: &ServiceDeclaration,
        client: Box<dyn BackingClient>,
    ) -> Result<Arc<dyn CapabilityProvider>, ProviderError>;

    /// Combines already-constructed dependencies.
    fn composite(
        &self,
        kind: CapabilityKind,
        members: Vec<CapabilityHandle>,
    ) -> Result<Arc<dyn CapabilityProvider>, ProviderError>;
}

/// Factory used by the daemon binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardProviders;

impl ProviderFactory for StandardProviders {
    fn primary(
        &self,
        kind: CapabilityKind,
        _service: &ServiceDeclaration,
        client: Box<dyn BackingClient>,
    ) -> Result<Arc<dyn CapabilityProvider>, ProviderError> {
        Ok(Arc::new(PrimaryProvider::new(kind, client)))
    }

    fn composite(
        &self,
        kind: CapabilityKind,
        members: Vec<CapabilityHandle>,
    ) -> Result<Arc<dyn CapabilityProvider>, ProviderError> {
        if members.is_empty() {
            return Err(ProviderError::new("composite has no members"));
        }
        Ok(Arc::new(CompositeProvider::new(kind, members)))
    }
}

/// Provider that owns exactly one backing client.
pub struct PrimaryProvider {
    kind: CapabilityKind,
    client: Mutex<Option<Box<dyn BackingClient>>>,
}

impl PrimaryProvider {
    /// Takes ownership of `client`.
    #[must_use]
    pub fn new(kind: CapabilityKind, client: Box<dyn BackingClient>) -> Self {
        Self {
            kind,
            client: Mutex::new(Some(client)),
        }
    }
}

impl CapabilityProvider for PrimaryProvider {
    fn invoke(&self, request: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| CapabilityError::Poisoned(self.kind))?;
        let client = guard
            .as_mut()
            .ok_or(CapabilityError::Released(self.kind))?;
        client
            .call(request)
            .map_err(|source| CapabilityError::Client {
                capability: self.kind,
                source,
            })
    }

    fn shutdown(&self) {
        let taken = match self.client.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut client) = taken {
            client.close();
            debug!(target: REGISTRY_TARGET, capability = %self.kind, "connection released");
        }
    }
}

/// Provider that fans each request out to its members in dependency order
/// and answers with the last member's reply.
pub struct CompositeProvider {
    kind: CapabilityKind,
    members: Vec<CapabilityHandle>,
    released: AtomicBool,
}

impl CompositeProvider {
    /// Combines `members`.
    #[must_use]
    pub fn new(kind: CapabilityKind, members: Vec<CapabilityHandle>) -> Self {
        Self {
            kind,
            members,
            released: AtomicBool::new(false),
        }
    }
}

impl CapabilityProvider for CompositeProvider {
    fn invoke(&self, request: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        if self.released.load(Ordering::Acquire) {
            return Err(CapabilityError::Released(self.kind));
        }
        let mut reply = Vec::new();
        for member in &self.members {
            reply = member.invoke(request)?;
        }
        Ok(reply)
    }

    fn shutdown(&self) {
        self.released.store(true, Ordering::Release);
    }
}
