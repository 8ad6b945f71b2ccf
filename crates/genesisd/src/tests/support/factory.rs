//! Provider factory that fails for one chosen graph node.

use std::sync::Arc;

use genesis_config::ServiceDeclaration;

use crate::probe::BackingClient;
use crate::registry::{
    CapabilityHandle, CapabilityKind, CapabilityProvider, ProviderError, ProviderFactory,
    StandardProviders,
};

/// Delegates to [`StandardProviders`] except for `failing`.
#[derive(Debug, Clone, Copy)]
pub struct FailingFactory {
    failing: CapabilityKind,
}

impl FailingFactory {
    #[must_use]
    pub const fn new(failing: CapabilityKind) -> Self {
        Self { failing }
    }

    fn refusal(&self) -> ProviderError {
        ProviderError::new(format!("{} provider refused to start", self.failing))
    }
}

impl ProviderFactory for FailingFactory {
    fn primary(
        &self,
        kind: CapabilityKind,
        service: &ServiceDeclaration,
        mut client: Box<dyn BackingClient>,
    ) -> Result<Arc<dyn CapabilityProvider>, ProviderError> {
        if kind == self.failing {
            client.close();
            return Err(self.refusal());
        }
        StandardProviders.primary(kind, service, client)
    }

    fn composite(
        &self,
        kind: CapabilityKind,
        members: Vec<CapabilityHandle>,
    ) -> Result<Arc<dyn CapabilityProvider>, ProviderError> {
        if kind == self.failing {
            return Err(self.refusal());
        }
        StandardProviders.composite(kind, members)
    }
}
