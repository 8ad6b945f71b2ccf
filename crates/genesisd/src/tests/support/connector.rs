//! In-memory backing services whose probes can be made to fail per service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use genesis_config::ServiceDeclaration;

use crate::probe::{BackingClient, ClientError, Connector, ProbeFailure};

#[derive(Debug, Default)]
struct Services {
    failures: HashMap<String, String>,
    opened: Vec<String>,
    closed: Vec<String>,
}

/// Connector that hands out in-memory clients and records their lifetimes.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    services: Arc<Mutex<Services>>,
}

impl MemoryConnector {
    /// Makes every later probe of `service` fail as unreachable.
    pub fn fail(&self, service: &str, reason: &str) {
        self.lock()
            .failures
            .insert(service.to_owned(), reason.to_owned());
    }

    /// Names of services whose clients passed verification, in order.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    /// Names of services whose clients were closed, in order.
    #[must_use]
    pub fn closed(&self) -> Vec<String> {
        self.lock().closed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Services> {
        self.services.lock().expect("connector mutex poisoned")
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        service: &ServiceDeclaration,
        _timeout: Duration,
    ) -> Result<Box<dyn BackingClient>, ProbeFailure> {
        if let Some(reason) = self.lock().failures.get(&service.name) {
            return Err(ProbeFailure::Unreachable(reason.clone()));
        }
        Ok(Box::new(MemoryClient {
            name: service.name.clone(),
            services: Arc::clone(&self.services),
            open: false,
        }))
    }
}

struct MemoryClient {
    name: String,
    services: Arc<Mutex<Services>>,
    open: bool,
}

impl BackingClient for MemoryClient {
    fn verify(&mut self) -> Result<(), ProbeFailure> {
        self.open = true;
        self.services
            .lock()
            .expect("connector mutex poisoned")
            .opened
            .push(self.name.clone());
        Ok(())
    }

    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        if !self.open {
            return Err(ClientError::Closed);
        }
        let mut reply = format!("{}:", self.name).into_bytes();
        reply.extend_from_slice(request);
        Ok(reply)
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.services
            .lock()
            .expect("connector mutex poisoned")
            .closed
            .push(self.name.clone());
    }
}
