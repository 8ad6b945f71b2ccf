//! Backing-service connectivity checks.
//!
//! A probe is more than a port check: the connector opens a client and the
//! client performs one authenticated round trip. Clients that pass are
//! handed to the capability registry, which is the only component allowed
//! to keep them.

mod network;

use std::io;
use std::time::{Duration, Instant};

use genesis_config::{ServiceDeclaration, ServiceKind};
use thiserror::Error;

pub use network::NetworkConnector;

/// Live connection to one backing service.
pub trait BackingClient: Send {
    /// Performs the authenticated connectivity check.
    fn verify(&mut self) -> Result<(), ProbeFailure>;

    /// Sends one request and returns the raw reply.
    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>, ClientError>;

    /// Releases the connection. Further calls fail.
    fn close(&mut self);
}

/// Opens [`BackingClient`]s for declared services.
pub trait Connector: Send + Sync {
    /// Connects to `service`, spending at most `timeout` on the attempt.
    fn connect(
        &self,
        service: &ServiceDeclaration,
        timeout: Duration,
    ) -> Result<Box<dyn BackingClient>, ProbeFailure>;
}

/// Why a connectivity check failed.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    /// The endpoint could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The service rejected the presented credential.
    #[error("authentication rejected: {0}")]
    Unauthorised(String),
    /// The service answered with something other than the expected reply.
    #[error("unexpected reply '{0}'")]
    UnexpectedReply(String),
    /// The check did not finish within the probe budget.
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
    /// Local I/O failed while probing.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by [`BackingClient::call`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying transport failed.
    #[error("transport failure: {0}")]
    Io(#[from] io::Error),
    /// The service replied with an error.
    #[error("service error: {0}")]
    Service(String),
    /// The client was already closed.
    #[error("connection already released")]
    Closed,
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The round trip succeeded.
    Passed,
    /// The round trip failed.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Per-service result of a boot attempt's connectivity checks.
///
/// Results are created fresh on every boot and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Declared service name.
    pub service: String,
    /// Declared service kind.
    pub kind: ServiceKind,
    /// Whether the declaration was required.
    pub required: bool,
    /// Pass or fail.
    pub outcome: ProbeOutcome,
    /// Time spent connecting and verifying.
    pub latency: Duration,
}

impl ProbeResult {
    /// Returns `true` when the probe passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Passed)
    }

    /// Failure reason, if the probe failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            ProbeOutcome::Passed => None,
            ProbeOutcome::Failed { reason } => Some(reason.as_str()),
        }
    }
}

/// Probes one service, returning the verified client on success.
pub(crate) fn probe_service(
    connector: &dyn Connector,
    service: &ServiceDeclaration,
    timeout: Duration,
) -> (ProbeResult, Option<Box<dyn BackingClient>>) {
    let started = Instant::now();
    let attempt = connector.connect(service, timeout).and_then(|mut client| {
        match client.verify() {
            Ok(()) => Ok(client),
            Err(error) => {
                client.close();
                Err(error)
            }
        }
    });
    let latency = started.elapsed();
    let (outcome, client) = match attempt {
        Ok(client) => (ProbeOutcome::Passed, Some(client)),
        Err(error) => (
            ProbeOutcome::Failed {
                reason: error.to_string(),
            },
            None,
        ),
    };
    let result = ProbeResult {
        service: service.name.clone(),
        kind: service.kind,
        required: service.required,
        outcome,
        latency,
    };
    (result, client)
}
