//! Backing-service declarations.
//!
//! The declaration list is the only source of backing services: a service
//! that is not declared can never gate a capability.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use url::Url;

const OPTIONAL_SUFFIX: &str = "#optional";

/// Category of backing service. Determines the connectivity check used and
/// the capability the service backs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ServiceKind {
    /// Durable ledger store.
    Ledger,
    /// Cache and work queue.
    Cache,
    /// Identity and registry store.
    Registry,
    /// Blob storage.
    Blob,
    /// Service discovery.
    Discovery,
    /// Search index.
    Search,
    /// Analytical store.
    Analytics,
    /// Telemetry sink.
    Telemetry,
    /// Auxiliary inference backend.
    Inference,
}

impl ServiceKind {
    /// Kinds that must be declared, and declared required, for a boot to
    /// proceed.
    pub const MANDATORY: [Self; 4] = [Self::Ledger, Self::Cache, Self::Registry, Self::Blob];

    /// Returns `true` for kinds listed in [`ServiceKind::MANDATORY`].
    #[must_use]
    pub const fn is_mandatory(self) -> bool {
        matches!(self, Self::Ledger | Self::Cache | Self::Registry | Self::Blob)
    }

    /// Returns `true` when endpoints of this kind may use `scheme`.
    #[must_use]
    pub fn accepts_scheme(self, scheme: &str) -> bool {
        match scheme {
            "tcp" => true,
            "file" => matches!(self, Self::Blob),
            _ => false,
        }
    }
}

/// One declared backing service.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceDeclaration {
    /// Logical name used in diagnostics.
    pub name: String,
    /// Service category.
    pub kind: ServiceKind,
    /// Connection endpoint (`tcp://host:port` or, for blob storage,
    /// `file:///path`).
    pub endpoint: Url,
    /// Secret presented during the authenticated connectivity check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Whether a failed probe aborts the boot.
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

impl ServiceDeclaration {
    /// Declares a required service.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: ServiceKind, endpoint: Url) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint,
            credential: None,
            required: true,
        }
    }

    /// Declares an optional service.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: ServiceKind, endpoint: Url) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, endpoint)
        }
    }

    /// Attaches a credential to the declaration.
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

impl fmt::Debug for ServiceDeclaration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServiceDeclaration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint.as_str())
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("required", &self.required)
            .finish()
    }
}

impl fmt::Display for ServiceDeclaration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}@{}", self.name, self.kind, self.endpoint)?;
        if !self.required {
            formatter.write_str(OPTIONAL_SUFFIX)?;
        }
        Ok(())
    }
}

/// Errors produced when parsing a [`ServiceDeclaration`] from text.
#[derive(Debug, Error)]
pub enum ServiceParseError {
    /// The `name=` prefix was missing.
    #[error("declaration '{0}' is missing the name separator '='")]
    MissingName(String),
    /// The `@endpoint` suffix was missing.
    #[error("declaration '{0}' is missing the endpoint separator '@'")]
    MissingEndpoint(String),
    /// The service kind was not recognised.
    #[error("unsupported service kind '{0}'")]
    UnknownKind(String),
    /// The endpoint was not a URL.
    #[error("invalid endpoint in '{input}': {source}")]
    Endpoint {
        /// Declaration text.
        input: String,
        /// Underlying URL error.
        #[source]
        source: url::ParseError,
    },
}

impl FromStr for ServiceDeclaration {
    type Err = ServiceParseError;

    /// Parses `name=kind@endpoint`, optionally suffixed with `#optional`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (body, required) = match trimmed.strip_suffix(OPTIONAL_SUFFIX) {
            Some(body) => (body, false),
            None => (trimmed, true),
        };
        let (name, rest) = body
            .split_once('=')
            .ok_or_else(|| ServiceParseError::MissingName(input.to_owned()))?;
        let (kind, endpoint) = rest
            .split_once('@')
            .ok_or_else(|| ServiceParseError::MissingEndpoint(input.to_owned()))?;
        let kind = ServiceKind::from_str(kind.trim())
            .map_err(|_| ServiceParseError::UnknownKind(kind.trim().to_owned()))?;
        let endpoint =
            Url::parse(endpoint.trim()).map_err(|source| ServiceParseError::Endpoint {
                input: input.to_owned(),
                source,
            })?;
        Ok(Self {
            name: name.trim().to_owned(),
            kind,
            endpoint,
            credential: None,
            required,
        })
    }
}
