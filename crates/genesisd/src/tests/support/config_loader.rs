//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use camino::Utf8PathBuf;
use genesis_config::{Config, ServiceDeclaration, ServiceKind};
use ortho_config::{OrthoConfig, OrthoError};
use url::Url;

use crate::bootstrap::ConfigLoader;

/// Names of the four mandatory services every test configuration declares.
pub const MANDATORY_SERVICES: [(&str, ServiceKind); 4] = [
    ("ledger", ServiceKind::Ledger),
    ("cache", ServiceKind::Cache),
    ("registry", ServiceKind::Registry),
    ("blob", ServiceKind::Blob),
];

/// Loader returning a configuration rooted in a test-owned state directory.
#[derive(Debug, Clone)]
pub struct TestConfigLoader {
    config: Config,
}

impl TestConfigLoader {
    /// Baseline configuration declaring the mandatory services.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        let services = MANDATORY_SERVICES
            .iter()
            .zip(7001_u16..)
            .map(|((name, kind), port)| ServiceDeclaration::required(*name, *kind, endpoint(port)))
            .collect();
        Self {
            config: Config {
                state_dir: Utf8PathBuf::from_path_buf(state_dir.to_path_buf())
                    .expect("temporary state directory was not valid UTF-8"),
                services,
                drain_timeout_ms: 500,
                ..Config::default()
            },
        }
    }

    /// Sets the raw capability level string.
    #[must_use]
    pub fn with_level(mut self, level: &str) -> Self {
        level.clone_into(&mut self.config.capability_level);
        self
    }

    /// Declares an extra optional service.
    #[must_use]
    pub fn with_optional(mut self, name: &str, kind: ServiceKind) -> Self {
        let port = 7100 + u16::try_from(self.config.services.len()).expect("few services");
        self.config
            .services
            .push(ServiceDeclaration::optional(name, kind, endpoint(port)));
        self
    }

    /// Sets the drain deadline.
    #[must_use]
    pub const fn with_drain_timeout_ms(mut self, millis: u64) -> Self {
        self.config.drain_timeout_ms = millis;
        self
    }

    /// Sets the raw reconcile policy string.
    #[must_use]
    pub fn with_reconcile_policy(mut self, policy: &str) -> Self {
        policy.clone_into(&mut self.config.reconcile_policy);
        self
    }

    /// The configuration this loader returns.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
#[derive(Debug, Default)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("genesisd"),
            OsString::from("--probe-timeout-ms"),
            OsString::from("soon"),
        ];
        Config::load_from_iter(args)
    }
}

fn endpoint(port: u16) -> Url {
    Url::parse(&format!("tcp://127.0.0.1:{port}")).expect("valid test endpoint")
}
