//! TOML configuration file schema and parsing.
//!
//! The file is TOML, not YAML: endpoints are `[[endpoints]]` tables rather
//! than a top-level sequence. Field names inside an endpoint are unchanged
//! (`endpoint`, `timeout`, `repeatAfter`, `backoffFactor`, `targets`).
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//! notify_timeout = "10s"
//!
//! [[endpoints]]
//! endpoint = "db-backup"
//! timeout = "1h"
//! repeatAfter = "30m"
//! backoffFactor = 1.5
//!
//! [[endpoints.targets]]
//! get = { url = "https://alerts.example.com/ping?check=db-backup" }
//!
//! [[endpoints.targets]]
//! post = { url = "https://chat.example.com/hook", body = { channel = "ops", text = "db-backup missed" } }
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use deadman_core::{parse_duration, ConfigError, Endpoint, EndpointDef};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub endpoints: Vec<EndpointDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Per-request bound on notification calls. Unset means no bound.
    #[serde(default)]
    pub notify_timeout: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
            notify_timeout: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

impl ServerConfig {
    pub fn notify_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.notify_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Checks that need the whole file. Per-endpoint checks run in
    /// [`AppConfig::to_endpoints`].
    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for e in &self.endpoints {
            if !names.insert(e.endpoint.as_str()) {
                return Err(ConfigError::DuplicateEndpoint(e.endpoint.clone()));
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                )));
            }
        }

        self.server.notify_timeout()?;
        Ok(())
    }

    pub fn to_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        self.endpoints.iter().map(EndpointDef::to_endpoint).collect()
    }
}
