//! Runtime configuration, read from the environment.
//!
//! Variables:
//! - `ELECTION_DATABASE_PATH` - SQLite file (default `election.db`)
//! - `ELECTION_BIND_ADDR` - server address (default `127.0.0.1:8000`)
//! - `ELECTION_PROJECT_NAME` - name shown by the greeting endpoint
//! - `ELECTION_CORS_ORIGINS` - JSON array of allowed origins (unset = permissive)
//! - `GOV_ENDPOINT` - national registry base URL (unset = registry unavailable)
//! - `GOV_API_KEY` - bearer token for the registry
//! - `GOV_TIMEOUT_MS` - bound on each registry call (default 5000)

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ElectionError, Result};
use crate::registry_client::{
    HttpRegistryClient, RegistryClient, RegistryConfig, UnavailableRegistryClient, DEFAULT_TIMEOUT_MS,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub project_name: String,

    /// None = allow any origin
    pub cors_origins: Option<Vec<String>>,

    /// None = no registry configured
    pub registry: Option<RegistryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("election.db"),
            bind_addr: "127.0.0.1:8000".to_string(),
            project_name: "election-tally".to_string(),
            cors_origins: None,
            registry: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment, or a map in tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("ELECTION_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup("ELECTION_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(name) = lookup("ELECTION_PROJECT_NAME") {
            config.project_name = name;
        }

        if let Some(origins) = lookup("ELECTION_CORS_ORIGINS") {
            let parsed: Vec<String> = serde_json::from_str(&origins).map_err(|e| {
                ElectionError::Config(format!("Invalid ELECTION_CORS_ORIGINS: {}", e))
            })?;
            config.cors_origins = Some(parsed);
        }

        if let Some(base_url) = lookup("GOV_ENDPOINT") {
            let timeout_ms = match lookup("GOV_TIMEOUT_MS") {
                Some(raw) => raw.parse::<u64>().map_err(|e| {
                    ElectionError::Config(format!("Invalid GOV_TIMEOUT_MS: {}", e))
                })?,
                None => DEFAULT_TIMEOUT_MS,
            };

            config.registry = Some(RegistryConfig {
                base_url,
                api_key: lookup("GOV_API_KEY"),
                timeout_ms,
            });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(registry) = &self.registry {
            if registry.timeout_ms == 0 {
                return Err(ElectionError::Config("GOV_TIMEOUT_MS must be > 0".into()));
            }
            if registry.base_url.trim().is_empty() {
                return Err(ElectionError::Config("GOV_ENDPOINT is empty".into()));
            }
        }

        if self.bind_addr.trim().is_empty() {
            return Err(ElectionError::Config("ELECTION_BIND_ADDR is empty".into()));
        }

        Ok(())
    }

    /// Registry client for this configuration
    pub fn registry_client(&self) -> Result<Arc<dyn RegistryClient>> {
        match &self.registry {
            Some(registry) => Ok(Arc::new(HttpRegistryClient::new(registry.clone())?)),
            None => Ok(Arc::new(UnavailableRegistryClient::new("GOV_ENDPOINT not configured"))),
        }
    }
}
