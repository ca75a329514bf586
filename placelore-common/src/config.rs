//! Configuration loading for the discovery pipeline
//!
//! Resolution priority per setting: environment variable → TOML file → default.
//! Environment variables use the `PLACELORE_` prefix. When both an environment
//! variable and a TOML value are present, the environment wins and a warning
//! is logged so operators can spot shadowed configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// SQLite database path (":memory:" for ephemeral)
    pub database_path: String,

    /// Enrichment worker pool size
    pub enrichment_workers: usize,
    /// Maximum queued enrichment items before enqueue is rejected
    pub queue_capacity: usize,
    /// Maximum enrichment attempts before an item goes dead
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds (doubles per attempt)
    pub backoff_base_ms: u64,
    /// Backoff delay ceiling in milliseconds
    pub backoff_cap_ms: u64,

    /// Cache entry time-to-live in seconds
    pub cache_ttl_secs: u64,
    /// Interval for the periodic cache sweep, 0 disables the sweep task
    pub cache_sweep_secs: u64,

    /// External call timeout in seconds (oracle, maps, harvest fetches)
    pub external_timeout_secs: u64,

    /// AI extraction oracle endpoint
    pub oracle_base_url: String,
    /// AI extraction oracle API key
    pub oracle_api_key: Option<String>,
    /// Maps/places platform endpoint
    pub maps_base_url: String,
    /// Maps/places platform API key
    pub maps_api_key: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5810,
            database_path: "placelore.db".to_string(),
            enrichment_workers: 4,
            queue_capacity: 10_000,
            max_attempts: 5,
            backoff_base_ms: 30_000,
            backoff_cap_ms: 480_000,
            cache_ttl_secs: 900,
            cache_sweep_secs: 300,
            external_timeout_secs: 30,
            oracle_base_url: "http://127.0.0.1:5900".to_string(),
            oracle_api_key: None,
            maps_base_url: "http://127.0.0.1:5901".to_string(),
            maps_api_key: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    ///
    /// A missing file is not an error; defaults plus environment are used.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `PLACELORE_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        override_string("PLACELORE_HOST", &mut self.host);
        override_parsed("PLACELORE_PORT", &mut self.port);
        override_string("PLACELORE_DATABASE_PATH", &mut self.database_path);
        override_parsed("PLACELORE_ENRICHMENT_WORKERS", &mut self.enrichment_workers);
        override_parsed("PLACELORE_QUEUE_CAPACITY", &mut self.queue_capacity);
        override_parsed("PLACELORE_MAX_ATTEMPTS", &mut self.max_attempts);
        override_parsed("PLACELORE_BACKOFF_BASE_MS", &mut self.backoff_base_ms);
        override_parsed("PLACELORE_BACKOFF_CAP_MS", &mut self.backoff_cap_ms);
        override_parsed("PLACELORE_CACHE_TTL_SECS", &mut self.cache_ttl_secs);
        override_parsed("PLACELORE_CACHE_SWEEP_SECS", &mut self.cache_sweep_secs);
        override_parsed("PLACELORE_EXTERNAL_TIMEOUT_SECS", &mut self.external_timeout_secs);
        override_string("PLACELORE_ORACLE_BASE_URL", &mut self.oracle_base_url);
        override_optional("PLACELORE_ORACLE_API_KEY", &mut self.oracle_api_key);
        override_string("PLACELORE_MAPS_BASE_URL", &mut self.maps_base_url);
        override_optional("PLACELORE_MAPS_API_KEY", &mut self.maps_api_key);
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.enrichment_workers == 0 {
            return Err(Error::Config(
                "enrichment_workers must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(Error::Config(format!(
                "backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }
}

fn override_string(var: &str, field: &mut String) {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            if *field != value {
                warn!("{} overrides TOML value", var);
            }
            *field = value;
        }
    }
}

fn override_optional(var: &str, field: &mut Option<String>) {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            *field = Some(value);
        }
    }
}

fn override_parsed<T: std::str::FromStr + PartialEq>(var: &str, field: &mut T) {
    if let Ok(value) = std::env::var(var) {
        match value.parse::<T>() {
            Ok(parsed) => *field = parsed,
            Err(_) => warn!("{} has unparseable value '{}', ignoring", var, value),
        }
    }
}
