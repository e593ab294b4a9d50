//! Configuration loading
//!
//! Settings come from an optional TOML file; command-line flags override
//! whatever the file provides. Every field has a default so an empty file
//! (or no file at all) yields a working exporter.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::catalog::ServerId;

/// Default listen address (all interfaces, port 9112)
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9112";

/// Default path serving the Prometheus exposition
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

/// Default measurement cache validity in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server binds to
    pub listen_address: String,
    /// Path serving the Prometheus exposition
    pub telemetry_path: String,
    /// Pinned speedtest server identifier; 0 or absent means auto-select
    pub server_id: u32,
    /// How long a measurement stays valid, in seconds
    pub cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            server_id: 0,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl Config {
    /// The pinned server, if any
    ///
    /// Identifier 0 is the sentinel for auto-selection.
    #[must_use]
    pub fn pinned_server(&self) -> Option<ServerId> {
        (self.server_id != 0).then(|| ServerId::new(self.server_id))
    }

    /// Measurement cache validity
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Check the configuration for values that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.listen_address.is_empty() {
            bail!("listen_address must not be empty");
        }
        if !self.telemetry_path.starts_with('/') {
            bail!(
                "telemetry_path must start with '/', got {:?}",
                self.telemetry_path
            );
        }
        if self.cache_ttl_secs == 0 {
            bail!("cache_ttl_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
