//! Command-line argument parsing
//!
//! Flags override the config file; the config file overrides built-in
//! defaults. The `effective_*` accessors apply that precedence.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::catalog::ServerId;
use crate::config::{Config, DEFAULT_LISTEN_ADDRESS, DEFAULT_TELEMETRY_PATH};

/// Prometheus exporter for speedtest measurements
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Address to listen on for the HTTP endpoint (overrides config file)
    #[arg(long = "web.listen-address", env = "SPEEDTEST_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics (overrides config file)
    #[arg(long = "web.telemetry-path", env = "SPEEDTEST_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    /// Speedtest server identifier to pin; 0 means auto-select the closest
    #[arg(long = "speedtest.server-id", env = "SPEEDTEST_SERVER_ID")]
    pub server_id: Option<u32>,

    /// Measurement cache validity in seconds (overrides config file)
    #[arg(long = "cache-ttl", env = "SPEEDTEST_CACHE_TTL")]
    pub cache_ttl: Option<u64>,

    /// Configuration file path; defaults apply when absent
    #[arg(short, long, env = "SPEEDTEST_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Get effective listen address (from args, config, or default)
    #[must_use]
    pub fn effective_listen_address<'a>(&'a self, config: &'a Config) -> &'a str {
        match &self.listen_address {
            Some(addr) => addr,
            None if !config.listen_address.is_empty() => &config.listen_address,
            None => DEFAULT_LISTEN_ADDRESS,
        }
    }

    /// Get effective telemetry path (from args, config, or default)
    #[must_use]
    pub fn effective_telemetry_path<'a>(&'a self, config: &'a Config) -> &'a str {
        match &self.telemetry_path {
            Some(path) => path,
            None if !config.telemetry_path.is_empty() => &config.telemetry_path,
            None => DEFAULT_TELEMETRY_PATH,
        }
    }

    /// Get effective pinned server, if any
    ///
    /// A flag value of 0 explicitly requests auto-selection, even when the
    /// config file pins a server.
    #[must_use]
    pub fn effective_pinned_server(&self, config: &Config) -> Option<ServerId> {
        match self.server_id {
            Some(0) => None,
            Some(id) => Some(ServerId::new(id)),
            None => config.pinned_server(),
        }
    }

    /// Get effective cache validity
    #[must_use]
    pub fn effective_cache_ttl(&self, config: &Config) -> Duration {
        self.cache_ttl
            .map_or_else(|| config.cache_ttl(), Duration::from_secs)
    }
}
