//! Speedtest server catalog and registry access
//!
//! A `ReferenceServer` is a remote speedtest endpoint used as the target for
//! latency and throughput probes. The catalog is fetched fresh on every
//! refresh and is never persisted; distance ranking comes from the registry.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Unique identifier of a speedtest server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(u32);

impl ServerId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(Self)
    }
}

/// A single speedtest server from the catalog
///
/// Replaced wholesale when the selection changes; fields are never mutated
/// in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceServer {
    pub id: ServerId,
    /// Location name (typically the city)
    pub name: String,
    /// Operator of the server
    pub sponsor: String,
    /// Network location as `host:port`
    pub host: String,
    /// Distance from the client, used as the ranking key
    pub distance_km: f64,
}

/// The full set of known servers, ranked by distance
#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    servers: Vec<ReferenceServer>,
}

impl ServerCatalog {
    /// Build a catalog, ranking servers closest-first
    #[must_use]
    pub fn new(mut servers: Vec<ReferenceServer>) -> Self {
        servers.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { servers }
    }

    /// Servers in closest-first order
    #[must_use]
    pub fn closest(&self) -> &[ReferenceServer] {
        &self.servers
    }

    /// Look up a server by identifier
    #[must_use]
    pub fn find(&self, id: ServerId) -> Option<&ReferenceServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }
}

/// Access to the speedtest server list
///
/// Implementations are stateless collaborators invoked per call; any error
/// is treated as opaque and non-retryable by the caller.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    /// Fetch the full catalog, ranked by distance
    async fn fetch_catalog(&self) -> Result<ServerCatalog>;

    /// Fetch the ranked subset matching the given identifiers
    async fn fetch_closest(&self, ids: &[ServerId]) -> Result<Vec<ReferenceServer>>;
}

/// Default public server-list endpoint
const DEFAULT_SERVERS_URL: &str = "https://www.speedtest.net/api/js/servers?engine=js&limit=50";

/// Wire format of a server-list entry
///
/// The public API returns numeric fields as strings.
#[derive(Debug, Deserialize)]
struct ServerEntry {
    id: String,
    name: String,
    sponsor: String,
    host: String,
    distance: f64,
}

/// Registry backed by the public speedtest server-list API
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    servers_url: String,
}

impl HttpRegistry {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            servers_url: DEFAULT_SERVERS_URL.to_string(),
        }
    }

    /// Override the server-list URL (used by tests)
    #[must_use]
    pub fn with_servers_url(mut self, url: impl Into<String>) -> Self {
        self.servers_url = url.into();
        self
    }

    fn parse_entries(entries: Vec<ServerEntry>) -> Vec<ReferenceServer> {
        entries
            .into_iter()
            .filter_map(|e| {
                let id = match e.id.parse::<u32>() {
                    Ok(id) => ServerId::new(id),
                    Err(_) => {
                        debug!("Skipping server with non-numeric id {:?}", e.id);
                        return None;
                    }
                };
                Some(ReferenceServer {
                    id,
                    name: e.name,
                    sponsor: e.sponsor,
                    host: e.host,
                    distance_km: e.distance,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ServerRegistry for HttpRegistry {
    async fn fetch_catalog(&self) -> Result<ServerCatalog> {
        let entries: Vec<ServerEntry> = self
            .client
            .get(&self.servers_url)
            .send()
            .await
            .context("server list request failed")?
            .error_for_status()
            .context("server list request rejected")?
            .json()
            .await
            .context("invalid server list payload")?;

        debug!("Fetched {} servers from registry", entries.len());
        Ok(ServerCatalog::new(Self::parse_entries(entries)))
    }

    async fn fetch_closest(&self, ids: &[ServerId]) -> Result<Vec<ReferenceServer>> {
        let catalog = self.fetch_catalog().await?;
        Ok(catalog
            .closest()
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }
}
