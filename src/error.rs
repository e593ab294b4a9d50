//! Error types for server selection and measurement runs
//!
//! Selection errors and latency/download probe errors abort the current
//! scrape; upload probe errors are masked with a zero-filled result so the
//! monitoring system still receives a data point.

use std::fmt;

use thiserror::Error;

use crate::catalog::ServerId;

/// Errors raised while selecting or refreshing the speedtest server
#[derive(Debug, Error)]
pub enum SelectorError {
    /// The catalog was empty or could not be fetched during initial selection
    #[error("no speedtest servers available")]
    NoServersAvailable,

    /// A pinned server identifier was not present in the catalog
    #[error("speedtest server {0} not found in catalog")]
    ServerNotFound(ServerId),

    /// The registry call failed during refresh; the previous selection is kept
    #[error("failed to refresh speedtest server list: {0}")]
    RefreshFailed(anyhow::Error),
}

/// The probe stage that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Latency,
    Download,
    Upload,
}

impl fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latency => write!(f, "latency"),
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// A measurement probe failed
#[derive(Debug, Error)]
#[error("{stage} probe failed: {reason}")]
pub struct ProbeError {
    pub stage: ProbeStage,
    pub reason: anyhow::Error,
}

impl ProbeError {
    #[must_use]
    pub fn new(stage: ProbeStage, reason: anyhow::Error) -> Self {
        Self { stage, reason }
    }
}

/// Errors surfaced by a `network_metrics` call
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl CollectorError {
    /// Whether this error still carries a reportable (zero-filled) result
    ///
    /// Only an upload probe failure is masked; every other error aborts the
    /// scrape with no data point.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        matches!(
            self,
            Self::Probe(ProbeError {
                stage: ProbeStage::Upload,
                ..
            })
        )
    }
}
