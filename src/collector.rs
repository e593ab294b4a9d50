//! Measurement cache controller
//!
//! Owns the single most recent measurement and its freshness deadline. Each
//! metrics request either serves the cached result (fresh) or runs a full
//! measurement (stale): refresh selection, latency probe, download probe,
//! upload probe, store. One `tokio::sync::Mutex` spans the entire call,
//! probes included, so at most one measurement run is in flight system-wide;
//! concurrent scrapes block until it completes and then re-check freshness.
//!
//! A hung probe blocks subsequent scrapes indefinitely; callers needing
//! bounded latency must enforce an external timeout around the whole call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::catalog::{ServerId, ServerRegistry};
use crate::error::{CollectorError, ProbeError, ProbeStage, SelectorError};
use crate::provider::MeasurementProvider;
use crate::selector::ServerSelector;

/// One complete measurement in canonical units
///
/// All three values are always present, including in the zero-filled
/// sentinel reported on a masked upload failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Round-trip latency in milliseconds
    pub ping_ms: f64,
    /// Download bandwidth in megabits per second
    pub download_mbps: f64,
    /// Upload bandwidth in megabits per second
    pub upload_mbps: f64,
}

impl Measurement {
    /// The sentinel reported when an upload failure is masked
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            ping_ms: 0.0,
            download_mbps: 0.0,
            upload_mbps: 0.0,
        }
    }
}

/// Truncate to two decimal places (floor at the hundredths digit)
fn truncate_hundredths(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}

/// Cache entry plus selection state, all behind the collector's one lock
struct CacheState {
    selector: ServerSelector,
    last: Option<Measurement>,
    /// `None` until the first successful run, which forces an initial
    /// measurement
    valid_until: Option<Instant>,
    validity: Duration,
}

impl CacheState {
    fn is_fresh(&self, now: Instant) -> bool {
        matches!(self.valid_until, Some(deadline) if now < deadline)
    }
}

/// Serves cached measurements and serializes fresh measurement runs
pub struct Collector {
    provider: Arc<dyn MeasurementProvider>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector").finish_non_exhaustive()
    }
}

impl Collector {
    /// Build a collector, selecting the initial speedtest server
    ///
    /// Fails if the pinned identifier is absent from the catalog or, in
    /// auto mode, if no server is available.
    pub async fn new(
        registry: Arc<dyn ServerRegistry>,
        provider: Arc<dyn MeasurementProvider>,
        pinned: Option<ServerId>,
        validity: Duration,
    ) -> Result<Self, SelectorError> {
        let selector = ServerSelector::select_initial(registry, pinned).await?;
        Ok(Self {
            provider,
            state: Mutex::new(CacheState {
                selector,
                last: None,
                valid_until: None,
                validity,
            }),
        })
    }

    /// Return the current measurement, running a speedtest if the cache is
    /// stale
    ///
    /// Failure semantics: a refresh, latency, or download failure aborts
    /// the call and leaves the cache stale so the next scrape retries. An
    /// upload failure is the one masked case: the error is returned but
    /// the caller is expected to report [`Measurement::zero`] (see
    /// [`CollectorError::is_masked`]); the stale cache is left untouched.
    pub async fn network_metrics(&self) -> Result<Measurement, CollectorError> {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        if state.is_fresh(now) {
            if let Some(last) = &state.last {
                if let Some(deadline) = state.valid_until {
                    info!("Using cached result, still valid for {:?}", deadline - now);
                }
                return Ok(last.clone());
            }
        }

        state.selector.refresh().await?;
        let server = state.selector.current().clone();

        info!("Latency test against server {}", server.id);
        let ping_ms = self
            .provider
            .ping(&server)
            .await
            .map_err(|e| ProbeError::new(ProbeStage::Latency, e))?;
        info!("Latency: {:.1} ms", ping_ms);

        info!("Download test");
        let download_mbps = self
            .provider
            .download(&server)
            .await
            .map_err(|e| ProbeError::new(ProbeStage::Download, e))?;
        info!("Download: {:.2} Mbit/s", download_mbps);

        info!("Upload test");
        let upload_mbps = match self.provider.upload(&server).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Upload test failed, reporting zero-filled result: {}", e);
                return Err(ProbeError::new(ProbeStage::Upload, e).into());
            }
        };
        info!("Upload: {:.2} Mbit/s", upload_mbps);

        let measurement = Measurement {
            ping_ms,
            download_mbps: truncate_hundredths(download_mbps),
            upload_mbps: truncate_hundredths(upload_mbps),
        };

        self.provider.reset_accounting();
        state.last = Some(measurement.clone());
        state.valid_until = Some(Instant::now() + state.validity);
        info!("Speedtest finished");

        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ReferenceServer, ServerCatalog};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StaticRegistry {
        servers: Vec<ReferenceServer>,
    }

    #[async_trait]
    impl ServerRegistry for StaticRegistry {
        async fn fetch_catalog(&self) -> Result<ServerCatalog> {
            Ok(ServerCatalog::new(self.servers.clone()))
        }

        async fn fetch_closest(&self, ids: &[ServerId]) -> Result<Vec<ReferenceServer>> {
            Ok(self
                .servers
                .iter()
                .filter(|s| ids.contains(&s.id))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockProvider {
        ping_calls: AtomicUsize,
        download_calls: AtomicUsize,
        upload_calls: AtomicUsize,
        reset_calls: AtomicUsize,
        fail_ping: AtomicBool,
        fail_download: AtomicBool,
        fail_upload: AtomicBool,
    }

    #[async_trait]
    impl MeasurementProvider for MockProvider {
        async fn ping(&self, _server: &ReferenceServer) -> Result<f64> {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ping.load(Ordering::SeqCst) {
                bail!("ping refused");
            }
            Ok(23.0)
        }

        async fn download(&self, _server: &ReferenceServer) -> Result<f64> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_download.load(Ordering::SeqCst) {
                bail!("download refused");
            }
            Ok(12.3456)
        }

        async fn upload(&self, _server: &ReferenceServer) -> Result<f64> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_upload.load(Ordering::SeqCst) {
                bail!("upload refused");
            }
            Ok(4.5678)
        }

        fn reset_accounting(&self) {
            self.reset_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry() -> Arc<StaticRegistry> {
        Arc::new(StaticRegistry {
            servers: vec![ReferenceServer {
                id: ServerId::new(1),
                name: "Paris".to_string(),
                sponsor: "Test ISP".to_string(),
                host: "paris.example.com:8080".to_string(),
                distance_km: 12.0,
            }],
        })
    }

    async fn collector(provider: Arc<MockProvider>, validity: Duration) -> Collector {
        Collector::new(registry(), provider, None, validity)
            .await
            .unwrap()
    }

    #[test]
    fn test_truncating_rounding() {
        assert_eq!(truncate_hundredths(12.3456), 12.34);
        assert_eq!(truncate_hundredths(12.349), 12.34);
        assert_eq!(truncate_hundredths(12.0), 12.0);
        assert_eq!(truncate_hundredths(0.999), 0.99);
    }

    #[tokio::test]
    async fn test_first_call_runs_measurement() {
        let provider = Arc::new(MockProvider::default());
        let collector = collector(provider.clone(), Duration::from_secs(300)).await;

        let m = collector.network_metrics().await.unwrap();
        assert_eq!(m.ping_ms, 23.0);
        assert_eq!(m.download_mbps, 12.34);
        assert_eq!(m.upload_mbps, 4.56);

        assert_eq!(provider.ping_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.upload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.reset_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_cache_serves_without_probes() {
        let provider = Arc::new(MockProvider::default());
        let collector = collector(provider.clone(), Duration::from_secs(300)).await;

        let first = collector.network_metrics().await.unwrap();
        let second = collector.network_metrics().await.unwrap();
        assert_eq!(first, second);

        // Only the initial run touched the provider
        assert_eq!(provider.ping_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_math() {
        let validity = Duration::from_secs(300);
        let provider = Arc::new(MockProvider::default());
        let collector = collector(provider.clone(), validity).await;

        collector.network_metrics().await.unwrap();
        assert_eq!(provider.ping_calls.load(Ordering::SeqCst), 1);

        // One tick before the deadline: still fresh
        tokio::time::advance(validity - Duration::from_millis(1)).await;
        collector.network_metrics().await.unwrap();
        assert_eq!(provider.ping_calls.load(Ordering::SeqCst), 1);

        // At the deadline: stale, a new run starts
        tokio::time::advance(Duration::from_millis(1)).await;
        collector.network_metrics().await.unwrap();
        assert_eq!(provider.ping_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_latency_failure_aborts_and_stays_stale() {
        let provider = Arc::new(MockProvider::default());
        provider.fail_ping.store(true, Ordering::SeqCst);
        let collector = collector(provider.clone(), Duration::from_secs(300)).await;

        let err = collector.network_metrics().await.unwrap_err();
        assert!(matches!(
            &err,
            CollectorError::Probe(p) if p.stage == ProbeStage::Latency
        ));
        assert!(!err.is_masked());
        assert_eq!(provider.download_calls.load(Ordering::SeqCst), 0);

        // The next call retries immediately because nothing was cached
        provider.fail_ping.store(false, Ordering::SeqCst);
        let m = collector.network_metrics().await.unwrap();
        assert_eq!(m.download_mbps, 12.34);
    }

    #[tokio::test]
    async fn test_download_failure_aborts_and_stays_stale() {
        let provider = Arc::new(MockProvider::default());
        provider.fail_download.store(true, Ordering::SeqCst);
        let collector = collector(provider.clone(), Duration::from_secs(300)).await;

        let err = collector.network_metrics().await.unwrap_err();
        assert!(matches!(
            &err,
            CollectorError::Probe(p) if p.stage == ProbeStage::Download
        ));
        assert_eq!(provider.upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.reset_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_masked_and_cache_untouched() {
        let provider = Arc::new(MockProvider::default());
        provider.fail_upload.store(true, Ordering::SeqCst);
        let collector = collector(provider.clone(), Duration::from_secs(300)).await;

        let err = collector.network_metrics().await.unwrap_err();
        assert!(err.is_masked());
        assert_eq!(provider.reset_calls.load(Ordering::SeqCst), 0);

        // The cache stayed stale: the next call runs the full sequence again
        provider.fail_upload.store(false, Ordering::SeqCst);
        let m = collector.network_metrics().await.unwrap();
        assert_eq!(m.upload_mbps, 4.56);
        assert_eq!(provider.ping_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pinned_missing_id_fails_construction() {
        let provider = Arc::new(MockProvider::default());
        let err = Collector::new(
            registry(),
            provider,
            Some(ServerId::new(12345)),
            Duration::from_secs(300),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SelectorError::ServerNotFound(_)));
    }
}
