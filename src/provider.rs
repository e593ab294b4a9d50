//! Measurement probes against a speedtest server
//!
//! The provider is a stateless collaborator from the collector's point of
//! view, except for transfer accounting: downloads and uploads accumulate a
//! byte counter that the collector resets after each successful run so
//! consecutive runs do not compound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rand::RngCore;
use tracing::debug;

use crate::catalog::ReferenceServer;

/// Number of round trips used for the latency probe
const PING_SAMPLES: usize = 3;

/// Sizes (pixels per side) of the random images requested by the download
/// probe; the payload is roughly `2 * size^2` bytes
const DOWNLOAD_SIZES: [u32; 2] = [1500, 2500];

/// Upload payload size in bytes per request
const UPLOAD_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Number of upload requests per probe
const UPLOAD_REQUESTS: usize = 2;

/// Performs latency, download, and upload probes against a reference server
#[async_trait]
pub trait MeasurementProvider: Send + Sync {
    /// Measure round-trip latency in milliseconds
    async fn ping(&self, server: &ReferenceServer) -> Result<f64>;

    /// Measure download bandwidth in megabits per second
    async fn download(&self, server: &ReferenceServer) -> Result<f64>;

    /// Measure upload bandwidth in megabits per second
    async fn upload(&self, server: &ReferenceServer) -> Result<f64>;

    /// Clear accumulated transfer accounting
    fn reset_accounting(&self);
}

/// HTTP-based measurement provider using the classic speedtest endpoints
#[derive(Debug)]
pub struct HttpProvider {
    client: reqwest::Client,
    /// Bytes moved by download/upload probes since the last reset
    transferred_bytes: AtomicU64,
}

impl HttpProvider {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            transferred_bytes: AtomicU64::new(0),
        }
    }

    /// Bytes accumulated since the last `reset_accounting` call
    #[must_use]
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    fn latency_url(server: &ReferenceServer) -> String {
        format!("http://{}/speedtest/latency.txt", server.host)
    }

    fn download_url(server: &ReferenceServer, size: u32) -> String {
        format!("http://{}/speedtest/random{size}x{size}.jpg", server.host)
    }

    fn upload_url(server: &ReferenceServer) -> String {
        format!("http://{}/speedtest/upload.php", server.host)
    }

    /// Convert a transfer of `bytes` over `elapsed` into Mbps
    fn mbps(bytes: u64, elapsed: Duration) -> Result<f64> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            bail!("transfer completed in zero time");
        }
        Ok(bytes as f64 * 8.0 / secs / 1_000_000.0)
    }
}

#[async_trait]
impl MeasurementProvider for HttpProvider {
    async fn ping(&self, server: &ReferenceServer) -> Result<f64> {
        let url = Self::latency_url(server);
        let mut best: Option<Duration> = None;

        for _ in 0..PING_SAMPLES {
            let start = Instant::now();
            self.client
                .get(&url)
                .send()
                .await
                .context("latency request failed")?
                .error_for_status()
                .context("latency request rejected")?;
            let elapsed = start.elapsed();

            best = Some(match best {
                Some(b) if b < elapsed => b,
                _ => elapsed,
            });
        }

        // PING_SAMPLES > 0, so best is always set by this point
        let best = best.context("no latency samples collected")?;
        debug!("Best of {} latency samples: {:?}", PING_SAMPLES, best);
        Ok(best.as_secs_f64() * 1000.0)
    }

    async fn download(&self, server: &ReferenceServer) -> Result<f64> {
        let mut total_bytes = 0u64;
        let start = Instant::now();

        for size in DOWNLOAD_SIZES {
            let url = Self::download_url(server, size);
            let body = self
                .client
                .get(&url)
                .send()
                .await
                .context("download request failed")?
                .error_for_status()
                .context("download request rejected")?
                .bytes()
                .await
                .context("download transfer interrupted")?;
            total_bytes += body.len() as u64;
        }

        let elapsed = start.elapsed();
        self.transferred_bytes
            .fetch_add(total_bytes, Ordering::Relaxed);
        Self::mbps(total_bytes, elapsed)
    }

    async fn upload(&self, server: &ReferenceServer) -> Result<f64> {
        // Random payload so transparent compression cannot inflate the result
        let mut payload = vec![0u8; UPLOAD_CHUNK_BYTES];
        rand::thread_rng().fill_bytes(&mut payload);

        let url = Self::upload_url(server);
        let mut total_bytes = 0u64;
        let start = Instant::now();

        for _ in 0..UPLOAD_REQUESTS {
            self.client
                .post(&url)
                .body(payload.clone())
                .send()
                .await
                .context("upload request failed")?
                .error_for_status()
                .context("upload request rejected")?;
            total_bytes += payload.len() as u64;
        }

        let elapsed = start.elapsed();
        self.transferred_bytes
            .fetch_add(total_bytes, Ordering::Relaxed);
        Self::mbps(total_bytes, elapsed)
    }

    fn reset_accounting(&self) {
        self.transferred_bytes.store(0, Ordering::Relaxed);
    }
}
