//! Prometheus metrics endpoint
//!
//! Exposes exactly three unlabeled gauges (`speedtest_ping`,
//! `speedtest_download`, `speedtest_upload`) plus exporter build info. All
//! metric descriptors are registered at construction time; nothing is
//! registered through global state.
//!
//! A fatal measurement error skips the speedtest gauges for that scrape
//! entirely rather than re-emitting stale values; a masked upload failure
//! emits the zero-filled sentinel so the monitoring system still receives a
//! data point.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Gauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, warn};

use crate::collector::{Collector, Measurement};

const NAMESPACE: &str = "speedtest";

/// Serves the telemetry path and the landing page
pub struct Exporter {
    collector: Arc<Collector>,
    /// Always-emitted exporter metadata
    process_registry: Registry,
    /// The three measurement gauges, emitted only on success or masked
    /// failure
    speed_registry: Registry,
    ping: Gauge,
    download: Gauge,
    upload: Gauge,
    telemetry_path: String,
}

impl Exporter {
    /// Build the exporter and register all metric descriptors
    pub fn new(
        collector: Arc<Collector>,
        telemetry_path: impl Into<String>,
    ) -> Result<Self, prometheus::Error> {
        let process_registry = Registry::new();
        let build_info = IntGaugeVec::new(
            Opts::new("build_info", "Build information of the exporter").namespace(NAMESPACE),
            &["version"],
        )?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);
        process_registry.register(Box::new(build_info))?;

        let speed_registry = Registry::new();
        let ping = Gauge::with_opts(Opts::new("ping", "Latency (ms)").namespace(NAMESPACE))?;
        let download = Gauge::with_opts(
            Opts::new("download", "Download bandwidth (Mbps).").namespace(NAMESPACE),
        )?;
        let upload =
            Gauge::with_opts(Opts::new("upload", "Upload bandwidth (Mbps).").namespace(NAMESPACE))?;
        speed_registry.register(Box::new(ping.clone()))?;
        speed_registry.register(Box::new(download.clone()))?;
        speed_registry.register(Box::new(upload.clone()))?;

        Ok(Self {
            collector,
            process_registry,
            speed_registry,
            ping,
            download,
            upload,
            telemetry_path: telemetry_path.into(),
        })
    }

    /// The configured telemetry path
    #[must_use]
    pub fn telemetry_path(&self) -> &str {
        &self.telemetry_path
    }

    fn set_gauges(&self, m: &Measurement) {
        self.ping.set(m.ping_ms);
        self.download.set(m.download_mbps);
        self.upload.set(m.upload_mbps);
    }

    /// Produce the Prometheus text exposition for one scrape
    pub async fn render(&self) -> Result<String, prometheus::Error> {
        let mut families = self.process_registry.gather();

        match self.collector.network_metrics().await {
            Ok(measurement) => {
                self.set_gauges(&measurement);
                families.extend(self.speed_registry.gather());
            }
            Err(e) if e.is_masked() => {
                warn!("Masked measurement failure, emitting zero-filled result: {}", e);
                self.set_gauges(&Measurement::zero());
                families.extend(self.speed_registry.gather());
            }
            Err(e) => {
                error!("Error during speedtest: {}", e);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("non-UTF8 exposition: {}", e)))
    }

    /// Build the axum router serving the telemetry path and landing page
    #[must_use]
    pub fn router(self: Arc<Self>) -> Router {
        let telemetry_path = self.telemetry_path.clone();
        Router::new()
            .route(&telemetry_path, get(metrics_handler))
            .route("/", get(index_handler))
            .with_state(self)
    }
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> impl IntoResponse {
    match exporter.render().await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn index_handler(State(exporter): State<Arc<Exporter>>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Speedtest Exporter</title></head>\n\
         <body>\n\
         <h1>Speedtest Exporter</h1>\n\
         <p><a href='{}'>Metrics</a></p>\n\
         </body>\n\
         </html>",
        exporter.telemetry_path()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ReferenceServer, ServerCatalog, ServerId, ServerRegistry};
    use crate::provider::MeasurementProvider;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::time::Duration;

    struct OneServerRegistry;

    #[async_trait]
    impl ServerRegistry for OneServerRegistry {
        async fn fetch_catalog(&self) -> Result<ServerCatalog> {
            Ok(ServerCatalog::new(vec![ReferenceServer {
                id: ServerId::new(1),
                name: "Paris".to_string(),
                sponsor: "Test ISP".to_string(),
                host: "paris.example.com:8080".to_string(),
                distance_km: 12.0,
            }]))
        }

        async fn fetch_closest(&self, _ids: &[ServerId]) -> Result<Vec<ReferenceServer>> {
            Ok(vec![])
        }
    }

    /// Provider returning fixed values, with optional failures per stage
    struct FixedProvider {
        fail_download: bool,
        fail_upload: bool,
    }

    #[async_trait]
    impl MeasurementProvider for FixedProvider {
        async fn ping(&self, _server: &ReferenceServer) -> Result<f64> {
            Ok(18.0)
        }

        async fn download(&self, _server: &ReferenceServer) -> Result<f64> {
            if self.fail_download {
                bail!("download refused");
            }
            Ok(95.5)
        }

        async fn upload(&self, _server: &ReferenceServer) -> Result<f64> {
            if self.fail_upload {
                bail!("upload refused");
            }
            Ok(40.25)
        }

        fn reset_accounting(&self) {}
    }

    async fn exporter(provider: FixedProvider) -> Exporter {
        let collector = Collector::new(
            Arc::new(OneServerRegistry),
            Arc::new(provider),
            None,
            Duration::from_secs(300),
        )
        .await
        .unwrap();
        Exporter::new(Arc::new(collector), "/metrics").unwrap()
    }

    #[tokio::test]
    async fn test_render_emits_all_three_gauges() {
        let exporter = exporter(FixedProvider {
            fail_download: false,
            fail_upload: false,
        })
        .await;

        let body = exporter.render().await.unwrap();
        assert!(body.contains("speedtest_ping 18"));
        assert!(body.contains("speedtest_download 95.5"));
        assert!(body.contains("speedtest_upload 40.25"));
        assert!(body.contains("speedtest_build_info"));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_speed_gauges() {
        let exporter = exporter(FixedProvider {
            fail_download: true,
            fail_upload: false,
        })
        .await;

        let body = exporter.render().await.unwrap();
        assert!(!body.contains("speedtest_ping"));
        assert!(!body.contains("speedtest_download"));
        assert!(!body.contains("speedtest_upload"));
        // Exporter metadata is still present
        assert!(body.contains("speedtest_build_info"));
    }

    #[tokio::test]
    async fn test_masked_upload_failure_emits_zeros() {
        let exporter = exporter(FixedProvider {
            fail_download: false,
            fail_upload: true,
        })
        .await;

        let body = exporter.render().await.unwrap();
        assert!(body.contains("speedtest_ping 0"));
        assert!(body.contains("speedtest_download 0"));
        assert!(body.contains("speedtest_upload 0"));
    }

    #[tokio::test]
    async fn test_telemetry_path() {
        let exporter = exporter(FixedProvider {
            fail_download: false,
            fail_upload: false,
        })
        .await;
        assert_eq!(exporter.telemetry_path(), "/metrics");
    }
}
