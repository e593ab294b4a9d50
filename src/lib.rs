//! Prometheus exporter for speedtest measurements
//!
//! Probes a speedtest reference server for latency, download, and upload
//! bandwidth and exposes the results as Prometheus gauges. Measurements are
//! expensive and saturate the link while they run, so they are cached: a
//! scrape inside the validity window is served from the cache, and a mutex
//! held across the whole measurement pipeline guarantees at most one run at
//! a time no matter how many scrapers poll the endpoint.

pub mod args;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod error;
pub mod exporter;
pub mod logging;
pub mod provider;
pub mod selector;

pub use args::Args;
pub use catalog::{HttpRegistry, ReferenceServer, ServerCatalog, ServerId, ServerRegistry};
pub use collector::{Collector, Measurement};
pub use config::{Config, load_config};
pub use error::{CollectorError, ProbeError, ProbeStage, SelectorError};
pub use exporter::Exporter;
pub use provider::{HttpProvider, MeasurementProvider};
pub use selector::{Selection, ServerSelector};
