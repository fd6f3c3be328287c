//! Metrics and instrumentation for the relay.
//!
//! This module defines Prometheus-compatible metrics for the pipeline and
//! the HTTP intake, and exposes a small HTTP exporter that serves
//! `/metrics` in Prometheus text format.
//!
//! Typical usage:
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use relay::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! let addr: SocketAddr = "127.0.0.1:9898".parse()?;
//!
//! tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
//!
//! registry.pipeline.records_accepted.inc();
//! ```

pub mod prometheus;

pub use prometheus::{IntakeMetrics, MetricsRegistry, PipelineMetrics, run_prometheus_http_server};
