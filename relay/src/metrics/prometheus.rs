//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry plus strongly-typed pipeline and intake metrics, and an async
//! HTTP exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, header::HeaderValue,
    server::conn::http1, service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{info, warn};

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::codec::ValidationError;

/// Metrics updated by the pipeline coordinator.
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Records that passed dedup and the codec.
    pub records_accepted: IntCounter,
    /// Records dropped as duplicates.
    pub records_duplicate: IntCounter,
    /// Records rejected by the codec, by reason.
    pub records_rejected: IntCounterVec,
    /// Batch outcomes: `confirmed`, `failed`, `skipped`.
    pub batches: IntCounterVec,
    /// Wall time of one submission attempt, in seconds.
    pub submission_seconds: Histogram,
    /// Last committed cursor.
    pub committed_cursor: IntGauge,
    /// Consecutive failed attempts for the current batch.
    pub consecutive_failures: IntGauge,
    /// Times the retry cap was crossed.
    pub retry_escalations: IntCounter,
}

impl PipelineMetrics {
    /// Registers pipeline metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let records_accepted = IntCounter::with_opts(Opts::new(
            "pipeline_records_accepted_total",
            "Records accepted into a batch",
        ))?;
        registry.register(Box::new(records_accepted.clone()))?;

        let records_duplicate = IntCounter::with_opts(Opts::new(
            "pipeline_records_duplicate_total",
            "Records dropped by duplicate suppression",
        ))?;
        registry.register(Box::new(records_duplicate.clone()))?;

        let records_rejected = IntCounterVec::new(
            Opts::new(
                "pipeline_records_rejected_total",
                "Records permanently rejected by the codec",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(records_rejected.clone()))?;
        for reason in ValidationError::REASONS {
            records_rejected.with_label_values(&[reason]);
        }

        let batches = IntCounterVec::new(
            Opts::new("pipeline_batches_total", "Batch submission outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(batches.clone()))?;
        for outcome in ["confirmed", "failed", "skipped"] {
            batches.with_label_values(&[outcome]);
        }

        let submission_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pipeline_submission_seconds",
                "Time from gas estimation to receipt for one submission attempt",
            )
            .buckets(vec![
                0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0,
            ]),
        )?;
        registry.register(Box::new(submission_seconds.clone()))?;

        let committed_cursor = IntGauge::with_opts(Opts::new(
            "pipeline_committed_cursor",
            "Last committed upstream log cursor",
        ))?;
        registry.register(Box::new(committed_cursor.clone()))?;

        let consecutive_failures = IntGauge::with_opts(Opts::new(
            "pipeline_consecutive_failures",
            "Failed submission attempts in a row for the current batch",
        ))?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        let retry_escalations = IntCounter::with_opts(Opts::new(
            "pipeline_retry_escalations_total",
            "Times a batch exceeded the configured retry cap",
        ))?;
        registry.register(Box::new(retry_escalations.clone()))?;

        Ok(Self {
            records_accepted,
            records_duplicate,
            records_rejected,
            batches,
            submission_seconds,
            committed_cursor,
            consecutive_failures,
            retry_escalations,
        })
    }
}

/// Metrics updated by the HTTP intake.
#[derive(Clone)]
pub struct IntakeMetrics {
    pub accepted: IntCounter,
    pub duplicate: IntCounter,
    pub malformed: IntCounter,
    /// Requests refused because the intake queue was full.
    pub overloaded: IntCounter,
}

impl IntakeMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        Ok(Self {
            accepted: counter("intake_accepted_total", "Records appended to the log")?,
            duplicate: counter("intake_duplicate_total", "Records refused as existing keys")?,
            malformed: counter("intake_malformed_total", "Records refused as malformed")?,
            overloaded: counter(
                "intake_overloaded_total",
                "Records refused because the intake queue was full",
            )?,
        })
    }
}

/// Wrapper around a Prometheus registry and the relay's metrics.
///
/// This is the main handle passed around in the gateway. It can be wrapped
/// in an [`Arc`] and shared across tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub pipeline: PipelineMetrics,
    pub intake: IntakeMetrics,
}

impl MetricsRegistry {
    /// Creates a fresh registry under the `relay` namespace.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("relay".to_string()), None)?;
        let pipeline = PipelineMetrics::register(&registry)?;
        let intake = IntakeMetrics::register(&registry)?;
        Ok(Self {
            registry,
            pipeline,
            intake,
        })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// Serves `GET /metrics` in the Prometheus text exposition format; all
/// other paths return 404. Intended to be spawned onto a Tokio runtime.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics exporter listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                warn!(error = %err, "prometheus HTTP connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &metrics))
}

fn route(method: &Method, path: &str, metrics: &MetricsRegistry) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => {
            let mut resp = Response::new(Full::new(Bytes::from(metrics.gather_text())));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            resp
        }
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from("not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::register(&registry).expect("register metrics");

        metrics.records_accepted.inc();
        metrics
            .records_rejected
            .with_label_values(&["unsupported_algorithm"])
            .inc();
        metrics.batches.with_label_values(&["confirmed"]).inc();
        metrics.submission_seconds.observe(1.5);
        metrics.committed_cursor.set(42);

        assert!(!registry.gather().is_empty());
        assert_eq!(
            metrics
                .records_rejected
                .with_label_values(&["unsupported_algorithm"])
                .get(),
            1
        );
    }

    #[test]
    fn registry_text_uses_relay_namespace() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.pipeline.committed_cursor.set(7);
        registry.intake.accepted.inc();

        let text = registry.gather_text();
        assert!(text.contains("relay_pipeline_committed_cursor 7"));
        assert!(text.contains("relay_intake_accepted_total 1"));
        assert!(text.contains("reason=\"invalid_account\""));
    }

    #[test]
    fn exporter_routes_metrics_and_404s() {
        let registry = MetricsRegistry::new().expect("create metrics registry");

        let ok = route(&Method::GET, "/metrics", &registry);
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(
            ok.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain; version=0.0.4"))
        );

        let missing = route(&Method::GET, "/nope", &registry);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let wrong_method = route(&Method::POST, "/metrics", &registry);
        assert_eq!(wrong_method.status(), StatusCode::NOT_FOUND);
    }
}
