//! Shared application state and the intake appender.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use relay::{AppendOutcome, KeySource, LogError, MetricsRegistry, RawRecord, UpstreamLog};

/// One record waiting to be appended to the upstream log.
pub struct IntakeRequest {
    pub record: RawRecord,
    pub reply: oneshot::Sender<Result<AppendOutcome, LogError>>,
}

/// Sending half of the bounded intake queue.
pub type IntakeQueue = mpsc::Sender<IntakeRequest>;

/// Shared state held by the request handlers.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor.
pub struct AppState {
    /// Queue drained by [`run_appender`].
    pub intake: IntakeQueue,
    /// Upstream log, read directly for `/status`.
    pub log: Arc<dyn UpstreamLog>,
    /// Metrics registry shared with the coordinator.
    pub metrics: Arc<MetricsRegistry>,
    /// Key source used to pre-validate submissions.
    pub key_source: KeySource,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;

/// Appends queued records in arrival order until every sender is dropped.
///
/// This is the only writer of the upstream log, so handlers never contend
/// on it and a burst of requests is bounded by the queue capacity.
pub async fn run_appender(log: Arc<dyn UpstreamLog>, mut rx: mpsc::Receiver<IntakeRequest>) {
    tracing::info!("intake appender running");

    while let Some(req) = rx.recv().await {
        let result = log.append(&req.record);
        match &result {
            Ok(AppendOutcome::Appended { offset }) => {
                tracing::debug!(offset, key = %req.record.key, "record appended");
            }
            Ok(AppendOutcome::Duplicate) => {
                tracing::debug!(key = %req.record.key, "duplicate key at intake");
            }
            Err(e) => {
                tracing::error!(error = %e, key = %req.record.key, "failed to append record");
            }
        }
        // The handler may have gone away; the append stands either way.
        let _ = req.reply.send(result);
    }

    tracing::info!("intake appender stopped");
}
