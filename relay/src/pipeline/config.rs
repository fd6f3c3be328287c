use std::time::Duration;

use crate::codec::KeySource;
use crate::types::Cursor;

use super::BackoffPolicy;

/// Pipeline coordinator configuration.
///
/// This covers batching (`batch_size`), the read loop (`read_count`,
/// `read_wait`, `flush_interval`) and pacing/retry (`submit_delay`,
/// `retry_interval`, `max_retries`).
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Records per submitted batch.
    pub batch_size: usize,
    /// Cursor used when the log has no committed cursor yet.
    pub start_cursor: Cursor,
    /// Maximum entries fetched per read.
    pub read_count: usize,
    /// How long one read waits for new entries.
    pub read_wait: Duration,
    /// Age after which a non-full batch is flushed.
    pub flush_interval: Duration,
    /// Pause after every submission attempt.
    pub submit_delay: Duration,
    /// Wait before resubmitting a failed batch.
    pub retry_interval: Duration,
    /// Consecutive failures before an operator alert. Retries continue.
    pub max_retries: Option<u32>,
    /// Source of the 32-byte key field.
    pub key_source: KeySource,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            start_cursor: Cursor(0),
            read_count: 100,
            read_wait: Duration::from_secs(1),
            flush_interval: Duration::from_secs(5),
            submit_delay: Duration::from_millis(100),
            retry_interval: Duration::from_secs(1),
            max_retries: None,
            key_source: KeySource::default(),
        }
    }
}

impl PipelineConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        let policy = BackoffPolicy::fixed(self.retry_interval);
        match self.max_retries {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }
}
