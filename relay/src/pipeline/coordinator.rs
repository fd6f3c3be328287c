//! The pipeline coordinator.
//!
//! A single control loop owns the dedup cache, the batch buffer and the
//! cursor. Each call to [`Coordinator::tick`] runs one state:
//!
//! ```text
//! Idle -> Reading -> Filtering -> Buffering -> Submitting -> Committing -> Reading ...
//!                                                                     \-> Stopped
//! ```
//!
//! The cursor is committed only after a batch is confirmed (or skipped as
//! empty). A failed batch is held and resubmitted after the backoff
//! interval; its keys stay *in flight* and only enter the dedup cache once
//! the batch lands.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batch::BatchBuffer;
use crate::codec;
use crate::dedup::{DedupCache, DedupStore};
use crate::ledger::LedgerClient;
use crate::metrics::PipelineMetrics;
use crate::submission::{SubmissionEngine, SubmissionError, SubmitOutcome};
use crate::types::{Batch, Cursor, LogEntry};
use crate::upstream::UpstreamLog;

use super::{BackoffPolicy, Clock, PipelineConfig, PipelineError, TokioClock};

/// Coordinator states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineState {
    Idle,
    Reading,
    Filtering,
    Buffering,
    Submitting,
    Committing,
    Stopped,
}

impl PipelineState {
    pub fn name(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Reading => "reading",
            PipelineState::Filtering => "filtering",
            PipelineState::Buffering => "buffering",
            PipelineState::Submitting => "submitting",
            PipelineState::Committing => "committing",
            PipelineState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dedup verdict for one fetched entry.
///
/// Verdicts are applied to the batch buffer in offset order so a skipped
/// offset never moves the read mark past a record still waiting to be
/// buffered.
enum Filtered {
    Fresh(LogEntry),
    Duplicate(u64),
}

/// Drives records from the upstream log to the ledger.
///
/// Generic over:
///
/// - `L`: upstream log implementing [`UpstreamLog`],
/// - `C`: ledger client implementing [`LedgerClient`],
/// - `K`: time source implementing [`Clock`].
pub struct Coordinator<L, C, K = TokioClock> {
    log: Arc<L>,
    engine: SubmissionEngine<C>,
    dedup: DedupCache,
    dedup_store: Option<DedupStore>,
    clock: K,
    cfg: PipelineConfig,
    backoff: BackoffPolicy,
    metrics: Option<PipelineMetrics>,

    state: PipelineState,
    buffer: BatchBuffer,
    read_pos: Cursor,
    committed: Cursor,
    fetched: VecDeque<LogEntry>,
    filtered: VecDeque<Filtered>,
    in_flight: HashSet<String>,
    ready: VecDeque<Batch>,
    outcome: Option<Result<SubmitOutcome, SubmissionError>>,
    failures: u32,
    pending_since: Option<Instant>,
    draining: bool,
}

impl<L, C, K> Coordinator<L, C, K>
where
    L: UpstreamLog,
    C: LedgerClient,
    K: Clock,
{
    pub fn new(
        log: Arc<L>,
        engine: SubmissionEngine<C>,
        dedup: DedupCache,
        clock: K,
        cfg: PipelineConfig,
    ) -> Self {
        let backoff = cfg.backoff();
        let buffer = BatchBuffer::new(cfg.batch_size, cfg.start_cursor);
        let start = cfg.start_cursor;

        Self {
            log,
            engine,
            dedup,
            dedup_store: None,
            clock,
            cfg,
            backoff,
            metrics: None,
            state: PipelineState::Idle,
            buffer,
            read_pos: start,
            committed: start,
            fetched: VecDeque::new(),
            filtered: VecDeque::new(),
            in_flight: HashSet::new(),
            ready: VecDeque::new(),
            outcome: None,
            failures: 0,
            pending_since: None,
            draining: false,
        }
    }

    /// Persist the dedup cache here when the coordinator stops.
    pub fn with_dedup_store(mut self, store: DedupStore) -> Self {
        self.dedup_store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Cursor last committed by this coordinator (or the resume point).
    pub fn committed_cursor(&self) -> Cursor {
        self.committed
    }

    /// Next offset the coordinator will read.
    pub fn read_position(&self) -> Cursor {
        self.read_pos
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn engine(&self) -> &SubmissionEngine<C> {
        &self.engine
    }

    /// Keys accepted into a batch that has not landed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Batches formed but not yet committed.
    pub fn ready_batches(&self) -> usize {
        self.ready.len()
    }

    /// Consecutive failed attempts for the head batch.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Runs one state and returns the state entered next.
    pub async fn tick(&mut self) -> Result<PipelineState, PipelineError> {
        let next = match self.state {
            PipelineState::Idle => self.start()?,
            PipelineState::Reading => self.read().await?,
            PipelineState::Filtering => self.filter(),
            PipelineState::Buffering => self.buffer_records(),
            PipelineState::Submitting => self.submit().await,
            PipelineState::Committing => self.commit().await?,
            PipelineState::Stopped => PipelineState::Stopped,
        };
        self.state = next;
        Ok(next)
    }

    /// Runs until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Shutdown interrupts only a pending read. A batch already being
    /// submitted gets one attempt to finish; if it fails it is abandoned
    /// without committing. The dedup cache is persisted on every exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DedupCache {
        info!(
            batch_size = self.cfg.batch_size,
            start = %self.cfg.start_cursor,
            "pipeline coordinator running"
        );

        loop {
            if self.state == PipelineState::Stopped {
                break;
            }

            if *shutdown.borrow() && !self.draining {
                match self.state {
                    PipelineState::Submitting | PipelineState::Committing => {
                        info!(state = %self.state, "shutdown requested; finishing in-flight batch");
                        self.draining = true;
                    }
                    _ => break,
                }
            }

            let step = if self.state == PipelineState::Reading && !self.draining {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            info!("shutdown channel closed");
                            break;
                        }
                        continue;
                    }
                    step = self.tick() => step,
                }
            } else {
                self.tick().await
            };

            if let Err(e) = step {
                error!(error = %e, state = %self.state, "pipeline step failed; retrying");
                self.clock.sleep(self.backoff.delay(1)).await;
            }
        }

        self.state = PipelineState::Stopped;
        self.persist_dedup();

        info!(
            committed = %self.committed,
            abandoned_batches = self.ready.len(),
            abandoned_records = self.in_flight.len(),
            "pipeline coordinator stopped"
        );
        self.dedup
    }

    fn persist_dedup(&self) {
        if let Some(store) = &self.dedup_store
            && let Err(e) = store.persist(&self.dedup)
        {
            error!(error = %e, path = %store.path().display(), "failed to persist dedup cache");
        }
    }

    fn record(&self, f: impl FnOnce(&PipelineMetrics)) {
        if let Some(m) = &self.metrics {
            f(m);
        }
    }

    fn start(&mut self) -> Result<PipelineState, PipelineError> {
        let persisted = self.log.committed_cursor()?;
        let start = persisted.unwrap_or(self.cfg.start_cursor);

        self.committed = start;
        self.read_pos = start;
        self.buffer = BatchBuffer::new(self.cfg.batch_size, start);
        self.record(|m| m.committed_cursor.set(cursor_gauge(start)));

        info!(cursor = %start, resumed = persisted.is_some(), "pipeline starting");
        Ok(PipelineState::Reading)
    }

    async fn read(&mut self) -> Result<PipelineState, PipelineError> {
        if let Some(batch) = self.flush_if_due() {
            self.ready.push_back(batch);
            return Ok(PipelineState::Submitting);
        }

        let entries = self
            .log
            .read_from(self.read_pos, self.cfg.read_count.max(1), self.cfg.read_wait)
            .await?;

        let Some(last) = entries.last() else {
            if let Some(batch) = self.flush_if_due() {
                self.ready.push_back(batch);
                return Ok(PipelineState::Submitting);
            }
            return Ok(PipelineState::Reading);
        };

        debug!(from = %self.read_pos, count = entries.len(), "read log entries");
        self.read_pos = last.next_cursor();
        self.fetched.extend(entries);
        Ok(PipelineState::Filtering)
    }

    fn filter(&mut self) -> PipelineState {
        while let Some(entry) = self.fetched.pop_front() {
            let key = &entry.record.key;
            if self.dedup.has(key) || self.in_flight.contains(key) {
                info!(offset = entry.offset, key = %key, "duplicate record dropped");
                self.record(|m| m.records_duplicate.inc());
                self.filtered.push_back(Filtered::Duplicate(entry.offset));
                continue;
            }
            self.in_flight.insert(key.clone());
            self.filtered.push_back(Filtered::Fresh(entry));
        }

        PipelineState::Buffering
    }

    fn buffer_records(&mut self) -> PipelineState {
        while let Some(verdict) = self.filtered.pop_front() {
            let entry = match verdict {
                Filtered::Fresh(entry) => entry,
                Filtered::Duplicate(offset) => {
                    self.buffer.skip(offset);
                    continue;
                }
            };
            match codec::parse_with(&entry.record, self.cfg.key_source) {
                Ok(record) => {
                    self.record(|m| m.records_accepted.inc());
                    if let Some(batch) = self.buffer.push(entry.offset, record) {
                        debug!(
                            kind = %batch.kind,
                            records = batch.len(),
                            cursor = %batch.cursor,
                            "batch full"
                        );
                        self.ready.push_back(batch);
                        // Re-armed below if records are still waiting.
                        self.pending_since = None;
                    }
                }
                Err(e) => {
                    warn!(
                        offset = entry.offset,
                        key = %entry.record.key,
                        reason = e.reason(),
                        error = %e,
                        "record rejected"
                    );
                    self.record(|m| m.records_rejected.with_label_values(&[e.reason()]).inc());
                    self.in_flight.remove(&entry.record.key);
                    self.buffer.skip(entry.offset);
                }
            }
        }

        self.touch_pending();
        if self.ready.is_empty() {
            PipelineState::Reading
        } else {
            PipelineState::Submitting
        }
    }

    async fn submit(&mut self) -> PipelineState {
        let Some(batch) = self.ready.front() else {
            return PipelineState::Reading;
        };

        let started = self.clock.now();
        let result = self.engine.submit(batch).await;

        if !matches!(result, Ok(SubmitOutcome::Skipped)) {
            let secs = self.clock.now().saturating_duration_since(started).as_secs_f64();
            self.record(|m| m.submission_seconds.observe(secs));
            self.clock.sleep(self.cfg.submit_delay).await;
        }

        self.outcome = Some(result);
        PipelineState::Committing
    }

    async fn commit(&mut self) -> Result<PipelineState, PipelineError> {
        let Some(outcome) = self.outcome.take() else {
            return Ok(PipelineState::Submitting);
        };

        match outcome {
            Ok(result) => {
                let Some(cursor) = self.ready.front().map(|b| b.cursor) else {
                    return Ok(PipelineState::Reading);
                };

                if cursor > self.committed {
                    if let Err(e) = self.log.commit_cursor(cursor) {
                        self.outcome = Some(Ok(result));
                        return Err(e.into());
                    }
                    self.committed = cursor;
                    self.record(|m| m.committed_cursor.set(cursor_gauge(cursor)));
                    info!(cursor = %cursor, "cursor committed");
                }

                if let Some(batch) = self.ready.pop_front() {
                    for key in batch.keys() {
                        self.dedup.add(key);
                        self.in_flight.remove(key);
                    }
                    let label = match result {
                        SubmitOutcome::Confirmed(_) => "confirmed",
                        SubmitOutcome::Skipped => "skipped",
                    };
                    self.record(|m| m.batches.with_label_values(&[label]).inc());
                }

                if self.failures > 0 {
                    info!(attempts = self.failures + 1, "batch landed after retries");
                }
                self.failures = 0;
                self.record(|m| m.consecutive_failures.set(0));
                self.touch_pending();

                if self.draining {
                    return Ok(PipelineState::Stopped);
                }
                Ok(if self.ready.is_empty() {
                    PipelineState::Reading
                } else {
                    PipelineState::Submitting
                })
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                let failures = self.failures;
                let (records, cursor) = self
                    .ready
                    .front()
                    .map(|b| (b.len(), b.cursor))
                    .unwrap_or((0, self.committed));

                warn!(
                    error = %e,
                    kind = e.kind(),
                    transient = e.is_transient(),
                    attempt = failures,
                    records,
                    batch_cursor = %cursor,
                    committed = %self.committed,
                    "batch submission failed; cursor not advanced"
                );
                self.record(|m| {
                    m.batches.with_label_values(&["failed"]).inc();
                    m.consecutive_failures.set(i64::from(failures));
                });

                if self.backoff.should_escalate(failures) {
                    error!(
                        failures,
                        batch_cursor = %cursor,
                        "batch still failing after retry cap; operator attention needed"
                    );
                    self.record(|m| m.retry_escalations.inc());
                }

                if self.draining {
                    warn!(batch_cursor = %cursor, "abandoning uncommitted batch on shutdown");
                    return Ok(PipelineState::Stopped);
                }

                self.clock.sleep(self.backoff.delay(failures)).await;
                Ok(PipelineState::Submitting)
            }
        }
    }

    fn flush_if_due(&mut self) -> Option<Batch> {
        let since = self.pending_since?;
        let age = self.clock.now().saturating_duration_since(since);
        if age < self.cfg.flush_interval {
            return None;
        }

        let batch = self.buffer.flush_partial();
        self.pending_since = None;
        self.touch_pending();

        if let Some(b) = &batch {
            debug!(kind = %b.kind, records = b.len(), cursor = %b.cursor, "flushing partial batch");
        }
        batch
    }

    fn touch_pending(&mut self) {
        if !self.buffer.has_unflushed() {
            self.pending_since = None;
        } else if self.pending_since.is_none() {
            self.pending_since = Some(self.clock.now());
        }
    }
}

fn cursor_gauge(cursor: Cursor) -> i64 {
    i64::try_from(cursor.offset()).unwrap_or(i64::MAX)
}
