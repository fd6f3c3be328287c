//! Relay library crate.
//!
//! This crate provides the building blocks for relaying argon2id hash
//! records from a durable intake log into the ledger contract:
//!
//! - strongly-typed domain types (`types`),
//! - the record codec that validates and packs records (`codec`),
//! - a bloom-filter dedup cache with snapshot persistence (`dedup`),
//! - the per-kind batch buffer (`batch`),
//! - the upstream log capability and its backends (`upstream`),
//! - the ledger client capability and its ethers implementation (`ledger`),
//! - gas-aware bulk submission (`submission`),
//! - the pipeline coordinator state machine (`pipeline`),
//! - Prometheus-based metrics (`metrics`),
//! - and a top-level relay configuration (`config`).
//!
//! The `relay-gateway` binary composes these pieces with an HTTP intake.

pub mod batch;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod submission;
pub mod types;
pub mod upstream;

// Re-export top-level configuration types.
pub use config::{ConfigError, IntakeConfig, MetricsConfig, RelayConfig};

// Re-export the record codec entry points.
pub use codec::{KeySource, ValidationError, parse, parse_with};

// Re-export dedup, batching and submission.
pub use batch::BatchBuffer;
pub use dedup::{BloomFilter, DedupCache, DedupConfig, DedupError, DedupStore};
pub use submission::{
    SubmissionConfig, SubmissionEngine, SubmissionError, SubmissionMode, SubmitOutcome,
};

// Re-export the external capabilities and their backends.
pub use ledger::{
    EthersLedgerClient, LedgerCall, LedgerClient, LedgerConfig, LedgerError, Receipt, TxHandle,
    TxOptions,
};
pub use upstream::{AppendOutcome, LogError, MemoryLog, RocksDbLog, RocksDbLogConfig, UpstreamLog};

// Re-export the coordinator.
pub use pipeline::{
    BackoffPolicy, Clock, Coordinator, ManualClock, PipelineConfig, PipelineError, PipelineState,
    TokioClock,
};

// Re-export metrics registry and exporter.
pub use metrics::{IntakeMetrics, MetricsRegistry, PipelineMetrics, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;

/// Type alias for the default upstream log backend.
pub type DefaultUpstreamLog = RocksDbLog;

/// Type alias for the default ledger client.
pub type DefaultLedgerClient = EthersLedgerClient;

/// Type alias for the default coordinator stack.
///
/// This uses:
///
/// - [`DefaultUpstreamLog`] (RocksDB),
/// - [`DefaultLedgerClient`] (ethers over HTTP JSON-RPC),
/// - [`TokioClock`] (wall-clock time).
pub type DefaultCoordinator = Coordinator<DefaultUpstreamLog, DefaultLedgerClient, TokioClock>;
