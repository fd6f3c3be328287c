//! Pipeline coordination.
//!
//! This module contains:
//!
//! - the [`Coordinator`] state machine that moves records from the upstream
//!   log through dedup, the codec and the batch buffer to the submission
//!   engine, and commits the cursor,
//! - its configuration ([`PipelineConfig`]),
//! - the retry policy ([`BackoffPolicy`]),
//! - and the injected time source ([`Clock`]).

pub mod backoff;
pub mod clock;
pub mod config;
pub mod coordinator;

use std::fmt;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::PipelineConfig;
pub use coordinator::{Coordinator, PipelineState};

use crate::upstream::LogError;

/// Errors that interrupt a coordinator step.
///
/// Record-level and submission failures are handled inside the state
/// machine, and a dedup snapshot failure is only logged, so the upstream
/// log is the one source left.
#[derive(Debug)]
pub enum PipelineError {
    Log(LogError),
}

impl From<LogError> for PipelineError {
    fn from(e: LogError) -> Self {
        PipelineError::Log(e)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Log(e) => write!(f, "upstream log: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}
