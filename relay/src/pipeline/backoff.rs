use std::time::Duration;

/// Fixed-interval retry policy with an optional escalation threshold.
///
/// Crossing `max_attempts` never stops retries; it only tells the caller
/// to raise an operator-visible alert.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl BackoffPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max.max(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Wait before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, _failures: u32) -> Duration {
        self.interval
    }

    /// `true` exactly once, when `failures` reaches the threshold.
    pub fn should_escalate(&self, failures: u32) -> bool {
        self.max_attempts == Some(failures)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}
