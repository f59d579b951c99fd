//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Retries without sleeping. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// What to do when a run for the same source is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Queue behind the in-flight run
    #[default]
    Wait,
    /// Return `Skipped` immediately
    Skip,
}

/// Configuration for [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for one fetch attempt
    pub fetch_timeout: Duration,

    /// Deadline for one extractor call
    pub extraction_timeout: Duration,

    pub fetch_retry: RetryPolicy,
    pub extraction_retry: RetryPolicy,
    pub persistence_retry: RetryPolicy,

    pub lock_policy: LockPolicy,

    /// Extractor invocations compared per extraction (minimum 1)
    pub self_check_runs: usize,

    /// Write an audit revision when normalization fails
    pub record_normalization_failures: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(120),
            fetch_retry: RetryPolicy::default(),
            extraction_retry: RetryPolicy::default(),
            persistence_retry: RetryPolicy::new(5, Duration::from_millis(200), Duration::from_secs(10)),
            lock_policy: LockPolicy::Wait,
            self_check_runs: 2,
            record_normalization_failures: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_extraction_retry(mut self, policy: RetryPolicy) -> Self {
        self.extraction_retry = policy;
        self
    }

    pub fn with_persistence_retry(mut self, policy: RetryPolicy) -> Self {
        self.persistence_retry = policy;
        self
    }

    /// Apply the same policy to every stage.
    pub fn with_retry(self, policy: RetryPolicy) -> Self {
        self.with_fetch_retry(policy)
            .with_extraction_retry(policy)
            .with_persistence_retry(policy)
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn with_self_check_runs(mut self, runs: usize) -> Self {
        self.self_check_runs = runs.max(1);
        self
    }

    pub fn with_record_normalization_failures(mut self, record: bool) -> Self {
        self.record_normalization_failures = record;
        self
    }
}
