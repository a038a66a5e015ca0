//! Per-queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{HealthThresholds, QueueError, RetryPolicy};

/// One day.
const MAX_METRICS_WINDOW_SECS: u64 = 86_400;

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of concurrent worker slots for this queue.
    pub concurrency: usize,
    /// Attempt budget for jobs enqueued without one.
    pub default_max_attempts: u32,
    pub retry: RetryPolicy,
    /// Per-attempt timeout in milliseconds. Off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_ms: Option<u64>,
    /// Trailing window for throughput and average duration.
    pub metrics_window_secs: u64,
    /// How long finished jobs are kept. Kept forever when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
    /// Interval between housekeeping passes (pruning, health check).
    pub housekeeping_interval_secs: u64,
    pub health: HealthThresholds,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_max_attempts: 3,
            retry: RetryPolicy::default(),
            job_timeout_ms: None,
            metrics_window_secs: 60,
            retention_secs: Some(3_600),
            housekeeping_interval_secs: 30,
            health: HealthThresholds::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.default_max_attempts == 0 {
            return Err(QueueError::InvalidConfig(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(QueueError::InvalidConfig(format!(
                "retry base delay ({}ms) exceeds max delay ({}ms)",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if !(1..=MAX_METRICS_WINDOW_SECS).contains(&self.metrics_window_secs) {
            return Err(QueueError::InvalidConfig(format!(
                "metrics_window_secs must be between 1 and {MAX_METRICS_WINDOW_SECS}"
            )));
        }
        Ok(())
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `QUEUE_CONCURRENCY`
    /// - `QUEUE_MAX_ATTEMPTS`
    /// - `QUEUE_RETRY_BASE_MS`, `QUEUE_RETRY_MAX_MS`
    /// - `QUEUE_JOB_TIMEOUT_MS` (unset: no timeout)
    /// - `QUEUE_METRICS_WINDOW_SECS`
    /// - `QUEUE_RETENTION_SECS` (`0`: keep finished jobs forever)
    /// - `QUEUE_HOUSEKEEPING_SECS`
    ///
    /// Blank values are ignored.
    pub fn from_env() -> Result<Self, QueueError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`QueueConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, QueueError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).and_then(non_empty);
        let mut cfg = Self::default();

        if let Some(v) = var("QUEUE_CONCURRENCY") {
            cfg.concurrency = parse("QUEUE_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("QUEUE_MAX_ATTEMPTS") {
            cfg.default_max_attempts = parse("QUEUE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("QUEUE_RETRY_BASE_MS") {
            cfg.retry.base_delay_ms = parse("QUEUE_RETRY_BASE_MS", &v)?;
        }
        if let Some(v) = var("QUEUE_RETRY_MAX_MS") {
            cfg.retry.max_delay_ms = parse("QUEUE_RETRY_MAX_MS", &v)?;
        }
        if let Some(v) = var("QUEUE_JOB_TIMEOUT_MS") {
            cfg.job_timeout_ms = Some(parse("QUEUE_JOB_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = var("QUEUE_METRICS_WINDOW_SECS") {
            cfg.metrics_window_secs = parse("QUEUE_METRICS_WINDOW_SECS", &v)?;
        }
        if let Some(v) = var("QUEUE_RETENTION_SECS") {
            let secs: u64 = parse("QUEUE_RETENTION_SECS", &v)?;
            cfg.retention_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = var("QUEUE_HOUSEKEEPING_SECS") {
            cfg.housekeeping_interval_secs = parse("QUEUE_HOUSEKEEPING_SECS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, QueueError> {
    value
        .parse()
        .map_err(|_| QueueError::InvalidConfig(format!("invalid {key}={value}")))
}
