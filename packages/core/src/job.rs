//! Job domain types: the unit of deferred work and its lifecycle record.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job is in its lifecycle.
///
/// ```text
/// delayed ──(delay elapsed)──> waiting ──(claim)──> active ──> completed
///    ^                                                 │
///    └──────────────(retry with backoff)───────────────┤
///                                                      └──> failed
/// waiting | delayed ──(cancel)──> cancelled
/// ```
///
/// Pausing is a queue-level gate: jobs of a paused queue stay `Waiting` and
/// are simply not claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Ready to be claimed.
    #[default]
    Waiting,
    /// Not eligible before `delay_until`.
    Delayed,
    /// Claimed by a worker slot.
    Active,
    Completed,
    /// Retries exhausted or the error was permanent.
    Failed,
    /// Cancelled before it could finish.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(JobStatus::Waiting),
            "delayed" => Ok(JobStatus::Delayed),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Value returned by a worker on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// Failure reported by a worker for one attempt.
///
/// Errors are retryable unless built with [`JobError::permanent`], in which
/// case the job fails right away whatever its remaining budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::retryable(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::retryable(message)
    }
}

/// Enqueue options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Lower values run first.
    pub priority: i32,
    /// How long to hold the job before it becomes eligible.
    pub delay: Duration,
    /// Attempt budget; `None` takes the queue default.
    pub max_attempts: Option<u32>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A job represents a unit of work to be executed by the queue system.
///
/// Records handed out by the queue are snapshots; changing them has no effect
/// on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The queue this job belongs to.
    pub queue_name: String,
    /// Logical job type, used for routing to handlers and for search.
    pub name: String,
    /// Job payload, always a JSON object.
    pub data: serde_json::Value,
    /// Stored status.
    pub status: JobStatus,
    /// Progress of the current attempt, 0-100.
    pub progress: u8,
    /// Execution priority, lower first.
    pub priority: i32,
    /// Number of attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// First time the job was claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the job failed for good.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Error of the most recent failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Set when cancellation was asked for while the job was active.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Position in the ready order among equal priorities.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Job {
    /// Create a new waiting job.
    pub fn new(
        queue_name: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
        max_attempts: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            queue_name: queue_name.into(),
            name: name.into(),
            data,
            status: JobStatus::Waiting,
            progress: 0,
            priority: 0,
            attempts: 0,
            max_attempts,
            delay_until: None,
            created_at,
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            last_error: None,
            result: None,
            cancel_requested: false,
            seq: 0,
        }
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Hold the job until `until`.
    pub fn delayed_until(mut self, until: DateTime<Utc>) -> Self {
        self.delay_until = Some(until);
        self.status = JobStatus::Delayed;
        self
    }

    /// Time from first claim to the terminal transition.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.processed_at, self.finished_at) {
            (Some(processed), Some(finished)) => Some((finished - processed).num_milliseconds()),
            _ => None,
        }
    }

    /// Whether the job may be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Waiting => true,
            JobStatus::Delayed => self.delay_until.is_none_or(|until| until <= now),
            _ => false,
        }
    }

    /// Status as reported to collaborators.
    ///
    /// A delayed job whose delay has elapsed reads as waiting even before the
    /// queue promotes it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> JobStatus {
        match self.status {
            JobStatus::Delayed if self.is_ready(now) => JobStatus::Waiting,
            other => other,
        }
    }

    /// Read-only projection for collaborators.
    pub fn view(&self, now: DateTime<Utc>) -> JobView {
        JobView {
            id: self.id,
            queue_name: self.queue_name.clone(),
            name: self.name.clone(),
            data: self.data.clone(),
            status: self.effective_status(now),
            progress: self.progress,
            priority: self.priority,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            delay_until: self.delay_until,
            created_at: self.created_at,
            processed_at: self.processed_at,
            finished_at: self.finished_at,
            failed_reason: self.failed_reason.clone(),
            last_error: self.last_error.clone(),
            result: self.result.clone(),
            cancel_requested: self.cancel_requested,
            duration_ms: self.duration_ms(),
        }
    }

    pub(crate) fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.attempts = self.attempts.saturating_add(1);
        self.processed_at.get_or_insert(now);
        self.delay_until = None;
        self.progress = 0;
    }

    pub(crate) fn set_progress(&mut self, percent: i32) {
        let percent = percent.clamp(0, 100) as u8;
        self.progress = self.progress.max(percent);
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>, result: Option<JobResult>) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(now);
        self.progress = 100;
        self.result = result;
    }

    pub(crate) fn mark_failed(&mut self, now: DateTime<Utc>, reason: String) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(now);
        self.last_error = Some(reason.clone());
        self.failed_reason = Some(reason);
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(now);
        self.delay_until = None;
    }

    /// Put the job back for another attempt. `until == None` means right away.
    pub(crate) fn schedule_retry(&mut self, until: Option<DateTime<Utc>>, error: String) {
        self.status = if until.is_some() {
            JobStatus::Delayed
        } else {
            JobStatus::Waiting
        };
        self.delay_until = until;
        self.last_error = Some(error);
    }

    pub(crate) fn promote(&mut self) {
        self.status = JobStatus::Waiting;
        self.delay_until = None;
    }
}

/// Read-only view of a job, as returned to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub queue_name: String,
    pub name: String,
    pub data: serde_json::Value,
    pub status: JobStatus,
    pub progress: u8,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}
