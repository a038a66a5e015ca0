//! Core of the job queue system.
//!
//! This crate is synchronous and runtime-agnostic:
//! - Job, JobStatus and JobView for work items
//! - JobQueue for the per-queue state machine (claim, retry, cancel, pause)
//! - RetryPolicy for exponential backoff
//! - HealthAnalyzer for turning counts and metrics into a health report
//! - QueueConfig for per-queue settings

mod clock;
mod config;
mod error;
mod health;
mod job;
mod metrics;
mod queue;
mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueConfig;
pub use error::QueueError;
pub use health::{
    HealthAnalyzer, HealthIssue, HealthMetrics, HealthReport, HealthThresholds, Recommendation,
};
pub use job::{Job, JobError, JobId, JobOptions, JobResult, JobStatus, JobView, UnknownStatus};
pub use metrics::QueueMetrics;
pub use queue::{CancelOutcome, FailOutcome, JobQueue, QueueCounts};
pub use retry::RetryPolicy;
