//! Error types for queue operations.

use crate::JobId;

/// Errors returned synchronously by [`crate::JobQueue`] operations.
///
/// Worker failures are not represented here: they are recorded on the job
/// itself (see [`crate::JobError`]) and never propagate as errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Malformed enqueue input; the job never entered the queue.
    #[error("invalid job spec: {0}")]
    InvalidJobSpec(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid queue config: {0}")]
    InvalidConfig(String),
}
