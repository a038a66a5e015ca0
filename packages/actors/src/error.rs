//! Error type for registry operations.

use queue_core::{JobId, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue already exists: {0}")]
    QueueExists(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to spawn dispatcher: {0}")]
    Spawn(String),

    #[error("Dispatcher unavailable for queue: {0}")]
    DispatcherUnavailable(String),
}
