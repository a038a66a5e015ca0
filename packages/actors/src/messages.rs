//! Message types for actor communication.

use queue_core::{Job, JobId};
use ractor::{ActorId, RpcReplyPort};
use serde::Serialize;

use crate::handler::HandlerResult;

/// Messages for the Dispatcher.
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Hand ready jobs to idle slots (job enqueued, queue resumed, timer fired).
    Dispatch,

    /// A worker slot finished running a job.
    JobFinished {
        worker: ActorId,
        job_id: JobId,
        outcome: HandlerResult,
    },

    /// Periodic housekeeping.
    Tick,

    /// Stop claiming, let in-flight jobs finish, then stop.
    Shutdown,

    /// Get dispatcher info.
    GetInfo { reply: RpcReplyPort<DispatcherInfo> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a claimed job.
    ProcessJob { job: Box<Job> },

    /// Shutdown the worker.
    Shutdown,
}

/// Snapshot of a dispatcher's slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherInfo {
    pub queue_name: String,
    pub concurrency: usize,
    pub idle: usize,
    pub busy: usize,
    pub paused: bool,
    pub draining: bool,
}
