//! Actor system for the job queue.
//!
//! This crate runs the queues of [`queue_core`] on Ractor actors.
//!
//! # Architecture
//!
//! - `QueueRegistry` - Owns the queues by name; the API collaborators call
//! - `Dispatcher` - One per queue; claims jobs and hands them to idle slots
//! - `WorkerActor` - One execution slot; runs a job handler
//!
//! # Usage
//!
//! ```ignore
//! use actors::{HandlerRegistry, QueueRegistry, job_handler};
//! use queue_core::{JobOptions, JobResult, QueueConfig};
//!
//! let registry = QueueRegistry::new();
//! let handlers = HandlerRegistry::new()
//!     .with("publish-post", job_handler!(|ctx| Ok(JobResult::new("published"))));
//! registry.create_queue("publishing", QueueConfig::default(), handlers).await?;
//!
//! registry.enqueue("publishing", "publish-post", json!({"post": 7}), JobOptions::new())?;
//! ```

mod dispatcher;
mod error;
mod handler;
mod messages;
mod registry;
mod worker_actor;

pub use dispatcher::{Dispatcher, DispatcherArgs};
pub use error::RegistryError;
pub use handler::{
    FnHandler, HandlerFuture, HandlerRegistry, HandlerResult, JobContext, JobHandler,
};
pub use messages::{DispatcherInfo, DispatcherMessage, WorkerMessage};
pub use registry::{JobFilter, JobPage, MAX_PAGE_SIZE, QueueRegistry};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
