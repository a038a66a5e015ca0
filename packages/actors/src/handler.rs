//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use queue_core::{Job, JobError, JobId, JobQueue, JobResult};

/// Result type for job handlers.
pub type HandlerResult = Result<JobResult, JobError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// What a handler sees of the job it runs.
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    queue: Arc<JobQueue>,
}

impl JobContext {
    pub(crate) fn new(job: Job, queue: Arc<JobQueue>) -> Self {
        Self { job, queue }
    }

    /// Snapshot of the job as it was claimed.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.job.data
    }

    /// 1-based number of the running attempt.
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }

    /// Record progress (0-100). Decreases are ignored.
    pub fn report_progress(&self, percent: i32) {
        if let Err(err) = self.queue.report_progress(self.job.id, percent) {
            tracing::debug!(job_id = %self.job.id, error = %err, "Progress update dropped");
        }
    }

    /// Whether cancellation was requested. Long-running handlers should poll
    /// this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.queue.is_cancel_requested(self.job.id)
    }
}

/// Trait for job handlers.
///
/// Implement this trait to define how jobs are processed. Returning
/// `Err(JobError::permanent(..))` fails the job without further retries.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job and return the result.
    fn handle(&self, ctx: JobContext) -> HandlerFuture;
}

/// Routes jobs to handlers by job name.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job name, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, job_name: impl Into<String>, handler: H) {
        self.handlers.insert(job_name.into(), Arc::new(handler));
    }

    pub fn with<H: JobHandler>(mut self, job_name: impl Into<String>, handler: H) -> Self {
        self.register(job_name, handler);
        self
    }

    /// Get a handler for a job name.
    pub fn get(&self, job_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_name).cloned()
    }

    pub fn has_handler(&self, job_name: &str) -> bool {
        self.handlers.contains_key(job_name)
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl JobHandler for HandlerRegistry {
    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        match self.get(ctx.name()) {
            Some(handler) => handler.handle(ctx),
            None => {
                let name = ctx.name().to_string();
                Box::pin(async move {
                    Err(JobError::permanent(format!("no handler for job: {name}")))
                })
            }
        }
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F> {
    handler: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin((self.handler)(ctx))
    }
}

/// Helper macro for creating job handlers from async blocks.
///
/// ```ignore
/// let handler = job_handler!(|ctx| {
///     ctx.report_progress(50);
///     Ok(JobResult::new("done"))
/// });
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$ctx:ident| $body:expr) => {
        $crate::FnHandler::new(move |$ctx: $crate::JobContext| async move {
            let result: $crate::HandlerResult = $body;
            result
        })
    };
}
