//! Worker actor: one execution slot of a queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use queue_core::{JobError, JobQueue};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::handler::{HandlerResult, JobContext, JobHandler};
use crate::messages::{DispatcherMessage, WorkerMessage};

/// Worker actor arguments.
pub struct WorkerArgs {
    pub queue: Arc<JobQueue>,
    pub handler: Arc<dyn JobHandler>,
    pub dispatcher: ActorRef<DispatcherMessage>,
    /// Per-attempt time limit, if any.
    pub timeout: Option<Duration>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    dispatcher: ActorRef<DispatcherMessage>,
    timeout: Option<Duration>,
}

/// Worker actor that executes jobs handed to it by its dispatcher.
///
/// A worker runs one job at a time. Handler errors, panics and timeouts all
/// come back to the dispatcher as a failed outcome; none of them stop the
/// worker.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!(queue = %args.queue.name(), worker = %myself.get_id(), "Starting worker");
        Ok(WorkerActorState {
            queue: args.queue,
            handler: args.handler,
            dispatcher: args.dispatcher,
            timeout: args.timeout,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { job } => {
                let job_id = job.id;
                let ctx = JobContext::new(*job, Arc::clone(&state.queue));
                let outcome = run(Arc::clone(&state.handler), ctx, state.timeout).await;

                state.dispatcher.send_message(DispatcherMessage::JobFinished {
                    worker: myself.get_id(),
                    job_id,
                    outcome,
                })?;
            }

            WorkerMessage::Shutdown => {
                tracing::debug!(
                    queue = %state.queue.name(),
                    worker = %myself.get_id(),
                    "Shutting down worker"
                );
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Run one attempt, turning panics and timeouts into retryable errors.
async fn run(
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
    timeout: Option<Duration>,
) -> HandlerResult {
    // The handler is invoked inside the future so a panic while building it
    // is caught too.
    let attempt = AssertUnwindSafe(async move { handler.handle(ctx).await }).catch_unwind();

    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(caught) => caught,
            Err(_) => {
                return Err(JobError::retryable(format!(
                    "job timed out after {}ms",
                    limit.as_millis()
                )));
            }
        },
        None => attempt.await,
    };

    caught.unwrap_or_else(|panic| {
        Err(JobError::retryable(format!(
            "job panicked: {}",
            panic_message(&*panic)
        )))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
