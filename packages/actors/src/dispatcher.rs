//! Dispatcher actor: feeds one queue's jobs to its pool of worker slots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{FailOutcome, JobError, JobId, JobQueue};
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::task::JoinHandle;

use crate::handler::{HandlerResult, JobHandler};
use crate::messages::{DispatcherInfo, DispatcherMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Dispatcher actor arguments.
pub struct DispatcherArgs {
    pub queue: Arc<JobQueue>,
    pub handler: Arc<dyn JobHandler>,
}

struct BusySlot {
    worker: ActorRef<WorkerMessage>,
    job_id: JobId,
}

struct WakeTimer {
    at: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// State for the dispatcher actor.
pub struct DispatcherState {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    idle: Vec<ActorRef<WorkerMessage>>,
    busy: HashMap<ActorId, BusySlot>,
    draining: bool,
    wake: Option<WakeTimer>,
    housekeeping: Option<JoinHandle<()>>,
}

impl DispatcherState {
    fn info(&self) -> DispatcherInfo {
        DispatcherInfo {
            queue_name: self.queue.name().to_string(),
            concurrency: self.queue.config().concurrency,
            idle: self.idle.len(),
            busy: self.busy.len(),
            paused: self.queue.is_paused(),
            draining: self.draining,
        }
    }
}

/// Dispatcher actor that owns the worker slots of a single queue.
///
/// The dispatcher only claims jobs when it has an idle slot, so at most
/// `concurrency` jobs of the queue run at once. It never polls: it reacts to
/// enqueues, finished jobs, resumes and a single timer armed for the next
/// delayed job.
pub struct Dispatcher;

impl Dispatcher {
    async fn spawn_worker(
        &self,
        myself: &ActorRef<DispatcherMessage>,
        state: &DispatcherState,
    ) -> Result<ActorRef<WorkerMessage>, ActorProcessingErr> {
        let args = WorkerArgs {
            queue: Arc::clone(&state.queue),
            handler: Arc::clone(&state.handler),
            dispatcher: myself.clone(),
            timeout: state.queue.config().job_timeout(),
        };

        let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;
        Ok(worker)
    }

    /// Hand ready jobs to idle slots until one side runs out.
    fn dispatch(&self, myself: &ActorRef<DispatcherMessage>, state: &mut DispatcherState) {
        if state.draining {
            return;
        }

        while let Some(worker) = state.idle.pop() {
            let Some(job) = state.queue.claim_next() else {
                state.idle.push(worker);
                break;
            };

            let job_id = job.id;
            match worker.send_message(WorkerMessage::ProcessJob { job: Box::new(job) }) {
                Ok(()) => {
                    state.busy.insert(worker.get_id(), BusySlot { worker, job_id });
                }
                Err(e) => {
                    // The slot is gone; supervision replaces it.
                    tracing::warn!(
                        queue = %state.queue.name(),
                        job_id = %job_id,
                        "Worker unavailable: {}",
                        e
                    );
                    record_outcome(
                        &state.queue,
                        job_id,
                        Err(JobError::retryable("worker unavailable")),
                    );
                }
            }
        }

        self.arm_wake(myself, state);
    }

    /// Arm a one-shot timer for the next delayed job, if a slot could take it.
    fn arm_wake(&self, myself: &ActorRef<DispatcherMessage>, state: &mut DispatcherState) {
        if state.idle.is_empty() || state.queue.is_paused() {
            return;
        }
        let Some(at) = state.queue.next_wake() else {
            return;
        };
        if let Some(wake) = &state.wake
            && !wake.task.is_finished()
            && wake.at <= at
        {
            return;
        }
        if let Some(previous) = state.wake.take() {
            previous.task.abort();
        }

        let delay = (at - state.queue.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let myself = myself.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = myself.send_message(DispatcherMessage::Dispatch);
        });
        state.wake = Some(WakeTimer { at, task });
    }

    fn housekeeping(&self, state: &DispatcherState) {
        if let Some(retention) = state.queue.config().retention() {
            state.queue.prune_finished(retention);
        }

        let report = state.queue.health();
        for issue in &report.issues {
            tracing::warn!(
                queue = %report.queue_name,
                issue = %issue,
                backlog = report.metrics.backlog_size,
                error_rate = report.metrics.error_rate,
                "Queue health issue"
            );
        }
    }

    /// A slot went away. Fail its job, if it had one, and replace it.
    async fn replace_worker(
        &self,
        myself: &ActorRef<DispatcherMessage>,
        state: &mut DispatcherState,
        cell: ActorCell,
        reason: String,
    ) -> Result<(), ActorProcessingErr> {
        let id = cell.get_id();
        let known = if let Some(slot) = state.busy.remove(&id) {
            record_outcome(
                &state.queue,
                slot.job_id,
                Err(JobError::retryable(format!("worker terminated: {reason}"))),
            );
            true
        } else if let Some(pos) = state.idle.iter().position(|w| w.get_id() == id) {
            state.idle.swap_remove(pos);
            true
        } else {
            false
        };

        if state.draining {
            if state.busy.is_empty() {
                myself.stop(None);
            }
            return Ok(());
        }
        if !known {
            return Ok(());
        }

        tracing::warn!(queue = %state.queue.name(), worker = %id, "Worker terminated: {}", reason);
        let worker = self.spawn_worker(myself, state).await?;
        state.idle.push(worker);
        self.dispatch(myself, state);
        Ok(())
    }
}

/// Apply a worker's outcome to the queue.
fn record_outcome(queue: &JobQueue, job_id: JobId, outcome: HandlerResult) {
    let applied = match outcome {
        Ok(result) => queue.complete(job_id, Some(result)).map(|_| ()),
        Err(error) => queue.fail(job_id, &error).map(|outcome| {
            if let FailOutcome::Retrying { delay_until } = outcome {
                tracing::debug!(
                    queue = %queue.name(),
                    job_id = %job_id,
                    ?delay_until,
                    "Job will be retried"
                );
            }
        }),
    };
    if let Err(e) = applied {
        tracing::warn!(
            queue = %queue.name(),
            job_id = %job_id,
            "Failed to record job outcome: {}",
            e
        );
    }
}

impl Actor for Dispatcher {
    type Msg = DispatcherMessage;
    type State = DispatcherState;
    type Arguments = DispatcherArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let config = args.queue.config().clone();
        tracing::info!(
            queue = %args.queue.name(),
            concurrency = config.concurrency,
            "Starting dispatcher"
        );

        let mut state = DispatcherState {
            queue: args.queue,
            handler: args.handler,
            idle: Vec::with_capacity(config.concurrency),
            busy: HashMap::new(),
            draining: false,
            wake: None,
            housekeeping: None,
        };

        for _ in 0..config.concurrency {
            let worker = self.spawn_worker(&myself, &state).await?;
            state.idle.push(worker);
        }

        // Start periodic housekeeping
        let period = config.housekeeping_interval();
        let myself_clone = myself.clone();
        state.housekeeping = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if myself_clone.send_message(DispatcherMessage::Tick).is_err() {
                    break;
                }
            }
        }));

        // Pick up jobs enqueued before the dispatcher started.
        myself.send_message(DispatcherMessage::Dispatch)?;

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DispatcherMessage::Dispatch => {
                self.dispatch(&myself, state);
            }

            DispatcherMessage::JobFinished {
                worker,
                job_id,
                outcome,
            } => {
                record_outcome(&state.queue, job_id, outcome);

                let Some(slot) = state.busy.remove(&worker) else {
                    return Ok(());
                };
                if state.draining {
                    let _ = slot.worker.send_message(WorkerMessage::Shutdown);
                    if state.busy.is_empty() {
                        myself.stop(None);
                    }
                    return Ok(());
                }

                state.idle.push(slot.worker);
                self.dispatch(&myself, state);
            }

            DispatcherMessage::Tick => {
                self.housekeeping(state);
                self.dispatch(&myself, state);
            }

            DispatcherMessage::Shutdown => {
                tracing::info!(
                    queue = %state.queue.name(),
                    in_flight = state.busy.len(),
                    "Shutting down dispatcher"
                );
                state.draining = true;
                if let Some(wake) = state.wake.take() {
                    wake.task.abort();
                }
                for worker in state.idle.drain(..) {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                if state.busy.is_empty() {
                    myself.stop(None);
                }
            }

            DispatcherMessage::GetInfo { reply } => {
                let _ = reply.send(state.info());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                let reason = reason.unwrap_or_else(|| "stopped".to_string());
                self.replace_worker(&myself, state, cell, reason).await?;
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                self.replace_worker(&myself, state, cell, err.to_string()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(task) = state.housekeeping.take() {
            task.abort();
        }
        if let Some(wake) = state.wake.take() {
            wake.task.abort();
        }
        tracing::info!(queue = %state.queue.name(), "Dispatcher stopped");
        Ok(())
    }
}
