//! In-memory job queue: owns every job of one named queue and enforces the job
//! state machine.
//!
//! All mutations go through a single write lock, so a job is handed to at
//! most one caller of [`JobQueue::claim_next`]. Ready jobs are ordered by
//! `(priority, seq)` and delayed jobs by `(delay_until, seq)`. Heap entries are
//! never removed eagerly: cancelled or re-queued jobs leave stale entries that
//! are skipped when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::MetricsWindow;
use crate::{
    Clock, HealthAnalyzer, HealthReport, Job, JobError, JobId, JobOptions, JobResult, JobStatus,
    JobView, QueueConfig, QueueError, QueueMetrics, SystemClock,
};

/// Number of jobs per status, taken in a single pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    /// Waiting jobs held back by a paused queue. They are also counted in
    /// `waiting`.
    pub paused: u64,
    pub cancelled: u64,
}

impl QueueCounts {
    /// Jobs not yet executing: waiting + delayed.
    pub fn backlog(&self) -> u64 {
        self.waiting + self.delayed
    }

    pub fn total(&self) -> u64 {
        self.waiting
            + self.active
            + self.completed
            + self.failed
            + self.delayed
            + self.cancelled
    }

    fn add(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Waiting => &mut self.waiting,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Active => &mut self.active,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

/// What [`JobQueue::fail`] did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt. `None` means immediately eligible.
    Retrying { delay_until: Option<DateTime<Utc>> },
    /// Retries exhausted or the error was permanent.
    Failed,
    /// Cancellation was requested while the attempt ran.
    Cancelled,
    /// The job was not active; nothing changed.
    Ignored,
}

/// What [`JobQueue::cancel`] did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was waiting or delayed and is now cancelled.
    Cancelled,
    /// The job is running; its worker is asked to stop.
    CancelRequested,
    /// The job had already reached a terminal state.
    AlreadyFinished,
}

type ReadyKey = Reverse<(i32, u64, JobId)>;
type DelayedKey = Reverse<(DateTime<Utc>, u64, JobId)>;

struct QueueInner {
    jobs: HashMap<JobId, Job>,
    ready: BinaryHeap<ReadyKey>,
    delayed: BinaryHeap<DelayedKey>,
    next_seq: u64,
    metrics: MetricsWindow,
}

impl QueueInner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Give the job a fresh position and push it on the heap matching its status.
    fn schedule(&mut self, id: JobId) {
        let seq = self.next_seq();
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        job.seq = seq;
        match (job.status, job.delay_until) {
            (JobStatus::Delayed, Some(until)) => self.delayed.push(Reverse((until, seq, id))),
            _ => self.ready.push(Reverse((job.priority, seq, id))),
        }
    }

    /// Move every delayed job whose time has come onto the ready heap.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(Reverse((until, seq, id))) = self.delayed.peek().copied() {
            if until > now {
                break;
            }
            self.delayed.pop();
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Delayed || job.seq != seq {
                continue;
            }
            job.promote();
            self.ready.push(Reverse((job.priority, seq, id)));
        }
    }

    fn is_live_delayed(&self, entry: &DelayedKey) -> bool {
        let Reverse((until, seq, id)) = entry;
        self.jobs.get(id).is_some_and(|job| {
            job.status == JobStatus::Delayed && job.seq == *seq && job.delay_until == Some(*until)
        })
    }
}

/// A named, thread-safe job queue. Share it as `Arc<JobQueue>`.
pub struct JobQueue {
    name: String,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    paused: AtomicBool,
    inner: RwLock<QueueInner>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let window = chrono::Duration::from_std(config.metrics_window())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            name: name.into(),
            config,
            clock,
            paused: AtomicBool::new(false),
            inner: RwLock::new(QueueInner {
                jobs: HashMap::new(),
                ready: BinaryHeap::new(),
                delayed: BinaryHeap::new(),
                next_seq: 0,
                metrics: MetricsWindow::new(window),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job. It is `delayed` when `options.delay` is non-zero, `waiting`
    /// otherwise.
    ///
    /// `data` must be a JSON object; `null` is accepted as an empty object.
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QueueError::InvalidJobSpec(
                "job name must not be blank".to_string(),
            ));
        }

        let data = match data {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            serde_json::Value::Object(_) => data,
            other => {
                return Err(QueueError::InvalidJobSpec(format!(
                    "job data must be a JSON object, got {other}"
                )));
            }
        };

        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidJobSpec(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut job = Job::new(self.name.as_str(), name, data, max_attempts, now)
            .with_priority(options.priority);
        if !options.delay.is_zero() {
            job = job.delayed_until(add_delay(now, options.delay));
        }

        let id = job.id;
        debug!(
            queue = %self.name,
            job_id = %id,
            job_name = %job.name,
            status = %job.status,
            priority = job.priority,
            "Job enqueued"
        );

        let mut inner = self.write();
        inner.jobs.insert(id, job);
        inner.schedule(id);
        Ok(id)
    }

    /// Claim the next ready job, moving it to `active`.
    ///
    /// Returns `None` when the queue is paused or nothing is eligible.
    pub fn claim_next(&self) -> Option<Job> {
        if self.is_paused() {
            return None;
        }

        let now = self.clock.now();
        let mut guard = self.write();
        let inner = &mut *guard;
        inner.promote_due(now);

        while let Some(Reverse((_, seq, id))) = inner.ready.pop() {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Waiting || job.seq != seq {
                continue;
            }
            job.start_attempt(now);
            debug!(
                queue = %self.name,
                job_id = %id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                "Job claimed"
            );
            return Some(job.clone());
        }
        None
    }

    /// Record progress of an active job. Values are clamped to 0..=100 and
    /// decreases are ignored.
    pub fn report_progress(&self, id: JobId, percent: i32) -> Result<(), QueueError> {
        let mut inner = self.write();
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status == JobStatus::Active {
            job.set_progress(percent);
        }
        Ok(())
    }

    /// Mark an active job completed. Returns `false` (and changes nothing)
    /// when the job is not active.
    pub fn complete(&self, id: JobId, result: Option<JobResult>) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut guard = self.write();
        let inner = &mut *guard;
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Active {
            return Ok(false);
        }

        job.mark_completed(now, result);
        let duration_ms = job.duration_ms().unwrap_or_default();
        debug!(
            queue = %self.name,
            job_id = %id,
            attempts = job.attempts,
            duration_ms,
            "Job completed"
        );
        inner.metrics.record(now, duration_ms);
        Ok(true)
    }

    /// Record a failed attempt of an active job: retry it with backoff, or
    /// fail it for good.
    pub fn fail(&self, id: JobId, error: &JobError) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();
        let mut guard = self.write();
        let inner = &mut *guard;
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Active {
            return Ok(FailOutcome::Ignored);
        }

        if job.cancel_requested {
            job.last_error = Some(error.message.clone());
            job.mark_cancelled(now);
            debug!(queue = %self.name, job_id = %id, "Job cancelled after attempt");
            return Ok(FailOutcome::Cancelled);
        }

        if self
            .config
            .retry
            .should_retry(job.attempts, job.max_attempts, error)
        {
            let delay = self.config.retry.next_delay(job.attempts);
            let until = (!delay.is_zero()).then(|| add_delay(now, delay));
            job.schedule_retry(until, error.message.clone());
            debug!(
                queue = %self.name,
                job_id = %id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Job attempt failed, retrying"
            );
            inner.schedule(id);
            return Ok(FailOutcome::Retrying { delay_until: until });
        }

        job.mark_failed(now, error.message.clone());
        let duration_ms = job.duration_ms().unwrap_or_default();
        warn!(
            queue = %self.name,
            job_id = %id,
            attempts = job.attempts,
            retryable = error.retryable,
            error = %error,
            "Job failed"
        );
        inner.metrics.record(now, duration_ms);
        Ok(FailOutcome::Failed)
    }

    /// Cancel a job. Waiting and delayed jobs are cancelled right away; an
    /// active job is flagged and stops when its worker notices.
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, QueueError> {
        let now = self.clock.now();
        let mut inner = self.write();
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        let outcome = match job.status {
            JobStatus::Waiting | JobStatus::Delayed => {
                job.mark_cancelled(now);
                CancelOutcome::Cancelled
            }
            JobStatus::Active => {
                job.cancel_requested = true;
                CancelOutcome::CancelRequested
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                CancelOutcome::AlreadyFinished
            }
        };
        debug!(queue = %self.name, job_id = %id, ?outcome, "Job cancel");
        Ok(outcome)
    }

    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.read()
            .jobs
            .get(&id)
            .is_some_and(|job| job.cancel_requested)
    }

    /// Snapshot of a job record.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.read().jobs.get(&id).cloned()
    }

    /// Read-only view of a job, with its reported status.
    pub fn view(&self, id: JobId) -> Option<JobView> {
        let now = self.clock.now();
        self.read().jobs.get(&id).map(|job| job.view(now))
    }

    /// Snapshot of every job record, in no particular order.
    pub fn jobs(&self) -> Vec<Job> {
        self.read().jobs.values().cloned().collect()
    }

    /// Views of every job, in no particular order.
    pub fn views(&self) -> Vec<JobView> {
        let now = self.clock.now();
        self.read().jobs.values().map(|job| job.view(now)).collect()
    }

    pub fn snapshot_counts(&self) -> QueueCounts {
        let now = self.clock.now();
        let paused = self.is_paused();
        count(&self.read(), now, paused)
    }

    pub fn metrics(&self) -> QueueMetrics {
        let now = self.clock.now();
        self.read().metrics.snapshot(now)
    }

    /// Health of this queue, from counts and metrics taken under one lock.
    pub fn health(&self) -> HealthReport {
        let now = self.clock.now();
        let paused = self.is_paused();
        let (counts, metrics) = {
            let inner = self.read();
            (count(&inner, now, paused), inner.metrics.snapshot(now))
        };
        HealthAnalyzer::new(self.config.health).analyze(&self.name, &counts, &metrics)
    }

    /// Stop handing out jobs. Active jobs are not affected.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(queue = %self.name, "Queue paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(queue = %self.name, "Queue resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Earliest time a delayed job becomes eligible.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        let inner = self.read();
        inner
            .delayed
            .iter()
            .filter(|entry| inner.is_live_delayed(entry))
            .map(|Reverse((until, _, _))| *until)
            .min()
    }

    /// Drop terminal jobs that finished more than `older_than` ago.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let now = self.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let mut inner = self.write();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
        });
        let removed = before - inner.jobs.len();
        if removed > 0 {
            debug!(queue = %self.name, removed, "Pruned finished jobs");
        }
        removed
    }
}

fn count(inner: &QueueInner, now: DateTime<Utc>, paused: bool) -> QueueCounts {
    let mut counts = QueueCounts::default();
    for job in inner.jobs.values() {
        counts.add(job.effective_status(now));
    }
    if paused {
        counts.paused = counts.waiting;
    }
    counts
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
