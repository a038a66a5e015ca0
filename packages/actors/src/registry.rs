//! Queue registry: the entry point collaborators use to reach queues.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use queue_core::{
    CancelOutcome, HealthReport, JobId, JobOptions, JobQueue, JobStatus, JobView, QueueConfig,
    QueueError,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, DispatcherArgs};
use crate::error::RegistryError;
use crate::handler::JobHandler;
use crate::messages::{DispatcherInfo, DispatcherMessage};

/// Largest page [`QueueRegistry::list_jobs`] returns.
pub const MAX_PAGE_SIZE: usize = 100;

const INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Which jobs [`QueueRegistry::list_jobs`] returns. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub queue_name: Option<String>,
    pub status: Option<JobStatus>,
    /// Case-insensitive substring of the job name or id.
    pub search: Option<String>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    fn matches(&self, job: &JobView, needle: Option<&str>) -> bool {
        if self.status.is_some_and(|status| job.status != status) {
            return false;
        }
        match needle {
            Some(needle) => {
                job.name.to_lowercase().contains(needle)
                    || job.id.to_string().to_lowercase().contains(needle)
            }
            None => true,
        }
    }
}

/// One page of jobs, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<JobView>,
    /// Matching jobs across all pages.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Clone)]
struct QueueEntry {
    queue: Arc<JobQueue>,
    dispatcher: ActorRef<DispatcherMessage>,
}

struct RegistryInner {
    queues: RwLock<HashMap<String, QueueEntry>>,
    handles: RwLock<Vec<JoinHandle<()>>>,
}

/// Owns every queue of the process and its dispatcher.
///
/// Cheap to clone; clones share the same queues. Build one per process and
/// pass it to whatever needs to enqueue or inspect jobs.
#[derive(Clone)]
pub struct QueueRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                queues: RwLock::new(HashMap::new()),
                handles: RwLock::new(Vec::new()),
            }),
        }
    }

    fn entry(&self, name: &str) -> Result<QueueEntry, RegistryError> {
        self.inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::QueueNotFound(name.to_string()))
    }

    fn entries(&self) -> Vec<(String, QueueEntry)> {
        let mut entries: Vec<(String, QueueEntry)> = self
            .inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The queue owning `id`, if any.
    fn queue_of(&self, id: JobId) -> Result<Arc<JobQueue>, RegistryError> {
        self.entries()
            .into_iter()
            .map(|(_, entry)| entry.queue)
            .find(|queue| queue.get(id).is_some())
            .ok_or(RegistryError::JobNotFound(id))
    }

    /// Create a queue and start its dispatcher.
    pub async fn create_queue<H: JobHandler>(
        &self,
        name: impl Into<String>,
        config: QueueConfig,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            let reason = "queue name must not be blank".to_string();
            return Err(QueueError::InvalidConfig(reason).into());
        }
        config.validate()?;
        if self.entry(&name).is_ok() {
            return Err(RegistryError::QueueExists(name));
        }

        let queue = Arc::new(JobQueue::new(name.clone(), config));
        let args = DispatcherArgs {
            queue: Arc::clone(&queue),
            handler: Arc::new(handler),
        };
        let (dispatcher, handle) = Actor::spawn(None, Dispatcher, args)
            .await
            .map_err(|e| RegistryError::Spawn(e.to_string()))?;

        {
            let mut queues = self
                .inner
                .queues
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if queues.contains_key(&name) {
                drop(queues);
                let _ = dispatcher.send_message(DispatcherMessage::Shutdown);
                return Err(RegistryError::QueueExists(name));
            }
            queues.insert(name.clone(), QueueEntry { queue, dispatcher });
        }
        self.inner
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        tracing::info!(queue = %name, "Queue created");
        Ok(())
    }

    /// Direct access to a queue, mostly for inspection.
    pub fn queue(&self, name: &str) -> Option<Arc<JobQueue>> {
        self.entry(name).ok().map(|entry| entry.queue)
    }

    /// The dispatcher actor of a queue.
    pub fn dispatcher(&self, name: &str) -> Option<ActorRef<DispatcherMessage>> {
        self.entry(name).ok().map(|entry| entry.dispatcher)
    }

    /// Queue names, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        self.entries().into_iter().map(|(name, _)| name).collect()
    }

    /// Add a job to a queue and wake its dispatcher.
    pub fn enqueue(
        &self,
        queue_name: &str,
        job_name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, RegistryError> {
        let entry = self.entry(queue_name)?;
        let id = entry.queue.enqueue(job_name, data, options)?;
        if let Err(e) = entry.dispatcher.send_message(DispatcherMessage::Dispatch) {
            tracing::warn!(queue = %queue_name, job_id = %id, "Dispatcher not reachable: {}", e);
        }
        Ok(id)
    }

    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, RegistryError> {
        self.queue_of(id)?.cancel(id).map_err(job_not_found)
    }

    pub fn get_job(&self, id: JobId) -> Result<JobView, RegistryError> {
        self.queue_of(id)?
            .view(id)
            .ok_or(RegistryError::JobNotFound(id))
    }

    /// Jobs matching `filter`, newest first. `page` is 1-based; `limit` is
    /// clamped to 1..=[`MAX_PAGE_SIZE`].
    pub fn list_jobs(
        &self,
        filter: &JobFilter,
        page: usize,
        limit: usize,
    ) -> Result<JobPage, RegistryError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let queues: Vec<Arc<JobQueue>> = match filter.queue_name.as_deref() {
            Some(name) => vec![self.entry(name)?.queue],
            None => self
                .entries()
                .into_iter()
                .map(|(_, entry)| entry.queue)
                .collect(),
        };

        let needle = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut jobs: Vec<JobView> = queues
            .iter()
            .flat_map(|queue| queue.views())
            .filter(|job| filter.matches(job, needle.as_deref()))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = jobs.len();
        let items = jobs
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(JobPage {
            items,
            total,
            page,
            limit,
        })
    }

    pub fn queue_health(&self, name: &str) -> Result<HealthReport, RegistryError> {
        Ok(self.entry(name)?.queue.health())
    }

    /// Health of every queue, by queue name.
    pub fn health(&self) -> Vec<HealthReport> {
        self.entries()
            .into_iter()
            .map(|(_, entry)| entry.queue.health())
            .collect()
    }

    pub fn pause_queue(&self, name: &str) -> Result<(), RegistryError> {
        self.entry(name)?.queue.pause();
        Ok(())
    }

    pub fn resume_queue(&self, name: &str) -> Result<(), RegistryError> {
        let entry = self.entry(name)?;
        entry.queue.resume();
        if let Err(e) = entry.dispatcher.send_message(DispatcherMessage::Dispatch) {
            tracing::warn!(queue = %name, "Dispatcher not reachable: {}", e);
        }
        Ok(())
    }

    /// Slot usage of a queue's dispatcher.
    pub async fn dispatcher_info(&self, name: &str) -> Result<DispatcherInfo, RegistryError> {
        let entry = self.entry(name)?;
        let result = ractor::rpc::call(
            &entry.dispatcher,
            |reply| DispatcherMessage::GetInfo { reply },
            Some(INFO_TIMEOUT),
        )
        .await;
        match result {
            Ok(CallResult::Success(info)) => Ok(info),
            _ => Err(RegistryError::DispatcherUnavailable(name.to_string())),
        }
    }

    /// Stop every dispatcher, letting in-flight jobs finish, and wait for them.
    pub async fn shutdown(&self) {
        let entries: Vec<QueueEntry> = self
            .inner
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            let _ = entry.dispatcher.send_message(DispatcherMessage::Shutdown);
        }

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Dispatcher task ended abnormally: {}", e);
            }
        }
        tracing::info!(queues = entries.len(), "Queue registry shut down");
    }
}

fn job_not_found(err: QueueError) -> RegistryError {
    match err {
        QueueError::NotFound(id) => RegistryError::JobNotFound(id),
        other => other.into(),
    }
}
