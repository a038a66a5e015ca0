#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{HandlerRegistry, JobHandler, QueueRegistry, job_handler};
use queue_core::{JobId, JobQueue, JobResult, JobStatus, QueueConfig, RetryPolicy};

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the job reaches `status`.
pub async fn wait_for_status(queue: &Arc<JobQueue>, id: JobId, status: JobStatus) -> bool {
    wait_for(Duration::from_secs(5), || {
        queue.get(id).is_some_and(|job| job.status == status)
    })
    .await
}

/// Config with fast retries so tests do not wait on real backoff.
pub fn fast_config(concurrency: usize) -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(concurrency)
        .with_retry(RetryPolicy::new(10, 50))
}

/// A handler that fails the first `failures` attempts of every job, then succeeds.
pub fn flaky(failures: u32) -> impl JobHandler {
    job_handler!(|ctx| {
        if ctx.attempt() <= failures {
            Err(format!("attempt {} failed", ctx.attempt()).into())
        } else {
            Ok(JobResult::new("ok"))
        }
    })
}

/// Tracks how many jobs run at once and the highest value seen.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub async fn registry_with(
    name: &str,
    config: QueueConfig,
    handlers: HandlerRegistry,
) -> Result<(QueueRegistry, Arc<JobQueue>), actors::RegistryError> {
    let registry = QueueRegistry::new();
    registry.create_queue(name, config, handlers).await?;
    let queue = registry
        .queue(name)
        .ok_or_else(|| actors::RegistryError::QueueNotFound(name.to_string()))?;
    Ok((registry, queue))
}
