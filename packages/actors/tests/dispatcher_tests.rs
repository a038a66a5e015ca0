mod common;

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{FnHandler, HandlerRegistry, JobContext, job_handler};
use queue_core::{CancelOutcome, JobError, JobOptions, JobResult, JobStatus};
use serde_json::json;

use common::{Gauge, fast_config, flaky, registry_with, wait_for, wait_for_status};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn job_retries_until_it_succeeds() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with("publish-post", flaky(2));
    let (registry, queue) = registry_with("publishing", fast_config(2), handlers).await?;

    let id = registry.enqueue(
        "publishing",
        "publish-post",
        json!({"post": 7}),
        JobOptions::new().with_max_attempts(3),
    )?;

    assert!(wait_for_status(&queue, id, JobStatus::Completed).await);
    let job = queue.get(id).ok_or("job missing")?;
    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error.as_deref(), Some("attempt 2 failed"));
    assert!(job.failed_reason.is_none());

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn job_fails_once_retries_are_exhausted() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with("publish-post", flaky(u32::MAX));
    let (registry, queue) = registry_with("publishing", fast_config(2), handlers).await?;

    let id = registry.enqueue(
        "publishing",
        "publish-post",
        json!({}),
        JobOptions::new().with_max_attempts(2),
    )?;

    assert!(wait_for_status(&queue, id, JobStatus::Failed).await);
    let job = queue.get(id).ok_or("job missing")?;
    assert_eq!(job.attempts, 2);
    assert_eq!(job.failed_reason.as_deref(), Some("attempt 2 failed"));
    assert!(job.finished_at.is_some());

    let health = registry.queue_health("publishing")?;
    assert_eq!(health.counts.failed, 1);

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_runs_more_jobs_than_its_concurrency() -> Result<(), Box<dyn Error>> {
    let gauge = Arc::new(Gauge::default());
    let tracked = Arc::clone(&gauge);
    let handlers = HandlerRegistry::new().with(
        "aggregate",
        FnHandler::new(move |_ctx: JobContext| {
            let tracked = Arc::clone(&tracked);
            async move {
                tracked.enter();
                tokio::time::sleep(Duration::from_millis(40)).await;
                tracked.exit();
                Ok::<_, JobError>(JobResult::default())
            }
        }),
    );
    let (registry, queue) = registry_with("analytics", fast_config(2), handlers).await?;

    let info = registry.dispatcher_info("analytics").await?;
    assert_eq!(info.concurrency, 2);
    assert_eq!(info.idle + info.busy, 2);

    for n in 0..8 {
        registry.enqueue("analytics", "aggregate", json!({ "n": n }), JobOptions::new())?;
    }

    assert!(
        wait_for(Duration::from_secs(5), || queue.snapshot_counts().completed == 8).await
    );
    assert_eq!(gauge.peak(), 2);

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_jobs_in_priority_order() -> Result<(), Box<dyn Error>> {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let handlers = HandlerRegistry::new().with(
        "notify",
        FnHandler::new(move |ctx: JobContext| {
            let label = ctx.data()["label"].as_str().unwrap_or_default().to_string();
            let pushed = seen
                .lock()
                .map(|mut order| order.push(label))
                .map_err(|_| JobError::permanent("order lock poisoned"));
            async move {
                pushed?;
                Ok::<_, JobError>(JobResult::default())
            }
        }),
    );
    let (registry, queue) = registry_with("notifications", fast_config(1), handlers).await?;

    // Hold the queue so every job is waiting before the first claim.
    registry.pause_queue("notifications")?;
    for (label, priority) in [("low", 10), ("first", 0), ("urgent", -5), ("second", 0)] {
        registry.enqueue(
            "notifications",
            "notify",
            json!({ "label": label }),
            JobOptions::new().with_priority(priority),
        )?;
    }
    registry.resume_queue("notifications")?;

    assert!(
        wait_for(Duration::from_secs(5), || queue.snapshot_counts().completed == 4).await
    );
    let order = order.lock().map_err(|_| "poisoned")?.clone();
    assert_eq!(order, vec!["urgent", "first", "second", "low"]);

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paused_queue_holds_jobs_until_resumed() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with("publish-post", flaky(0));
    let (registry, queue) = registry_with("publishing", fast_config(2), handlers).await?;

    registry.pause_queue("publishing")?;
    let id = registry.enqueue("publishing", "publish-post", json!({}), JobOptions::new())?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.get_job(id)?.status, JobStatus::Waiting);
    let health = registry.queue_health("publishing")?;
    assert_eq!(health.counts.waiting, 1);
    assert_eq!(health.counts.paused, 1);
    assert!(!health.is_healthy);

    registry.resume_queue("publishing")?;
    assert!(wait_for_status(&queue, id, JobStatus::Completed).await);

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delayed_job_runs_once_its_delay_elapses() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with("publish-post", flaky(0));
    let (registry, queue) = registry_with("publishing", fast_config(2), handlers).await?;

    let id = registry.enqueue(
        "publishing",
        "publish-post",
        json!({}),
        JobOptions::new().with_delay(Duration::from_millis(150)),
    )?;
    assert_eq!(registry.get_job(id)?.status, JobStatus::Delayed);

    assert!(wait_for_status(&queue, id, JobStatus::Completed).await);
    let job = queue.get(id).ok_or("job missing")?;
    let processed_at = job.processed_at.ok_or("never processed")?;
    assert!(processed_at - job.created_at >= chrono::Duration::milliseconds(150));

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_job_stops_when_cancelled() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with(
        "export",
        job_handler!(|ctx| {
            let mut step = 0;
            while !ctx.is_cancelled() {
                step += 1;
                ctx.report_progress(step);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(JobError::retryable("cancelled by request"))
        }),
    );
    let (registry, queue) = registry_with("analytics", fast_config(1), handlers).await?;

    let id = registry.enqueue("analytics", "export", json!({}), JobOptions::new())?;
    assert!(wait_for_status(&queue, id, JobStatus::Active).await);

    assert_eq!(registry.cancel(id)?, CancelOutcome::CancelRequested);
    assert!(wait_for_status(&queue, id, JobStatus::Cancelled).await);

    let job = registry.get_job(id)?;
    assert_eq!(job.attempts, 1);
    assert!(job.failed_reason.is_none());
    assert!(job.progress > 0);

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_job_does_not_stop_the_queue() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new()
        .with(
            "explode",
            job_handler!(|_ctx| {
                panic!("corrupt payload");
            }),
        )
        .with("publish-post", flaky(0));
    let (registry, queue) = registry_with("publishing", fast_config(1), handlers).await?;

    let bad = registry.enqueue(
        "publishing",
        "explode",
        json!({}),
        JobOptions::new().with_max_attempts(1),
    )?;
    let good = registry.enqueue("publishing", "publish-post", json!({}), JobOptions::new())?;

    assert!(wait_for_status(&queue, bad, JobStatus::Failed).await);
    assert!(wait_for_status(&queue, good, JobStatus::Completed).await);
    let reason = queue.get(bad).and_then(|job| job.failed_reason).unwrap_or_default();
    assert!(reason.contains("corrupt payload"));

    let info = registry.dispatcher_info("publishing").await?;
    assert_eq!(info.idle + info.busy, 1);

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_job_is_failed_by_the_timeout() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with(
        "aggregate",
        job_handler!(|_ctx| {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(JobResult::default())
        }),
    );
    let mut config = fast_config(1);
    config.job_timeout_ms = Some(50);
    let (registry, queue) = registry_with("analytics", config, handlers).await?;

    let id = registry.enqueue(
        "analytics",
        "aggregate",
        json!({}),
        JobOptions::new().with_max_attempts(1),
    )?;

    assert!(wait_for_status(&queue, id, JobStatus::Failed).await);
    let reason = queue.get(id).and_then(|job| job.failed_reason).unwrap_or_default();
    assert!(reason.contains("timed out"));

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn killed_worker_is_replaced_and_its_job_retried() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with(
        "publish-post",
        job_handler!(|ctx| {
            if ctx.attempt() == 1 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(JobResult::new("published"))
        }),
    );
    let (registry, queue) = registry_with("publishing", fast_config(1), handlers).await?;

    let id = registry.enqueue("publishing", "publish-post", json!({}), JobOptions::new())?;
    assert!(wait_for_status(&queue, id, JobStatus::Active).await);

    let dispatcher = registry.dispatcher("publishing").ok_or("dispatcher missing")?;
    let workers = dispatcher.get_children();
    assert_eq!(workers.len(), 1);
    workers[0].kill();

    assert!(wait_for_status(&queue, id, JobStatus::Completed).await);
    let job = queue.get(id).ok_or("job missing")?;
    assert_eq!(job.attempts, 2);
    let last_error = job.last_error.unwrap_or_default();
    assert!(last_error.contains("worker terminated"), "{last_error}");

    let info = registry.dispatcher_info("publishing").await?;
    assert_eq!(info.concurrency, 1);
    assert_eq!(info.idle + info.busy, 1);
    assert!(!dispatcher.get_children().iter().any(|w| w.get_id() == workers[0].get_id()));

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_lets_running_jobs_finish() -> Result<(), Box<dyn Error>> {
    let handlers = HandlerRegistry::new().with(
        "publish-post",
        job_handler!(|_ctx| {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(JobResult::new("published"))
        }),
    );
    let (registry, queue) = registry_with("publishing", fast_config(1), handlers).await?;

    let running = registry.enqueue("publishing", "publish-post", json!({}), JobOptions::new())?;
    let queued = registry.enqueue("publishing", "publish-post", json!({}), JobOptions::new())?;
    assert!(wait_for_status(&queue, running, JobStatus::Active).await);

    registry.shutdown().await;

    assert_eq!(queue.get(running).map(|job| job.status), Some(JobStatus::Completed));
    assert_eq!(queue.get(queued).map(|job| job.status), Some(JobStatus::Waiting));
    assert!(registry.queue_names().is_empty());
    Ok(())
}
