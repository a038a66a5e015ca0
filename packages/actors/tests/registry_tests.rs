mod common;

use std::error::Error;
use std::time::Duration;

use actors::{HandlerRegistry, JobFilter, QueueRegistry, RegistryError};
use queue_core::{
    CancelOutcome, HealthIssue, JobId, JobOptions, JobStatus, QueueConfig, QueueError,
};
use serde_json::json;

use common::{fast_config, flaky};

async fn registry() -> Result<QueueRegistry, RegistryError> {
    let registry = QueueRegistry::new();
    for name in ["publishing", "analytics"] {
        registry
            .create_queue(name, fast_config(2), HandlerRegistry::new().with("report", flaky(0)))
            .await?;
    }
    Ok(registry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_duplicate_and_invalid_queues() -> Result<(), Box<dyn Error>> {
    let registry = registry().await?;

    let duplicate = registry
        .create_queue("publishing", QueueConfig::default(), HandlerRegistry::new())
        .await;
    assert!(matches!(duplicate, Err(RegistryError::QueueExists(name)) if name == "publishing"));

    let invalid = registry
        .create_queue("empty", QueueConfig::default().with_concurrency(0), HandlerRegistry::new())
        .await;
    assert!(matches!(invalid, Err(RegistryError::Queue(QueueError::InvalidConfig(_)))));

    assert_eq!(registry.queue_names(), vec!["analytics", "publishing"]);
    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_queues_and_jobs_are_reported() -> Result<(), Box<dyn Error>> {
    let registry = registry().await?;

    let missing_queue = registry.enqueue("billing", "report", json!({}), JobOptions::new());
    assert!(matches!(missing_queue, Err(RegistryError::QueueNotFound(name)) if name == "billing"));

    let bad_payload = registry.enqueue("analytics", "report", json!("text"), JobOptions::new());
    assert!(matches!(bad_payload, Err(RegistryError::Queue(QueueError::InvalidJobSpec(_)))));

    let id = JobId::new();
    assert!(matches!(registry.get_job(id), Err(RegistryError::JobNotFound(found)) if found == id));
    assert!(matches!(registry.cancel(id), Err(RegistryError::JobNotFound(_))));
    assert!(matches!(
        registry.queue_health("billing"),
        Err(RegistryError::QueueNotFound(_))
    ));

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_job_stays_visible() -> Result<(), Box<dyn Error>> {
    let registry = registry().await?;
    registry.pause_queue("publishing")?;

    let id = registry.enqueue("publishing", "report", json!({}), JobOptions::new())?;
    assert_eq!(registry.cancel(id)?, CancelOutcome::Cancelled);
    assert_eq!(registry.cancel(id)?, CancelOutcome::AlreadyFinished);

    let queue = registry.queue("publishing").ok_or("queue missing")?;
    assert!(!queue.complete(id, None)?);

    let job = registry.get_job(id)?;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.finished_at.is_some());

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_jobs_newest_first_with_pages_and_search() -> Result<(), Box<dyn Error>> {
    let registry = registry().await?;
    registry.pause_queue("analytics")?;

    let mut ids = Vec::new();
    for n in 1..=5 {
        let name = format!("report-{n}");
        ids.push(registry.enqueue("analytics", name, json!({}), JobOptions::new())?);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let filter = JobFilter::new().with_queue("analytics");
    let first = registry.list_jobs(&filter, 1, 2)?;
    assert_eq!(first.total, 5);
    let names: Vec<&str> = first.items.iter().map(|job| job.name.as_str()).collect();
    assert_eq!(names, vec!["report-5", "report-4"]);

    let last = registry.list_jobs(&filter, 3, 2)?;
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].name, "report-1");

    let beyond = registry.list_jobs(&filter, 9, 2)?;
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);

    let searched = registry.list_jobs(&JobFilter::new().with_search("REPORT-3"), 1, 10)?;
    assert_eq!(searched.total, 1);
    assert_eq!(searched.items[0].id, ids[2]);

    let id_text = ids[4].to_string();
    let by_id = registry.list_jobs(&JobFilter::new().with_search(&id_text[16..]), 1, 10)?;
    assert_eq!(by_id.items.first().map(|job| job.id), Some(ids[4]));

    let waiting = registry.list_jobs(&JobFilter::new().with_status(JobStatus::Waiting), 1, 10)?;
    assert_eq!(waiting.total, 5);
    let active = registry.list_jobs(&JobFilter::new().with_status(JobStatus::Active), 1, 10)?;
    assert_eq!(active.total, 0);

    assert!(matches!(
        registry.list_jobs(&JobFilter::new().with_queue("billing"), 1, 10),
        Err(RegistryError::QueueNotFound(_))
    ));

    registry.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reports_health_for_every_queue() -> Result<(), Box<dyn Error>> {
    let registry = registry().await?;
    registry.pause_queue("analytics")?;
    registry.enqueue("analytics", "report", json!({}), JobOptions::new())?;

    let reports = registry.health();
    let names: Vec<&str> = reports.iter().map(|r| r.queue_name.as_str()).collect();
    assert_eq!(names, vec!["analytics", "publishing"]);

    let analytics = &reports[0];
    assert!(!analytics.is_healthy);
    assert_eq!(
        analytics.issues,
        vec![HealthIssue::NoActiveWorkers, HealthIssue::QueuePaused]
    );
    assert_eq!(analytics.metrics.backlog_size, 1);
    assert!(reports[1].is_healthy);

    registry.resume_queue("analytics")?;
    let queue = registry.queue("analytics").ok_or("queue missing")?;
    assert!(
        common::wait_for(Duration::from_secs(5), || queue.snapshot_counts().completed == 1).await
    );
    assert!(registry.queue_health("analytics")?.is_healthy);

    registry.shutdown().await;
    Ok(())
}
