//! Demo queues and handlers.

use std::time::Duration;

use actors::{HandlerRegistry, QueueRegistry, RegistryError, job_handler};
use queue_core::{JobError, JobOptions, JobResult, QueueConfig};
use serde_json::json;

pub const QUEUES: [&str; 3] = ["publishing", "analytics", "notifications"];

fn publishing_handlers() -> HandlerRegistry {
    HandlerRegistry::new().with(
        "publish-post",
        job_handler!(|ctx| {
            let post = ctx.data().get("post").and_then(|v| v.as_u64()).ok_or_else(|| {
                JobError::permanent("publish-post requires a numeric `post`")
            })?;
            for step in 1..=4 {
                if ctx.is_cancelled() {
                    return Err(JobError::retryable("publish cancelled"));
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
                ctx.report_progress(step * 25);
            }
            tracing::info!(post, "Post published");
            Ok(JobResult::new(format!("Published post {post}")))
        }),
    )
}

fn analytics_handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(
            "aggregate",
            job_handler!(|ctx| {
                let seconds = ctx.data().get("seconds").and_then(|v| v.as_u64()).unwrap_or(2);
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                Ok(JobResult::with_output(
                    format!("Aggregated for {seconds} seconds"),
                    ctx.data().clone(),
                ))
            }),
        )
        // Fails until its last attempt, to exercise retries.
        .with(
            "flaky-export",
            job_handler!(|ctx| {
                if ctx.attempt() < ctx.job().max_attempts {
                    Err(format!("export backend unavailable (attempt {})", ctx.attempt()).into())
                } else {
                    Ok(JobResult::new("Export written"))
                }
            }),
        )
}

fn notification_handlers() -> HandlerRegistry {
    HandlerRegistry::new().with(
        "send-email",
        job_handler!(|ctx| {
            let to = ctx.data().get("to").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            if to.is_empty() {
                return Err(JobError::permanent("send-email requires `to`"));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(JobResult::new(format!("Email sent to {to}")))
        }),
    )
}

/// Create the demo queues from a base config.
pub async fn create_demo_queues(
    registry: &QueueRegistry,
    base: &QueueConfig,
) -> Result<(), RegistryError> {
    registry
        .create_queue("publishing", base.clone(), publishing_handlers())
        .await?;
    registry
        .create_queue(
            "analytics",
            base.clone().with_concurrency(base.concurrency.min(2)),
            analytics_handlers(),
        )
        .await?;
    registry
        .create_queue("notifications", base.clone(), notification_handlers())
        .await?;
    Ok(())
}

/// Seed the demo queues with a mix of jobs.
pub fn enqueue_demo_jobs(registry: &QueueRegistry) -> Result<(), RegistryError> {
    for post in 1..=5 {
        registry.enqueue(
            "publishing",
            "publish-post",
            json!({ "post": post }),
            JobOptions::new().with_priority(if post == 5 { -1 } else { 0 }),
        )?;
    }
    registry.enqueue(
        "publishing",
        "publish-post",
        json!({ "post": 6 }),
        JobOptions::new().with_delay(Duration::from_secs(5)),
    )?;

    registry.enqueue("analytics", "aggregate", json!({ "seconds": 3 }), JobOptions::new())?;
    registry.enqueue("analytics", "flaky-export", json!({}), JobOptions::new())?;

    for to in ["ops@example.com", "", "team@example.com"] {
        registry.enqueue("notifications", "send-email", json!({ "to": to }), JobOptions::new())?;
    }
    Ok(())
}
