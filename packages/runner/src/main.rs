//! Demo process for the job queue: runs a few queues and logs their health.

mod init;

use std::time::Duration;

use actors::QueueRegistry;
use queue_core::QueueConfig;
use tracing_subscriber::EnvFilter;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(10);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn log_health(registry: &QueueRegistry) {
    for report in registry.health() {
        let counts = report.counts;
        tracing::info!(
            queue = %report.queue_name,
            healthy = report.is_healthy,
            waiting = counts.waiting,
            active = counts.active,
            delayed = counts.delayed,
            completed = counts.completed,
            failed = counts.failed,
            throughput = report.metrics.throughput,
            avg_duration_ms = report.metrics.avg_duration,
            "Queue health"
        );
        for recommendation in &report.recommendations {
            tracing::debug!(queue = %report.queue_name, %recommendation, "Recommendation");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = QueueConfig::from_env()?;
    tracing::info!(concurrency = config.concurrency, "Starting queue runner");

    let registry = QueueRegistry::new();
    init::create_demo_queues(&registry, &config).await?;
    init::enqueue_demo_jobs(&registry)?;
    tracing::info!(queues = ?init::QUEUES, "Demo jobs enqueued");

    let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => log_health(&registry),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    log_health(&registry);
    registry.shutdown().await;
    Ok(())
}
