//! Queue health analysis: turns counters and timings into issues and
//! recommendations.
//!
//! [`HealthAnalyzer::analyze`] is a pure function of its inputs, so every rule
//! can be checked against synthetic counters.

use serde::{Deserialize, Serialize};

use crate::{QueueCounts, QueueMetrics};

/// A problem detected on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthIssue {
    #[serde(rename = "high error rate")]
    HighErrorRate,
    #[serde(rename = "large backlog")]
    LargeBacklog,
    #[serde(rename = "slow processing")]
    SlowProcessing,
    #[serde(rename = "jobs waiting, no active workers")]
    NoActiveWorkers,
    #[serde(rename = "queue paused")]
    QueuePaused,
}

impl HealthIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthIssue::HighErrorRate => "high error rate",
            HealthIssue::LargeBacklog => "large backlog",
            HealthIssue::SlowProcessing => "slow processing",
            HealthIssue::NoActiveWorkers => "jobs waiting, no active workers",
            HealthIssue::QueuePaused => "queue paused",
        }
    }
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggested operator action, either fixing an issue or a positive signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "review failed jobs")]
    ReviewFailedJobs,
    #[serde(rename = "increase concurrency")]
    IncreaseConcurrency,
    #[serde(rename = "optimize job logic")]
    OptimizeJobLogic,
    #[serde(rename = "check worker health")]
    CheckWorkerHealth,
    #[serde(rename = "resume if unintentional")]
    ResumeIfUnintentional,
    #[serde(rename = "queue performing well")]
    PerformingWell,
    #[serde(rename = "benchmark-quality performance")]
    BenchmarkQuality,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::ReviewFailedJobs => "review failed jobs",
            Recommendation::IncreaseConcurrency => "increase concurrency",
            Recommendation::OptimizeJobLogic => "optimize job logic",
            Recommendation::CheckWorkerHealth => "check worker health",
            Recommendation::ResumeIfUnintentional => "resume if unintentional",
            Recommendation::PerformingWell => "queue performing well",
            Recommendation::BenchmarkQuality => "benchmark-quality performance",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule thresholds. The defaults are the production values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Error rate (percent) above which the queue is erroring.
    pub max_error_rate: f64,
    /// Backlog above which the queue is overloaded.
    pub max_backlog: u64,
    /// Average duration (ms) above which processing is slow.
    pub max_avg_duration_ms: f64,
    /// Throughput (jobs/min) above which, with a small backlog, the queue is doing well.
    pub good_throughput: f64,
    pub good_backlog: u64,
    /// Error rate and duration under which the queue is benchmark quality.
    pub benchmark_error_rate: f64,
    pub benchmark_avg_duration_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 10.0,
            max_backlog: 100,
            max_avg_duration_ms: 10_000.0,
            good_throughput: 40.0,
            good_backlog: 10,
            benchmark_error_rate: 1.0,
            benchmark_avg_duration_ms: 2_000.0,
        }
    }
}

/// Headline numbers of a health report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Jobs finished per minute.
    pub throughput: f64,
    /// Failed jobs as a percentage of tracked jobs.
    pub error_rate: f64,
    /// Mean job duration in milliseconds.
    pub avg_duration: f64,
    /// Jobs not yet executing.
    pub backlog_size: u64,
}

/// Point-in-time judgment of a queue. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub queue_name: String,
    pub is_healthy: bool,
    pub issues: Vec<HealthIssue>,
    pub recommendations: Vec<Recommendation>,
    pub metrics: HealthMetrics,
    pub counts: QueueCounts,
}

/// Applies the health rules.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthAnalyzer {
    thresholds: HealthThresholds,
}

impl HealthAnalyzer {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate every rule independently; all matching issues and
    /// recommendations are reported, in rule order.
    pub fn analyze(
        &self,
        queue_name: &str,
        counts: &QueueCounts,
        metrics: &QueueMetrics,
    ) -> HealthReport {
        let t = &self.thresholds;
        let error_rate = error_rate(counts);
        let backlog_size = counts.backlog();
        let avg_duration = metrics.avg_duration_ms;

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if error_rate > t.max_error_rate {
            issues.push(HealthIssue::HighErrorRate);
            recommendations.push(Recommendation::ReviewFailedJobs);
        }
        if backlog_size > t.max_backlog {
            issues.push(HealthIssue::LargeBacklog);
            recommendations.push(Recommendation::IncreaseConcurrency);
        }
        if avg_duration > t.max_avg_duration_ms {
            issues.push(HealthIssue::SlowProcessing);
            recommendations.push(Recommendation::OptimizeJobLogic);
        }
        if counts.active == 0 && counts.waiting > 0 {
            issues.push(HealthIssue::NoActiveWorkers);
            recommendations.push(Recommendation::CheckWorkerHealth);
        }
        if counts.paused > 0 {
            issues.push(HealthIssue::QueuePaused);
            recommendations.push(Recommendation::ResumeIfUnintentional);
        }

        if metrics.throughput > t.good_throughput && backlog_size < t.good_backlog {
            recommendations.push(Recommendation::PerformingWell);
        }
        if error_rate < t.benchmark_error_rate && avg_duration < t.benchmark_avg_duration_ms {
            recommendations.push(Recommendation::BenchmarkQuality);
        }

        HealthReport {
            queue_name: queue_name.to_string(),
            is_healthy: issues.is_empty(),
            issues,
            recommendations,
            metrics: HealthMetrics {
                throughput: metrics.throughput,
                error_rate,
                avg_duration,
                backlog_size,
            },
            counts: *counts,
        }
    }
}

/// `failed / (waiting + active + completed + failed + delayed) * 100`, 0 when empty.
fn error_rate(counts: &QueueCounts) -> f64 {
    let total =
        counts.waiting + counts.active + counts.completed + counts.failed + counts.delayed;
    if total == 0 {
        0.0
    } else {
        counts.failed as f64 / total as f64 * 100.0
    }
}
