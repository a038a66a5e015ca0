//! Trailing-window throughput and duration tracking.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on retained samples, whatever the window length.
const MAX_SAMPLES: usize = 10_000;

/// Observed performance of a queue over the trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Jobs reaching a terminal completed/failed state per minute.
    pub throughput: f64,
    /// Mean job duration in milliseconds (0 when nothing finished).
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    finished_at: DateTime<Utc>,
    duration_ms: i64,
}

/// Finished-job samples inside a sliding time window.
#[derive(Debug)]
pub(crate) struct MetricsWindow {
    window: Duration,
    samples: VecDeque<Sample>,
}

impl MetricsWindow {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, finished_at: DateTime<Utc>, duration_ms: i64) {
        self.samples.push_back(Sample {
            finished_at,
            duration_ms: duration_ms.max(0),
        });
        self.evict(finished_at);
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.finished_at < cutoff)
        {
            self.samples.pop_front();
        }
    }

    /// Metrics as of `now`, without mutating the window.
    pub(crate) fn snapshot(&self, now: DateTime<Utc>) -> QueueMetrics {
        let cutoff = now - self.window;
        let (count, total_ms) = self
            .samples
            .iter()
            .filter(|sample| sample.finished_at >= cutoff)
            .fold((0u64, 0i64), |(count, total), sample| {
                (count + 1, total.saturating_add(sample.duration_ms))
            });

        if count == 0 {
            return QueueMetrics::default();
        }

        let window_minutes = (self.window.num_milliseconds().max(1) as f64) / 60_000.0;
        QueueMetrics {
            throughput: count as f64 / window_minutes,
            avg_duration_ms: total_ms as f64 / count as f64,
        }
    }
}
