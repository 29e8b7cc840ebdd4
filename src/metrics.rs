//! Completion request counters
//!
//! Lock-free counters updated by the chat handler and served as JSON by
//! `GET /metrics`. Token counts are the same whitespace approximation reported
//! in the `usage` block of each response.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Shared completion counters
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    completions_total: Arc<AtomicUsize>,
    completions_succeeded: Arc<AtomicUsize>,
    completions_failed: Arc<AtomicUsize>,
    completion_tokens: Arc<AtomicUsize>,
    generation_time_us: Arc<AtomicU64>,
    started: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a collector with zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self {
            completions_total: Arc::new(AtomicUsize::new(0)),
            completions_succeeded: Arc::new(AtomicUsize::new(0)),
            completions_failed: Arc::new(AtomicUsize::new(0)),
            completion_tokens: Arc::new(AtomicUsize::new(0)),
            generation_time_us: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    /// Record a completion that produced `tokens` tokens in `elapsed`
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_success(&self, tokens: usize, elapsed: Duration) {
        self.completions_total.fetch_add(1, Ordering::Relaxed);
        self.completions_succeeded.fetch_add(1, Ordering::Relaxed);
        self.completion_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.generation_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed completion
    pub fn record_failure(&self) {
        self.completions_total.fetch_add(1, Ordering::Relaxed);
        self.completions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of the counters
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self.completions_succeeded.load(Ordering::Relaxed);
        let generation_time_us = self.generation_time_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            completions_total: self.completions_total.load(Ordering::Relaxed),
            completions_succeeded: succeeded,
            completions_failed: self.completions_failed.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            generation_time_ms: generation_time_us / 1000,
            avg_generation_ms: if succeeded > 0 {
                generation_time_us as f64 / 1000.0 / succeeded as f64
            } else {
                0.0
            },
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Serialized form of [`MetricsCollector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Completion requests that reached the manager
    pub completions_total: usize,
    /// Completions that returned text
    pub completions_succeeded: usize,
    /// Completions that failed
    pub completions_failed: usize,
    /// Approximate generated tokens
    pub completion_tokens: usize,
    /// Cumulative generation wall time
    pub generation_time_ms: u64,
    /// Mean generation wall time per successful completion
    pub avg_generation_ms: f64,
    /// Seconds since the collector was created
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_collector_is_zeroed() {
        let snapshot = MetricsCollector::new().snapshot();
        assert_eq!(snapshot.completions_total, 0);
        assert_eq!(snapshot.completion_tokens, 0);
        assert!(snapshot.avg_generation_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_success_and_failure() {
        let metrics = MetricsCollector::new();
        metrics.record_success(10, Duration::from_millis(20));
        metrics.record_success(30, Duration::from_millis(40));
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completions_total, 3);
        assert_eq!(snapshot.completions_succeeded, 2);
        assert_eq!(snapshot.completions_failed, 1);
        assert_eq!(snapshot.completion_tokens, 40);
        assert_eq!(snapshot.generation_time_ms, 60);
        assert!((snapshot.avg_generation_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();
        clone.record_failure();
        assert_eq!(metrics.snapshot().completions_failed, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().snapshot()).unwrap();
        assert_eq!(json["completions_total"], 0);
        assert!(json.get("uptime_secs").is_some());
    }
}
