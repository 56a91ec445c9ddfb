//! Ambient request metrics, independent of the per-component counters each
//! core component (cache, dedup, rate limiter) already tracks for itself.

use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
}

/// Tracks aggregate request counts and average latency across the process.
#[derive(Debug)]
pub struct MetricsCollector {
    request_counter: AtomicU64,
    success_counter: AtomicU64,
    failure_counter: AtomicU64,
    response_time_accumulator_ms: AtomicU64,
    response_time_count: AtomicU64,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            request_counter: AtomicU64::new(0),
            success_counter: AtomicU64::new(0),
            failure_counter: AtomicU64::new(0),
            response_time_accumulator_ms: AtomicU64::new(0),
            response_time_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.request_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, response_time_ms: u64) {
        self.success_counter.fetch_add(1, Ordering::Relaxed);
        self.response_time_accumulator_ms
            .fetch_add(response_time_ms, Ordering::Relaxed);
        self.response_time_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestMetrics {
        let total_requests = self.request_counter.load(Ordering::Relaxed);
        let successful_requests = self.success_counter.load(Ordering::Relaxed);
        let failed_requests = self.failure_counter.load(Ordering::Relaxed);

        let response_time_sum = self.response_time_accumulator_ms.load(Ordering::Relaxed);
        let response_time_count = self.response_time_count.load(Ordering::Relaxed);
        let avg_response_time_ms = if response_time_count > 0 {
            response_time_sum as f64 / response_time_count as f64
        } else {
            0.0
        };

        RequestMetrics {
            total_requests,
            successful_requests,
            failed_requests,
            avg_response_time_ms,
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_request_counts() {
        let metrics = MetricsCollector::new();
        metrics.record_request();
        metrics.record_success(10);
        metrics.record_request();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.avg_response_time_ms, 10.0);
    }

    #[test]
    fn average_response_time_is_zero_with_no_successes() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.snapshot().avg_response_time_ms, 0.0);
    }
}
