//! Request correlation and in-process metrics.
//!
//! This module provides:
//! - Correlation IDs carried through each request's log lines
//! - Atomic request and query counters exposed at `/api/v1/metrics`
//! - An in-flight request gauge used by graceful shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generate a short correlation ID (8 characters) for compact logging.
pub fn generate_short_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Request context for carrying correlation information through the request lifecycle.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    pub correlation_id: String,
    /// When the request was received.
    pub start_time: Instant,
    /// Route or template being accessed.
    pub operation: Option<String>,
}

impl RequestContext {
    /// Create a new request context with a generated correlation ID.
    pub fn new() -> Self {
        Self {
            correlation_id: generate_short_correlation_id(),
            start_time: Instant::now(),
            operation: None,
        }
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Get the elapsed time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Create a log prefix for consistent logging format.
    pub fn log_prefix(&self) -> String {
        match &self.operation {
            Some(op) => format!("[{}] [{}]", self.correlation_id, op),
            None => format!("[{}]", self.correlation_id),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Server metrics collection.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total number of API requests handled.
    pub requests_total: AtomicU64,

    /// Requests that ended in an error response.
    pub requests_failed: AtomicU64,

    /// Requests currently in flight.
    pub active_requests: AtomicU64,

    /// Total number of queries executed.
    pub queries_total: AtomicU64,

    /// Total number of successful queries.
    pub queries_success: AtomicU64,

    /// Total number of failed queries.
    pub queries_failed: AtomicU64,

    /// Total query execution time in milliseconds.
    pub query_time_ms_total: AtomicU64,

    /// Total rows returned across all queries.
    pub rows_returned: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request as started. The returned guard marks it finished on drop.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            metrics: Arc::clone(self),
        }
    }

    /// Record a failed request.
    pub fn record_request_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query execution.
    pub fn record_query(&self, success: bool, duration: Duration, rows: usize) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.queries_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.query_time_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.rows_returned.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> u64 {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::SeqCst),
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_success: self.queries_success.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            query_time_ms_total: self.query_time_ms_total.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight gauge when dropped.
#[derive(Debug)]
pub struct RequestGuard {
    metrics: SharedMetrics,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub active_requests: u64,
    pub queries_total: u64,
    pub queries_success: u64,
    pub queries_failed: u64,
    pub query_time_ms_total: u64,
    pub rows_returned: u64,
}

impl MetricsSnapshot {
    /// Calculate average query time in milliseconds.
    pub fn avg_query_time_ms(&self) -> f64 {
        if self.queries_total == 0 {
            return 0.0;
        }
        self.query_time_ms_total as f64 / self.queries_total as f64
    }

    /// Calculate query success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.queries_total == 0 {
            return 100.0;
        }
        (self.queries_success as f64 / self.queries_total as f64) * 100.0
    }
}

/// Shared metrics type for thread-safe access.
pub type SharedMetrics = Arc<ServerMetrics>;

/// Create a new shared metrics collector.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(ServerMetrics::new())
}

/// Query timer for measuring execution duration.
pub struct QueryTimer {
    start: Instant,
    metrics: SharedMetrics,
}

impl QueryTimer {
    /// Start a new query timer.
    pub fn start(metrics: SharedMetrics) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Stop the timer and record the result.
    pub fn stop(self, success: bool, rows: usize) -> Duration {
        let duration = self.start.elapsed();
        self.metrics.record_query(success, duration, rows);
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServerMetrics::new();
        metrics.record_query(true, Duration::from_millis(100), 3);
        metrics.record_query(false, Duration::from_millis(50), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_total, 2);
        assert_eq!(snapshot.queries_success, 1);
        assert_eq!(snapshot.queries_failed, 1);
        assert_eq!(snapshot.query_time_ms_total, 150);
        assert_eq!(snapshot.rows_returned, 3);
        assert_eq!(snapshot.avg_query_time_ms(), 75.0);
        assert_eq!(snapshot.success_rate(), 50.0);
    }

    #[test]
    fn test_empty_metrics_rates() {
        let snapshot = ServerMetrics::new().snapshot();
        assert_eq!(snapshot.avg_query_time_ms(), 0.0);
        assert_eq!(snapshot.success_rate(), 100.0);
    }

    #[test]
    fn test_request_guard_tracks_in_flight() {
        let metrics = new_shared_metrics();
        let first = metrics.begin_request();
        let second = metrics.begin_request();
        assert_eq!(metrics.in_flight(), 2);

        drop(first);
        assert_eq!(metrics.in_flight(), 1);
        drop(second);
        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.snapshot().requests_total, 2);
    }

    #[test]
    fn test_query_timer_records() {
        let metrics = new_shared_metrics();
        QueryTimer::start(metrics.clone()).stop(true, 4);
        assert_eq!(metrics.snapshot().queries_success, 1);
        assert_eq!(metrics.snapshot().rows_returned, 4);
    }

    #[test]
    fn test_short_correlation_id() {
        let id = generate_short_correlation_id();
        assert_eq!(id.len(), 8);
        assert_ne!(id, generate_short_correlation_id());
    }

    #[test]
    fn test_request_context_log_prefix() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.log_prefix(), format!("[{}]", ctx.correlation_id));

        let ctx = ctx.with_operation("execute:create_item");
        assert!(ctx.log_prefix().ends_with("[execute:create_item]"));
    }
}
