//! Runtime request counters surfaced by `/status`.

use std::sync::Mutex;

/// Aggregate request statistics for the lifetime of the process.
///
/// Mutated behind a plain mutex; updates are a handful of additions and
/// the lock is never held across an await point.
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requests_processed: u64,
    errors: u64,
    total_processing_time_ms: f64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one terminal classification outcome. `no_match` counts as
    /// a processed request, not an error.
    pub fn record(&self, processing_time_ms: f64, ok: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.requests_processed += 1;
        inner.total_processing_time_ms += processing_time_ms;
        if !ok {
            inner.errors += 1;
        }
    }

    /// Snapshot of the counters, shaped for the `/status` payload.
    pub fn summary(&self) -> serde_json::Value {
        let inner = self.inner.lock().unwrap();
        let average = if inner.requests_processed > 0 {
            inner.total_processing_time_ms / inner.requests_processed as f64
        } else {
            0.0
        };
        let error_rate = if inner.requests_processed > 0 {
            inner.errors as f64 / inner.requests_processed as f64
        } else {
            0.0
        };
        serde_json::json!({
            "requestsProcessed": inner.requests_processed,
            "errors": inner.errors,
            "averageProcessingTimeMs": average,
            "errorRate": error_rate,
        })
    }
}
