//! Request counters exposed through the stats endpoint

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Metrics handle for recording counters/gauges
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    response_micros: AtomicU64,
    errors: Mutex<BTreeMap<u16, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_received(&self, bytes_in: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        tracing::debug!(counter = "requests", "Metric incremented");
    }

    pub fn response_sent(&self, bytes_out: u64, elapsed: Duration) {
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        self.response_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn error_recorded(&self, status: u16) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        *errors.entry(status).or_insert(0) += 1;
        tracing::debug!(counter = "errors", status, "Metric incremented");
    }

    /// Error counts keyed by HTTP status
    pub fn errors(&self) -> BTreeMap<u16, u64> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            response_micros: self.response_micros.load(Ordering::Relaxed),
            errors: self.errors(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub response_micros: u64,
    pub errors: BTreeMap<u16, u64>,
}

impl MetricsSnapshot {
    /// Mean response time in microseconds, zero before any traffic
    pub fn average_response_micros(&self) -> u64 {
        if self.requests == 0 {
            return 0;
        }
        self.response_micros / self.requests
    }
}
