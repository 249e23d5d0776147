//! Wire shapes for the management surface.
//!
//! The image pipeline itself answers with raw bytes and headers; everything
//! JSON-shaped lives here. The stats document served at the configured stats
//! path looks like:
//!
//! ```json
//! {
//!   "service": "pixbox",
//!   "version": "0.4.2",
//!   "uptime": "01h 12m 09s",
//!   "executor": {
//!     "poolSize": 8,
//!     "activeCount": 2,
//!     "queueSize": 0,
//!     "completedTaskCount": 1047,
//!     "rejectedTaskCount": 3
//!   },
//!   "cache": { "size": 212, "hitRate": 0.83 },
//!   "throughput": {
//!     "requestCount": 1050,
//!     "bytesIn": 0,
//!     "bytesOut": 73400320,
//!     "averageResponseMicros": 5120,
//!     "errors": { "404": 12, "503": 3 }
//!   }
//! }
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

use crate::dispatch::PoolStats;
use crate::observability::MetricsSnapshot;

/// Error envelope, shared with the engine's own failure responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDocument {
    pub service: String,
    pub version: String,
    pub uptime: String,
    pub executor: ExecutorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub throughput: ThroughputStats,
}

/// Worker pool counters. All `-1` when the dispatcher delegates to the
/// host runtime, except the rejection count which stays real.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStats {
    pub pool_size: i64,
    pub active_count: i64,
    pub queue_size: i64,
    pub completed_task_count: i64,
    pub rejected_task_count: i64,
}

impl From<PoolStats> for ExecutorStats {
    fn from(stats: PoolStats) -> Self {
        ExecutorStats {
            pool_size: stats.pool_size,
            active_count: stats.active_count,
            queue_size: stats.queue_size,
            completed_task_count: stats.completed_task_count,
            rejected_task_count: stats.rejected_task_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputStats {
    pub request_count: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub average_response_micros: u64,
    pub errors: BTreeMap<u16, u64>,
}

impl From<MetricsSnapshot> for ThroughputStats {
    fn from(snapshot: MetricsSnapshot) -> Self {
        let average_response_micros = snapshot.average_response_micros();
        ThroughputStats {
            request_count: snapshot.requests,
            bytes_in: snapshot.bytes_in,
            bytes_out: snapshot.bytes_out,
            average_response_micros,
            errors: snapshot.errors,
        }
    }
}

/// `?q=cache` listing
#[derive(Debug, Serialize)]
pub struct CacheListing {
    pub count: usize,
    pub keys: Vec<String>,
}

/// `?q=cache&a=delete` result
#[derive(Debug, Serialize)]
pub struct DeletedCount {
    pub deleted: usize,
}
