//! Bounded dispatcher
//!
//! The [`Dispatcher`] is the single entry point the HTTP layer talks to.
//! `submit` always produces a response:
//!
//! ```text
//! Exchange
//!   │  method gate, parse + hint negotiation
//!   ▼
//! strategy resolution ── cache lookup ──(hit)──> replayed response
//!   │ (miss)
//!   ▼
//! worker pool (or host runtime) ── timeout ── store ──> response
//! ```
//!
//! Failures at any stage map through the error taxonomy into a JSON error
//! envelope; a saturated pool answers 503 with `Retry-After`.

pub mod pool;

pub use pool::{JobOutcome, PoolConfig, PoolStats, Saturated, WorkerPool};

use axum::http::{Method, StatusCode};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::cache::{BoundedCache, CacheEntry};
use crate::engine::{EngineResponse, EngineServices, Exchange, ProcessContext, Task};
use crate::observability::Metrics;
use crate::strategy::StrategyResolver;

/// Debug header naming the cache verdict for one response
pub const CACHE_VERDICT_HEADER: &str = "x-pixbox-cache";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Server is busy, try again later")]
    Saturated,

    #[error("Method not allowed")]
    MethodNotAllowed { allow: &'static str },

    #[error("Worker dropped the request")]
    WorkerGone,
}

/// Observes failed requests before the error envelope is written. Returning
/// a response suppresses the default body.
pub trait ErrorHook: Send + Sync {
    fn on_error(
        &self,
        status: StatusCode,
        message: &str,
        exchange: &Exchange,
    ) -> Option<EngineResponse>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub pool: PoolConfig,
    /// Run tasks straight on the host runtime instead of an owned pool
    pub use_host_pool: bool,
    pub enable_post: bool,
}

pub struct Dispatcher {
    pool: Option<WorkerPool>,
    resolver: StrategyResolver,
    cache: Option<Arc<BoundedCache>>,
    services: Arc<EngineServices>,
    metrics: Arc<Metrics>,
    error_hook: Option<Arc<dyn ErrorHook>>,
    task_timeout: Duration,
    enable_post: bool,
}

enum Failure {
    Dispatch(DispatchError),
    Interrupted { status: StatusCode, message: String },
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        resolver: StrategyResolver,
        services: Arc<EngineServices>,
        cache: Option<Arc<BoundedCache>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let task_timeout = config.pool.task_timeout;
        let pool = if config.use_host_pool {
            None
        } else {
            Some(WorkerPool::start(config.pool))
        };
        Dispatcher {
            pool,
            resolver,
            cache,
            services,
            metrics,
            error_hook: None,
            task_timeout,
            enable_post: config.enable_post,
        }
    }

    pub fn set_error_hook(&mut self, hook: Arc<dyn ErrorHook>) {
        self.error_hook = Some(hook);
    }

    /// Runs one request to completion. Never fails; every outcome, including
    /// rejection and timeout, is already rendered as a response.
    pub async fn submit(&self, mut exchange: Exchange) -> EngineResponse {
        let bytes_in = exchange.body.as_ref().map_or(0, |b| b.len()) as u64;
        self.metrics.request_received(bytes_in);
        let started = std::time::Instant::now();

        let response = match self.process(&mut exchange).await {
            Ok(response) => response,
            Err(failure) => self.render_failure(failure, &exchange),
        };

        self.metrics
            .response_sent(response.body.len() as u64, started.elapsed());
        response
    }

    /// Executor counters; delegate mode reports `-1` where it has nothing
    /// to count, rejection stays a real number.
    pub fn stats(&self) -> PoolStats {
        match &self.pool {
            Some(pool) => pool.stats(),
            None => PoolStats {
                pool_size: -1,
                active_count: -1,
                queue_size: -1,
                completed_task_count: -1,
                rejected_task_count: 0,
            },
        }
    }

    async fn process(&self, exchange: &mut Exchange) -> Result<EngineResponse, Failure> {
        self.method_gate(&exchange.method)?;

        if let Err(err) = exchange.prepare() {
            // failed before strategy resolution, nothing reaches the pool
            return Err(Failure::Interrupted {
                status: err.status_code(),
                message: err.to_string(),
            });
        }

        let mut task = Task::new(self.resolver.resolve(exchange));
        let kind = task.kind();
        let request_id = task.request_id();
        let path = exchange.path.clone();
        let _ = task.set_pre_hook(Box::new(move |ex: &Exchange| {
            debug!(%request_id, method = %ex.method, path = %ex.path, "Task starting");
        }));

        let key = match (&self.cache, task.is_cacheable()) {
            (Some(_), true) => task.cache_key(exchange),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, key.as_deref()) {
            let now = Utc::now();
            if let Some(entry) = cache.lookup(key, now.timestamp()) {
                debug!(key, "Cache hit");
                return Ok(serve_hit(exchange, &entry, now));
            }
        }

        let ctx = ProcessContext::new(exchange.clone(), Arc::clone(&self.services));
        let outcome = match &self.pool {
            Some(pool) => {
                let receiver = pool
                    .submit(task, ctx)
                    .map_err(|Saturated| Failure::Dispatch(DispatchError::Saturated))?;
                receiver
                    .await
                    .map_err(|_| Failure::Dispatch(DispatchError::WorkerGone))?
            }
            None => {
                let limit = self.task_timeout;
                let mut ctx = ctx;
                tokio::spawn(async move { pool::run_with_timeout(&mut task, &mut ctx, limit).await })
                    .await
                    .map_err(|_| Failure::Dispatch(DispatchError::WorkerGone))?
            }
        };

        match outcome {
            JobOutcome::Completed(mut response) => {
                if let (Some(cache), Some(key)) = (&self.cache, key) {
                    let stored =
                        CacheEntry::from_response(key.clone(), &response, kind, Utc::now())
                            .is_some_and(|entry| cache.store(entry));
                    debug!(%key, stored, "Cache miss completed");
                    response
                        .headers
                        .insert(CACHE_VERDICT_HEADER.to_string(), "MISS".to_string());
                }
                Ok(response)
            }
            JobOutcome::Abandoned(partial) => Ok(partial),
            JobOutcome::Interrupted { status, message } => {
                Err(Failure::Interrupted { status, message })
            }
            JobOutcome::Contract(state) => {
                error!(error = %state, path = %path, "Task state contract violated");
                Err(Failure::Interrupted {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal processing error".to_string(),
                })
            }
        }
    }

    fn method_gate(&self, method: &Method) -> Result<(), Failure> {
        let allow = if self.enable_post { "GET, POST" } else { "GET" };
        match *method {
            Method::GET => Ok(()),
            Method::POST if self.enable_post => Ok(()),
            _ => Err(Failure::Dispatch(DispatchError::MethodNotAllowed {
                allow,
            })),
        }
    }

    fn render_failure(&self, failure: Failure, exchange: &Exchange) -> EngineResponse {
        let (status, message, allow) = match failure {
            Failure::Dispatch(DispatchError::Saturated) => (
                StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::Saturated.to_string(),
                None,
            ),
            Failure::Dispatch(DispatchError::MethodNotAllowed { allow }) => (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("Method not allowed, expected one of: {allow}"),
                Some(allow),
            ),
            Failure::Dispatch(DispatchError::WorkerGone) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                DispatchError::WorkerGone.to_string(),
                None,
            ),
            Failure::Interrupted { status, message } => (status, message, None),
        };

        if status.is_server_error() {
            warn!(status = status.as_u16(), reason = %message, path = %exchange.path, "Request failed");
        } else {
            debug!(status = status.as_u16(), reason = %message, path = %exchange.path, "Request refused");
        }
        self.metrics.error_recorded(status.as_u16());

        if let Some(hook) = &self.error_hook {
            if let Some(response) = hook.on_error(status, &message, exchange) {
                return response;
            }
        }

        let mut response = EngineResponse::error(status, &message);
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response = response.with_header("Retry-After", "30");
        }
        if let Some(allow) = allow {
            response = response.with_header("Allow", allow);
        }
        response
    }
}

/// Replays a cached entry, answering 304 when the client's validators show
/// it already holds the body.
fn serve_hit(
    exchange: &Exchange,
    entry: &CacheEntry,
    now: chrono::DateTime<Utc>,
) -> EngineResponse {
    let mut response = entry.to_response(now);
    response
        .headers
        .insert(CACHE_VERDICT_HEADER.to_string(), "HIT".to_string());

    if exchange.revalidates(entry.etag(), entry.last_modified()) {
        response.status = StatusCode::NOT_MODIFIED;
        response.body = bytes::Bytes::new();
        response.headers.retain(|name, _| {
            !["content-type", "content-length", "content-disposition"]
                .iter()
                .any(|stripped| name.eq_ignore_ascii_case(stripped))
        });
    }
    response
}
