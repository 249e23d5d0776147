//! Task lifecycle around a single processor run
//!
//! A [`Task`] wraps one [`RequestProcessor`] and enforces the lifecycle
//!
//! ```text
//! NEW -> RUNNING -> COMMITTED -> COMPLETED
//!          |                \
//!          +-> INTERRUPTED   +-> (abandoned on timeout, stays COMMITTED)
//! ```
//!
//! Processing failures travel as [`EngineError`](super::error::EngineError)
//! values and end in `INTERRUPTED`; calling into a task in the wrong state
//! is a caller bug and surfaces as [`StateError`], which is never mapped to
//! an HTTP status by the engine.

use async_trait::async_trait;
use axum::http::StatusCode;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

use super::error::EngineError;
use super::exchange::{EngineResponse, Exchange};
use super::ProcessContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Running,
    Committed,
    Completed,
    Interrupted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("task has already started ({0:?})")]
    AlreadyStarted(Lifecycle),

    #[error("task has already finished ({0:?})")]
    Finished(Lifecycle),

    #[error("response is already committed")]
    AlreadyCommitted,

    #[error("response has not been committed")]
    NotCommitted,
}

/// What one processor run produced
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(EngineResponse),
    Interrupted { status: StatusCode, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    pub status: StatusCode,
    pub message: String,
}

/// One unit of request handling, resolved by a strategy
#[async_trait]
pub trait RequestProcessor: Send {
    /// Short identifier, also recorded on cache entries as the producer
    fn kind(&self) -> &'static str;

    fn is_cacheable(&self) -> bool {
        false
    }

    /// Full cache key for this request, or `None` when the response must
    /// not be cached
    fn cache_key(&self, _exchange: &Exchange) -> Option<String> {
        None
    }

    async fn execute(&mut self, ctx: &mut ProcessContext) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Committed {
        status: StatusCode,
        headers: BTreeMap<String, String>,
    },
    Completed(EngineResponse),
}

/// Write-once response staging area. A processor first commits status and
/// headers, then completes with the body; the split is what lets the
/// dispatcher distinguish a request it can still answer with an error from
/// one already half-way onto the wire.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    state: Mutex<SlotState>,
}

impl ResponseSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn commit(
        &self,
        status: StatusCode,
        headers: BTreeMap<String, String>,
    ) -> Result<(), StateError> {
        let mut state = self.lock();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Committed { status, headers };
                Ok(())
            }
            _ => Err(StateError::AlreadyCommitted),
        }
    }

    pub fn complete(&self, body: bytes::Bytes) -> Result<(), StateError> {
        let mut state = self.lock();
        match std::mem::take(&mut *state) {
            SlotState::Committed { status, headers } => {
                *state = SlotState::Completed(EngineResponse { status, headers, body });
                Ok(())
            }
            SlotState::Empty => Err(StateError::NotCommitted),
            finished @ SlotState::Completed(_) => {
                *state = finished;
                Err(StateError::AlreadyCommitted)
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        !matches!(*self.lock(), SlotState::Empty)
    }

    pub fn take_completed(&self) -> Option<EngineResponse> {
        let mut state = self.lock();
        match std::mem::take(&mut *state) {
            SlotState::Completed(response) => Some(response),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Whatever is salvageable from an abandoned run: the committed head
    /// with an empty body, or the full response when it did complete.
    pub fn take_partial(&self) -> Option<EngineResponse> {
        match std::mem::take(&mut *self.lock()) {
            SlotState::Completed(response) => Some(response),
            SlotState::Committed { status, headers } => Some(EngineResponse {
                status,
                headers,
                body: bytes::Bytes::new(),
            }),
            SlotState::Empty => None,
        }
    }
}

pub struct Task {
    processor: Box<dyn RequestProcessor>,
    lifecycle: Lifecycle,
    request_id: Option<Uuid>,
    interruption: Option<Interruption>,
    pre_hook: Option<Box<dyn FnOnce(&Exchange) + Send>>,
}

impl Task {
    pub fn new(processor: Box<dyn RequestProcessor>) -> Self {
        Task {
            processor,
            lifecycle: Lifecycle::New,
            request_id: None,
            interruption: None,
            pre_hook: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.processor.kind()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Assigned on first use so untracked tasks never burn an id
    pub fn request_id(&mut self) -> Uuid {
        *self.request_id.get_or_insert_with(Uuid::now_v7)
    }

    pub fn is_cacheable(&self) -> bool {
        self.processor.is_cacheable()
    }

    pub fn cache_key(&self, exchange: &Exchange) -> Option<String> {
        self.processor.cache_key(exchange)
    }

    pub fn interruption(&self) -> Option<&Interruption> {
        self.interruption.as_ref()
    }

    /// Registers a callback fired once, right before the processor runs
    pub fn set_pre_hook(
        &mut self,
        hook: Box<dyn FnOnce(&Exchange) + Send>,
    ) -> Result<(), StateError> {
        match self.lifecycle {
            Lifecycle::New => {
                self.pre_hook = Some(hook);
                Ok(())
            }
            Lifecycle::Running => Err(StateError::AlreadyStarted(self.lifecycle)),
            other => Err(StateError::Finished(other)),
        }
    }

    pub async fn run(&mut self, ctx: &mut ProcessContext) -> Result<TaskOutcome, StateError> {
        match self.lifecycle {
            Lifecycle::New => {}
            Lifecycle::Running => return Err(StateError::AlreadyStarted(self.lifecycle)),
            other => return Err(StateError::Finished(other)),
        }
        self.lifecycle = Lifecycle::Running;
        if let Some(hook) = self.pre_hook.take() {
            hook(&ctx.exchange);
        }

        match self.processor.execute(ctx).await {
            Ok(()) => {
                if let Some(response) = ctx.response.take_completed() {
                    self.lifecycle = Lifecycle::Completed;
                    Ok(TaskOutcome::Completed(response))
                } else {
                    self.fail(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "processor finished without a response".to_string(),
                    )
                }
            }
            Err(err) => {
                let status = err.status_code();
                self.fail(status, err.to_string())
            }
        }
    }

    /// Interrupts a task that has not finished. The recorded status and
    /// message become the error response.
    pub fn interrupt(&mut self, status: StatusCode, message: &str) -> Result<(), StateError> {
        match self.lifecycle {
            Lifecycle::New | Lifecycle::Running => {
                self.lifecycle = Lifecycle::Interrupted;
                self.interruption = Some(Interruption {
                    status,
                    message: message.to_string(),
                });
                Ok(())
            }
            other => Err(StateError::Finished(other)),
        }
    }

    /// Marks a timed-out run whose response head already committed. Such a
    /// task can no longer be answered with a clean error, so it keeps its
    /// committed state and the caller salvages what the slot holds.
    pub fn abandon(&mut self) -> Result<(), StateError> {
        match self.lifecycle {
            Lifecycle::Running => {
                self.lifecycle = Lifecycle::Committed;
                Ok(())
            }
            Lifecycle::New => Err(StateError::NotCommitted),
            other => Err(StateError::Finished(other)),
        }
    }

    fn fail(&mut self, status: StatusCode, message: String) -> Result<TaskOutcome, StateError> {
        self.lifecycle = Lifecycle::Interrupted;
        self.interruption = Some(Interruption {
            status,
            message: message.clone(),
        });
        Ok(TaskOutcome::Interrupted { status, message })
    }
}
