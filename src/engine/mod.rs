//! Request processing engine
//!
//! ## Architecture
//!
//! ```text
//! Exchange ──> Strategy resolution ──> Task(RequestProcessor)
//!                                        │
//!                                        ▼
//!                              ProcessContext { exchange, slot, services }
//!                                        │
//!                 locate ── identify ── negotiate ── transform ── commit
//! ```
//!
//! An [`Exchange`] captures one request; a strategy turns it into a
//! [`Task`] wrapping the processor that will answer it. Tasks run inside a
//! [`ProcessContext`] which carries the shared [`EngineServices`]: the
//! resource locator chain, the image codec and the size limits. The task
//! lifecycle and the write-once [`ResponseSlot`](task::ResponseSlot) live
//! in [`task`]; the error taxonomy in [`error`].

pub mod codec;
pub mod error;
pub mod exchange;
pub mod image;
pub mod task;

pub use codec::{ImageCodec, ImageInfo, SniffCodec};
pub use error::{error_code, EngineError};
pub use exchange::{http_date, parse_http_date, EngineResponse, Exchange};
pub use task::{Lifecycle, RequestProcessor, StateError, Task, TaskOutcome};

use std::sync::Arc;

use crate::humanize::ByteSize;
use crate::locator::LocatorChain;

/// Limits applied to source material before any processing happens
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_image_file_size: ByteSize,
    pub max_image_resolution: u64,
}

/// Shared services every processor runs against
pub struct EngineServices {
    pub locators: LocatorChain,
    pub codec: Arc<dyn ImageCodec>,
    pub limits: ResourceLimits,
    /// Freshness lifetime, in seconds, granted to responses that do not
    /// carry their own
    pub default_max_age: u64,
    /// Whether URL sources may be fetched at all
    pub remote_enabled: bool,
}

/// Everything one task needs while it runs
pub struct ProcessContext {
    pub exchange: Exchange,
    pub response: task::ResponseSlot,
    pub services: Arc<EngineServices>,
}

impl ProcessContext {
    pub fn new(exchange: Exchange, services: Arc<EngineServices>) -> Self {
        ProcessContext {
            exchange,
            response: task::ResponseSlot::default(),
            services,
        }
    }
}
