//! Source image retrieval
//!
//! A source reference is either a path below the configured resource root
//! or an absolute `http(s)` URL. Locators are probed in registration order;
//! the first one that both handles the reference and finds something wins.
//! `Ok(None)` uniformly means "does not exist here", so a miss in one
//! locator falls through to the next.

pub mod file;
pub mod http;

pub use file::FileLocator;
pub use http::{HttpConfig, HttpLocator};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    Denied(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Upstream(String),
}

#[derive(Debug, Clone)]
pub struct LocatedResource {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ResourceLocator: Send + Sync {
    /// Whether this locator understands the given source reference
    fn handles(&self, source: &str) -> bool;

    async fn locate(&self, source: &str) -> Result<Option<LocatedResource>, LocatorError>;
}

#[derive(Clone, Default)]
pub struct LocatorChain {
    locators: Vec<Arc<dyn ResourceLocator>>,
}

impl LocatorChain {
    pub fn new(locators: Vec<Arc<dyn ResourceLocator>>) -> Self {
        LocatorChain { locators }
    }

    pub async fn locate(&self, source: &str) -> Result<Option<LocatedResource>, LocatorError> {
        for locator in &self.locators {
            if !locator.handles(source) {
                continue;
            }
            if let Some(found) = locator.locate(source).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
