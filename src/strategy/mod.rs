//! Request strategies
//!
//! A strategy inspects an incoming exchange and, when it matches, produces
//! the processor that answers it. Strategies are consulted in a configured
//! order and the first match wins; a request nothing claims falls back to
//! the plain image processor. The set of available strategies is fixed at
//! startup through [`registry::StrategyRegistry`], so a configured order
//! naming an unknown strategy fails boot instead of a request.

pub mod auto_format;
pub mod bot;
pub mod client_hint;
pub mod document;
pub mod metadata;
pub mod palette;
pub mod registry;

pub use auto_format::AutoFormatStrategy;
pub use bot::BotStrategy;
pub use client_hint::ClientHintStrategy;
pub use document::PdfStrategy;
pub use metadata::MetadataStrategy;
pub use palette::PaletteStrategy;
pub use registry::{RegistryError, StrategyRegistry, StrategyResolver};

use crate::engine::{Exchange, RequestProcessor};

/// Resolution order applied when the configuration does not set one
pub const DEFAULT_ORDER: [&str; 6] = [
    "bot",
    "metadata",
    "pdf",
    "palette",
    "client-hint",
    "auto-format",
];

pub trait Strategy: Send + Sync {
    /// Registry name, referenced by the configured resolution order
    fn name(&self) -> &'static str;

    /// Whether this strategy claims the request
    fn matches(&self, exchange: &Exchange) -> bool;

    /// Builds the processor that will answer it
    fn create(&self) -> Box<dyn RequestProcessor>;
}
