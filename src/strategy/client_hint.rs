//! Device hint negotiation

use crate::engine::image::ImageProcessor;
use crate::engine::{Exchange, RequestProcessor};

use super::Strategy;

/// Claims requests from clients describing their device through hint
/// headers or the hint cookie. Subsumes format negotiation.
pub struct ClientHintStrategy;

impl Strategy for ClientHintStrategy {
    fn name(&self) -> &'static str {
        "client-hint"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        let hints = &exchange.hints;
        hints.dpr.is_some() || hints.width.is_some() || hints.cookie_present
    }

    fn create(&self) -> Box<dyn RequestProcessor> {
        Box::new(ImageProcessor::with_client_hints())
    }
}
