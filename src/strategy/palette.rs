//! Palette stylesheet requests (`f=pcss`)
//!
//! Answers with a small CSS custom-property sheet of representative source
//! colors, so pages can tint placeholders before the image itself loads.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::engine::exchange::http_date;
use crate::engine::image::locate_source;
use crate::engine::task::RequestProcessor;
use crate::engine::{EngineError, Exchange, ProcessContext};

use super::Strategy;

const PALETTE_COLORS: usize = 8;

pub struct PaletteStrategy;

impl Strategy for PaletteStrategy {
    fn name(&self) -> &'static str {
        "palette"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        exchange
            .params
            .format
            .as_ref()
            .is_some_and(|f| f.name == "pcss")
    }

    fn create(&self) -> Box<dyn RequestProcessor> {
        Box::new(PaletteProcessor)
    }
}

pub struct PaletteProcessor;

#[async_trait]
impl RequestProcessor for PaletteProcessor {
    fn kind(&self) -> &'static str {
        "palette"
    }

    fn is_cacheable(&self) -> bool {
        true
    }

    fn cache_key(&self, exchange: &Exchange) -> Option<String> {
        if exchange.method == Method::POST || exchange.cache_disabled() {
            return None;
        }
        Some(exchange.base_cache_key())
    }

    async fn execute(&mut self, ctx: &mut ProcessContext) -> Result<(), EngineError> {
        if ctx.exchange.method == Method::POST {
            return Err(EngineError::MethodNotAllowed(
                "POST is not supported for palette requests".to_string(),
            ));
        }
        let services = Arc::clone(&ctx.services);
        let (data, _) = locate_source(&ctx.exchange, &services).await?;
        let info = services
            .codec
            .identify(&data)
            .ok_or_else(|| EngineError::UnsupportedMediaType("Unsupported source format".to_string()))?;

        let colors = services.codec.palette(&data, &info, PALETTE_COLORS);
        let mut css = String::from(":root{");
        for (index, color) in colors.iter().enumerate() {
            let _ = write!(css, "--palette-{}:{};", index, color.to_css());
        }
        css.push('}');
        for (index, color) in colors.iter().enumerate() {
            let _ = write!(css, "\n.palette-{}{{color:{};}}", index, color.to_css());
        }
        let body = Bytes::from(css);

        let headers = BTreeMap::from([
            ("Content-Type".to_string(), "text/css".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
            ("Date".to_string(), http_date(Utc::now())),
            (
                "Cache-Control".to_string(),
                format!("public, max-age={}", services.default_max_age),
            ),
        ]);
        ctx.response.commit(StatusCode::OK, headers)?;
        ctx.response.complete(body)?;
        Ok(())
    }
}
