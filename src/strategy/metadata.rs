//! Image metadata requests (`f=exif`)

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::exchange::http_date;
use crate::engine::image::locate_source;
use crate::engine::task::RequestProcessor;
use crate::engine::{EngineError, Exchange, ProcessContext};

use super::Strategy;

pub struct MetadataStrategy;

impl Strategy for MetadataStrategy {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        exchange
            .params
            .format
            .as_ref()
            .is_some_and(|f| f.name == "exif")
    }

    fn create(&self) -> Box<dyn RequestProcessor> {
        Box::new(MetadataProcessor)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageMetadata<'a> {
    source: &'a str,
    format: &'static str,
    content_type: &'static str,
    width: u32,
    height: u32,
    size: usize,
}

pub struct MetadataProcessor;

#[async_trait]
impl RequestProcessor for MetadataProcessor {
    fn kind(&self) -> &'static str {
        "metadata"
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
                "POST is not supported for metadata requests".to_string(),
            ));
        }
        let services = Arc::clone(&ctx.services);
        let (data, _) = locate_source(&ctx.exchange, &services).await?;
        let info = services
            .codec
            .identify(&data)
            .ok_or_else(|| EngineError::UnsupportedMediaType("Unsupported source format".to_string()))?;

        let metadata = ImageMetadata {
            source: ctx.exchange.params.source(),
            format: info.format,
            content_type: info.content_type,
            width: info.width,
            height: info.height,
            size: data.len(),
        };
        let body = Bytes::from(
            serde_json::to_vec(&metadata)
                .map_err(|err| EngineError::Internal(err.to_string()))?,
        );

        let headers = BTreeMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
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
