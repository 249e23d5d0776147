//! Image request processing
//!
//! [`ImageProcessor`] is the workhorse behind most strategies: it locates
//! the source (filesystem, remote URL or POST body), enforces the size and
//! resolution limits, negotiates output format and quality when enabled,
//! runs the codec and commits the response. Negotiated state that is not
//! visible in the request path is folded into the cache key as a `#` suffix
//! so differently negotiated responses never collide.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::hints::{format_dpr, is_mobile_agent};
use crate::humanize::ByteSize;

use super::codec::TransformPlan;
use super::error::EngineError;
use super::exchange::{http_date, Exchange};
use super::task::RequestProcessor;
use super::{EngineServices, ProcessContext};

/// Base factor applied to automatic quality selection
const AUTO_QUALITY: f64 = 0.8;

pub struct ImageProcessor {
    kind: &'static str,
    auto_format: bool,
    client_hints: bool,
}

impl ImageProcessor {
    /// Serves the image exactly as addressed by its path parameters
    pub fn new() -> Self {
        ImageProcessor {
            kind: "image",
            auto_format: false,
            client_hints: false,
        }
    }

    /// Additionally negotiates output format and quality from `Accept` and
    /// the user agent
    pub fn with_auto_format() -> Self {
        ImageProcessor {
            kind: "auto-format",
            auto_format: true,
            client_hints: false,
        }
    }

    /// Additionally folds device hints (DPR, width) into the negotiation
    pub fn with_client_hints() -> Self {
        ImageProcessor {
            kind: "client-hint",
            auto_format: true,
            client_hints: true,
        }
    }

    fn build_plan(&self, exchange: &Exchange) -> TransformPlan {
        let params = &exchange.params;
        let mut scale = params.scale.clone();
        if self.client_hints {
            if scale.dpr.is_none() {
                scale.dpr = exchange.hints.dpr;
            }
            if !scale.resizes() {
                scale.width = exchange.hints.width;
            }
        }
        TransformPlan {
            format: params
                .format
                .as_ref()
                .map(|f| f.name.clone())
                .or_else(|| self.negotiated_format(exchange).map(str::to_string)),
            quality: params.quality.or_else(|| self.negotiated_quality(exchange)),
            scale,
            crop: params.crop.clone(),
            padding: params.padding,
            border: params.border,
        }
    }

    fn negotiated_format(&self, exchange: &Exchange) -> Option<&'static str> {
        if !self.auto_format || exchange.params.format.is_some() || exchange.negotiation_bypassed() {
            return None;
        }
        negotiate_format(exchange)
    }

    fn negotiated_quality(&self, exchange: &Exchange) -> Option<u8> {
        if !self.auto_format || exchange.params.quality.is_some() || exchange.negotiation_bypassed() {
            return None;
        }
        Some(negotiate_quality(exchange))
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Output format the client is best served with, in preference order
pub fn negotiate_format(exchange: &Exchange) -> Option<&'static str> {
    if exchange.hints.accepts_webp {
        Some("webp")
    } else if exchange.hints.accepts_jp2 {
        Some("jp2")
    } else {
        None
    }
}

/// Automatic compression quality in percent, lower for mobile devices
pub fn negotiate_quality(exchange: &Exchange) -> u8 {
    let device = if is_mobile_agent(exchange.user_agent()) {
        0.85
    } else {
        0.9
    };
    (AUTO_QUALITY * device * 100.0) as u8
}

#[async_trait]
impl RequestProcessor for ImageProcessor {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn is_cacheable(&self) -> bool {
        true
    }

    fn cache_key(&self, exchange: &Exchange) -> Option<String> {
        if exchange.method == Method::POST || exchange.cache_disabled() {
            return None;
        }
        let mut key = exchange.base_cache_key();
        let mut parts: Vec<String> = Vec::new();
        if let Some(quality) = self.negotiated_quality(exchange) {
            parts.push(format!("o={}", quality));
        }
        if let Some(format) = self.negotiated_format(exchange) {
            parts.push(format!("f={}", format));
        }
        if self.client_hints {
            if !exchange.params.scale.resizes() {
                if let Some(width) = exchange.hints.width {
                    parts.push(format!("sw={}", width));
                }
            }
            if exchange.params.scale.dpr.is_none() {
                if let Some(dpr) = exchange.hints.dpr {
                    parts.push(format!("dpr={}", format_dpr(dpr)));
                }
            }
        }
        if !parts.is_empty() {
            key.push('#');
            key.push_str(&parts.join(";"));
        }
        Some(key)
    }

    async fn execute(&mut self, ctx: &mut ProcessContext) -> Result<(), EngineError> {
        let services = Arc::clone(&ctx.services);
        let exchange = &ctx.exchange;

        let (data, last_modified) = if exchange.method == Method::POST {
            (posted_source(exchange, services.limits.max_image_file_size)?, None)
        } else {
            locate_source(exchange, &services).await?
        };

        if data.len() as u64 > services.limits.max_image_file_size.as_u64() {
            return Err(EngineError::PayloadTooLarge(format!(
                "Source exceeds the {} limit",
                services.limits.max_image_file_size.to_human_readable()
            )));
        }

        let info = services
            .codec
            .identify(&data)
            .ok_or_else(|| EngineError::UnsupportedMediaType("Unsupported source format".to_string()))?;
        if info.pixels() > services.limits.max_image_resolution {
            return Err(EngineError::BadRequest(format!(
                "Image resolution {}x{} exceeds the maximum of {} pixels",
                info.width, info.height, services.limits.max_image_resolution
            )));
        }

        let plan = self.build_plan(exchange);
        if let Some(format) = plan.format.as_deref() {
            // only explicitly requested formats are validated here, a
            // negotiated target the codec cannot write falls back inside it
            if exchange.params.format.is_some() && !services.codec.can_write(format) {
                return Err(EngineError::BadRequest(format!("Unsupported format: {}", format)));
            }
        }
        let output = services.codec.transform(data, &info, &plan)?;

        let etag = entity_tag(&output.bytes);
        let mut headers = BTreeMap::new();
        headers.insert("Date".to_string(), http_date(Utc::now()));
        if exchange.cache_disabled() {
            headers.insert("Cache-Control".to_string(), "no-cache".to_string());
            headers.insert("Pragma".to_string(), "no-cache".to_string());
        } else {
            headers.insert(
                "Cache-Control".to_string(),
                format!("public, max-age={}", services.default_max_age),
            );
        }
        headers.insert("ETag".to_string(), etag.clone());
        let mut vary: Vec<&str> = Vec::new();
        if self.auto_format && !exchange.negotiation_bypassed() {
            // jp2 sniffed from the agent is the one negotiation that does not
            // read the Accept header
            if self.negotiated_format(exchange) == Some("jp2") && exchange.hints.jp2_from_agent {
                vary.push("User-Agent");
            } else {
                vary.push("Accept");
            }
        }
        if self.client_hints {
            vary.extend(exchange.hints.vary());
        }
        if !vary.is_empty() {
            headers.insert("Vary".to_string(), vary.join(", "));
        }
        if let Some(modified) = last_modified {
            headers.insert("Last-Modified".to_string(), http_date(modified));
        }
        if self.client_hints {
            if let Some(dpr) = exchange.params.scale.dpr.or(exchange.hints.dpr) {
                headers.insert("Content-DPR".to_string(), format_dpr(dpr));
            }
        }

        if exchange.method != Method::POST && exchange.revalidates(Some(&etag), last_modified) {
            ctx.response.commit(StatusCode::NOT_MODIFIED, headers)?;
            ctx.response.complete(Bytes::new())?;
            return Ok(());
        }

        headers.insert("Content-Type".to_string(), output.content_type.to_string());
        headers.insert("Content-Length".to_string(), output.bytes.len().to_string());
        if let Some(name) = exchange.download_name() {
            let name = if name.is_empty() {
                exchange.params.source().rsplit('/').next().unwrap_or("download")
            } else {
                name
            };
            if valid_download_name(name) {
                headers.insert(
                    "Content-Disposition".to_string(),
                    format!("attachment; filename=\"{}\"", name),
                );
            }
        }

        ctx.response.commit(StatusCode::OK, headers)?;
        ctx.response.complete(output.bytes)?;
        Ok(())
    }
}

pub(crate) async fn locate_source(
    exchange: &Exchange,
    services: &EngineServices,
) -> Result<(Bytes, Option<DateTime<Utc>>), EngineError> {
    let source = exchange.params.source();
    if source.is_empty() {
        return Err(EngineError::NotFound("Missing source path".to_string()));
    }
    if exchange.params.is_remote_source() {
        if !services.remote_enabled {
            return Err(EngineError::BadRequest("Remote sources are disabled".to_string()));
        }
        if !source.starts_with("http://") && !source.starts_with("https://") {
            return Err(EngineError::BadRequest(format!("Unsupported source scheme: {}", source)));
        }
    }
    match services.locators.locate(source).await? {
        Some(resource) => Ok((resource.bytes, resource.last_modified)),
        None => Err(EngineError::NotFound(format!("Not found: {}", source))),
    }
}

fn posted_source(exchange: &Exchange, limit: ByteSize) -> Result<Bytes, EngineError> {
    let declared: u64 = exchange
        .header("content-length")
        .ok_or(EngineError::LengthRequired)?
        .trim()
        .parse()
        .map_err(|_| EngineError::BadRequest("Invalid Content-Length".to_string()))?;
    if declared > limit.as_u64() {
        return Err(EngineError::PayloadTooLarge(format!(
            "Declared content length exceeds the {} limit",
            limit.to_human_readable()
        )));
    }

    let content_type = exchange.header("content-type").unwrap_or_default();
    let mime: mime::Mime = content_type
        .parse()
        .map_err(|_| EngineError::UnsupportedMediaType(format!("Unsupported media type: {}", content_type)))?;
    if mime.type_() != mime::IMAGE {
        return Err(EngineError::UnsupportedMediaType(format!(
            "Unsupported media type: {}",
            mime.essence_str()
        )));
    }

    let body = exchange.body.clone().unwrap_or_default();
    if body.is_empty() {
        return Err(EngineError::BadRequest("Empty request body".to_string()));
    }
    if body.len() as u64 != declared {
        return Err(EngineError::BadRequest("Content length mismatch".to_string()));
    }
    Ok(body)
}

/// Names outside `[A-Za-z0-9._-]` or longer than 128 bytes lose the
/// disposition instead of reaching the header line
fn valid_download_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn entity_tag(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    format!("\"{}\"", hex::encode(&digest[..16]))
}
