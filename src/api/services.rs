use axum::body::Body;
use axum::extract::rejection::ExtensionRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::request::Parts;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http_body_util::BodyExt;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::{debug, info};

use super::models::{CacheListing, CacheStats, DeletedCount, ExecutorStats, StatsDocument, ThroughputStats};
use super::state::AppState;
use super::utils::{format_uptime, parse_query};
use crate::api::error::ApiError;
use crate::engine::{EngineResponse, Exchange};

/// Catch-all image endpoint
///
/// GET and POST feed the dispatcher, DELETE drops the cached variants of
/// the requested path, everything else is refused by the dispatcher's
/// method gate. The raw URI path goes into the exchange undecoded; the
/// parameter parser owns percent-decoding so it happens exactly once.
pub async fn serve(
    State(state): State<AppState>,
    connect: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();

    if parts.method == Method::DELETE {
        return match invalidate(&state, &parts) {
            Ok(status) => status.into_response(),
            Err(err) => err.into_response(),
        };
    }

    let body = match collect_body(&state, &parts, body).await {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };

    let query = parse_query(parts.uri.query());
    let remote_addr = connect.ok().map(|ConnectInfo(addr)| addr.ip());
    let exchange = Exchange::new(
        parts.method,
        "",
        parts.uri.path(),
        query,
        parts.headers,
        remote_addr,
        body,
    );

    into_http(state.dispatcher.submit(exchange).await)
}

/// Stats endpoint, restricted to the configured client addresses.
///
/// Without a query it answers the full stats document. `?q=errors` returns
/// the per-status error counters, `?q=cache` lists cached keys with an
/// optional `f` regex filter, and `?q=cache&f=...&a=delete` drops the
/// matching entries.
pub async fn stats(
    State(state): State<AppState>,
    connect: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let allowed = connect
        .ok()
        .is_some_and(|ConnectInfo(addr)| state.stats_allow.matches(&addr.ip().to_string()));
    if !allowed {
        return Err(ApiError::Forbidden("Stats access is restricted".to_string()));
    }

    let query = parse_query(request.uri().query());
    match query.get("q").map(String::as_str) {
        None => Ok(Json(stats_document(&state)).into_response()),
        Some("errors") => Ok(Json(state.metrics.errors()).into_response()),
        Some("cache") => cache_query(&state, &query),
        Some(other) => Err(ApiError::BadRequest(format!("Unknown stats query: {other}"))),
    }
}

/// Removes every cached variant of the request path. The base key strips
/// negotiated state, so one DELETE covers all of its vary suffixes.
fn invalidate(state: &AppState, parts: &Parts) -> Result<StatusCode, ApiError> {
    let Some(cache) = &state.cache else {
        return Err(ApiError::NotFound("Caching is disabled".to_string()));
    };

    let mut probe = Exchange::new(
        Method::GET,
        "",
        parts.uri.path(),
        parse_query(parts.uri.query()),
        parts.headers.clone(),
        None,
        None,
    );
    probe
        .prepare()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let base = probe.base_cache_key();
    let pattern = Regex::new(&format!("^{}(#.*)?$", regex::escape(&base)))
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let removed = cache.invalidate_matching(&pattern);
    if removed == 0 {
        return Err(ApiError::NotFound(format!("Not cached: {}", probe.params.source())));
    }

    info!(key = %base, removed, "Cache entries invalidated");
    Ok(StatusCode::NO_CONTENT)
}

fn cache_query(
    state: &AppState,
    query: &BTreeMap<String, String>,
) -> Result<Response, ApiError> {
    let Some(cache) = &state.cache else {
        return Err(ApiError::NotFound("Caching is disabled".to_string()));
    };

    let filter = query
        .get("f")
        .map(|f| Regex::new(f))
        .transpose()
        .map_err(|err| ApiError::BadRequest(format!("Invalid filter: {err}")))?;

    if query.get("a").map(String::as_str) == Some("delete") {
        let Some(filter) = filter else {
            return Err(ApiError::BadRequest(
                "Deleting cache entries requires a filter".to_string(),
            ));
        };
        let deleted = cache.invalidate_matching(&filter);
        debug!(deleted, "Cache entries deleted through stats endpoint");
        return Ok(Json(DeletedCount { deleted }).into_response());
    }

    let keys: Vec<String> = cache
        .entries()
        .into_iter()
        .map(|entry| entry.key)
        .filter(|key| filter.as_ref().is_none_or(|f| f.is_match(key)))
        .collect();
    Ok(Json(CacheListing { count: keys.len(), keys }).into_response())
}

fn stats_document(state: &AppState) -> StatsDocument {
    StatsDocument {
        service: "pixbox".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: format_uptime(state.started_at.elapsed()),
        executor: ExecutorStats::from(state.dispatcher.stats()),
        cache: state.cache.as_ref().map(|cache| CacheStats {
            size: cache.len(),
            hit_rate: cache.hit_rate(),
        }),
        throughput: ThroughputStats::from(state.metrics.snapshot()),
    }
}

/// Reads a POST body, capped at the configured image file size limit.
///
/// Decompression is handled transparently by RequestDecompressionLayer
/// middleware, so this function receives already-decompressed data.
async fn collect_body(
    state: &AppState,
    parts: &Parts,
    body: Body,
) -> Result<Option<Bytes>, ApiError> {
    if parts.method != Method::POST {
        return Ok(None);
    }

    let limit = state.config.resources.max_image_file_size;
    let limited = http_body_util::Limited::new(body, limit.as_u64() as usize);
    match limited.collect().await {
        Ok(collected) => Ok(Some(collected.to_bytes())),
        Err(err) if err.downcast_ref::<http_body_util::LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge(limit.to_human_readable()))
        }
        Err(_) => Err(ApiError::BadRequest("Could not read request body".to_string())),
    }
}

fn into_http(engine: EngineResponse) -> Response {
    let mut builder = axum::http::Response::builder().status(engine.status);
    for (name, value) in &engine.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(engine.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
