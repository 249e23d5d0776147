//! Request and response carriers
//!
//! An [`Exchange`] is the transport-independent view of one request: the
//! parsed path parameters, negotiated client hints, cookies and body. The
//! HTTP layer builds one per request and the dispatcher threads it through
//! strategy resolution, the cache and the worker pool.

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::hints::ClientHints;
use crate::params::RequestParams;

use super::error::{error_code, EngineError};

/// Query parameter forcing a download disposition on the response
pub const QUERY_DOWNLOAD: &str = "dl";

/// Query parameter disabling the response cache for one request
pub const QUERY_NO_CACHE: &str = "dnc";

/// Query parameter disabling format and quality negotiation
pub const QUERY_BYPASS: &str = "bypass";

#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    /// Mount point of the engine, without a trailing slash
    pub context_path: String,
    /// Decoded request path below the context
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub cookies: BTreeMap<String, String>,
    pub remote_addr: Option<IpAddr>,
    pub body: Option<Bytes>,
    pub params: RequestParams,
    pub hints: ClientHints,
}

impl Exchange {
    pub fn new(
        method: Method,
        context_path: impl Into<String>,
        path: impl Into<String>,
        query: BTreeMap<String, String>,
        headers: HeaderMap,
        remote_addr: Option<IpAddr>,
        body: Option<Bytes>,
    ) -> Self {
        let cookies = parse_cookies(&headers);
        Exchange {
            method,
            context_path: context_path.into(),
            path: path.into(),
            query,
            headers,
            cookies,
            remote_addr,
            body,
            params: RequestParams::default(),
            hints: ClientHints::default(),
        }
    }

    /// Parses path parameters and negotiates client hints. Runs before
    /// strategy resolution; a failure here interrupts the request without
    /// it ever reaching the pool.
    pub fn prepare(&mut self) -> Result<(), EngineError> {
        self.params = RequestParams::parse(&self.path)?;
        self.hints = ClientHints::negotiate(&self.headers, &self.cookies);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    pub fn download_name(&self) -> Option<&str> {
        self.query.get(QUERY_DOWNLOAD).map(String::as_str)
    }

    pub fn cache_disabled(&self) -> bool {
        self.query.contains_key(QUERY_NO_CACHE)
    }

    pub fn negotiation_bypassed(&self) -> bool {
        self.query.contains_key(QUERY_BYPASS)
    }

    /// Whether the client already holds the response described by `etag`
    /// and `last_modified`. `If-None-Match` wins over `If-Modified-Since`.
    pub fn revalidates(
        &self,
        etag: Option<&str>,
        last_modified: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(candidates) = self.header("if-none-match") {
            let Some(etag) = etag else { return false };
            return candidates == "*"
                || candidates
                    .split(',')
                    .map(|t| t.trim().trim_start_matches("W/"))
                    .any(|t| t == etag);
        }
        if let (Some(since), Some(modified)) = (self.header("if-modified-since"), last_modified) {
            if let Some(since) = parse_http_date(since) {
                return modified <= since;
            }
        }
        false
    }

    /// Base cache key: context path, canonical parameters and source, plus
    /// the download marker when present. Strategy-negotiated state is layered
    /// on top of this by the individual processors.
    pub fn base_cache_key(&self) -> String {
        let mut key = String::new();
        key.push_str(self.context_path.trim_end_matches('/'));
        key.push('/');
        if !self.params.is_empty() {
            key.push_str(&self.params.canonical());
            key.push('/');
        }
        key.push_str(self.params.source());
        if let Some(name) = self.download_name() {
            key.push_str("?dl=");
            key.push_str(name);
        }
        key
    }
}

fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in headers.get_all("cookie") {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.to_string(), value.to_string());
            }
        }
    }
    cookies
}

/// Finished response as the engine hands it back to the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResponse {
    pub status: StatusCode,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl EngineResponse {
    pub fn new(status: StatusCode) -> Self {
        EngineResponse {
            status,
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// JSON error envelope shared by every failure path
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({
            "code": error_code(status),
            "message": message,
        });
        let body = Bytes::from(body.to_string());
        EngineResponse {
            status,
            headers: BTreeMap::from([
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
                ("Date".to_string(), http_date(Utc::now())),
            ]),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Formats a timestamp as an RFC 7231 HTTP date
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date as senders commonly emit it
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(&s.replace("GMT", "+0000"))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    fn exchange_for(path: &str) -> Exchange {
        let mut ex = Exchange::new(
            Method::GET,
            "",
            path,
            BTreeMap::new(),
            HeaderMap::new(),
            None,
            None,
        );
        ex.prepare().unwrap();
        ex
    }

    #[test]
    fn test_base_cache_key_is_order_independent() {
        let a = exchange_for("/o=80/f=jpg/images/lenna.jpg");
        let b = exchange_for("/f=jpg/o=80/images/lenna.jpg");
        assert_eq!(a.base_cache_key(), b.base_cache_key());
        assert_eq!(a.base_cache_key(), "/f=jpg/o=80/images/lenna.jpg");
    }

    #[test]
    fn test_base_cache_key_without_params() {
        let ex = exchange_for("/images/lenna.jpg");
        assert_eq!(ex.base_cache_key(), "/images/lenna.jpg");
    }

    #[test]
    fn test_download_marker_reaches_the_key() {
        let mut ex = exchange_for("/images/lenna.jpg");
        ex.query.insert(QUERY_DOWNLOAD.to_string(), "lenna.jpg".to_string());
        assert_eq!(ex.base_cache_key(), "/images/lenna.jpg?dl=lenna.jpg");
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("__pixbox__=dpr=1.2,dw=1920; session=abc"),
        );
        let ex = Exchange::new(Method::GET, "", "/a.jpg", BTreeMap::new(), headers, None, None);
        assert_eq!(
            ex.cookies.get("__pixbox__").map(String::as_str),
            Some("dpr=1.2,dw=1920")
        );
        assert_eq!(ex.cookies.get("session").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_error_envelope() {
        let response = EngineResponse::error(StatusCode::BAD_REQUEST, "Duplicated parameter: o");
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["code"], "INVALID_PARAMETER");
        assert_eq!(body["message"], "Duplicated parameter: o");
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_http_date_round_trip() {
        let t = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let rendered = http_date(t);
        assert_eq!(rendered, "Sat, 14 Mar 2026 15:09:26 GMT");
        assert_eq!(parse_http_date(&rendered), Some(t));
    }
}
