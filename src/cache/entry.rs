//! Cached response records

use axum::http::StatusCode;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::engine::{http_date, parse_http_date, EngineResponse};

/// Headers that never replay from the cache. Content-Length is recomputed,
/// the rest are hop-by-hop or session state.
const REPLAY_EXCLUDED: [&str; 5] = ["pragma", "content-length", "connection", "set-cookie", "cookie"];

/// One cached response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content: Bytes,
    pub content_type: String,
    /// Unix seconds, whole-second resolution throughout
    pub created_at: i64,
    pub expires: i64,
    pub hit_count: u64,
    pub user_properties: BTreeMap<String, String>,
}

impl CacheEntry {
    /// Builds an entry from a finished response, or `None` when the
    /// response is not storeable: non-200, explicitly uncacheable, or
    /// without any derivable freshness lifetime.
    pub fn from_response(
        key: String,
        response: &EngineResponse,
        producer: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        if response.status != StatusCode::OK {
            return None;
        }
        let now_secs = now.timestamp();
        let expires = expiry_from_headers(&response.headers, now_secs)?;
        if expires <= now_secs {
            return None;
        }
        let content_type = response
            .header("content-type")
            .unwrap_or("application/octet-stream")
            .to_string();
        Some(CacheEntry {
            key,
            status: response.status.as_u16(),
            headers: response.headers.clone(),
            content: response.body.clone(),
            content_type,
            created_at: now_secs,
            expires,
            hit_count: 0,
            user_properties: BTreeMap::from([("producer".to_string(), producer.to_string())]),
        })
    }

    /// Expired entries miss; an entry is already stale at its expiry instant.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.header("last-modified").and_then(parse_http_date)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replays the stored response with a fresh Date and the freshness
    /// lifetime rewritten to what is left of it
    pub fn to_response(&self, now: DateTime<Utc>) -> EngineResponse {
        let mut headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .filter(|(name, _)| !REPLAY_EXCLUDED.iter().any(|ex| name.eq_ignore_ascii_case(ex)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.insert("Date".to_string(), http_date(now));
        if self.header("cache-control").is_some() {
            let remaining = (self.expires - now.timestamp()).max(0);
            headers.insert(
                "Cache-Control".to_string(),
                format!("public, max-age={}", remaining),
            );
        }
        headers.insert("Content-Length".to_string(), self.content.len().to_string());

        EngineResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.content.clone(),
        }
    }
}

fn expiry_from_headers(headers: &BTreeMap<String, String>, now: i64) -> Option<i64> {
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };

    if let Some(cache_control) = header("cache-control") {
        let cache_control = cache_control.to_lowercase();
        if ["no-store", "no-cache", "private"]
            .iter()
            .any(|directive| cache_control.contains(directive))
        {
            return None;
        }
        if let Some(secs) = parse_max_age(&cache_control) {
            return Some(now + secs as i64);
        }
    }
    if let Some(expires) = header("expires") {
        return parse_http_date(expires).map(|t| t.timestamp());
    }
    None
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    let rest = &cache_control[cache_control.find("max-age=")? + "max-age=".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn response(status: StatusCode, headers: &[(&str, &str)], body: &'static [u8]) -> EngineResponse {
        EngineResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from_static(body),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_entry_from_max_age_response() {
        let response = response(
            StatusCode::OK,
            &[("Content-Type", "image/png"), ("Cache-Control", "public, max-age=3600")],
            b"png",
        );
        let entry = CacheEntry::from_response("/a.png".into(), &response, "image", at(1000)).unwrap();
        assert_eq!(entry.created_at, 1000);
        assert_eq!(entry.expires, 4600);
        assert_eq!(entry.content_type, "image/png");
        assert_eq!(entry.user_properties.get("producer").map(String::as_str), Some("image"));
    }

    #[test]
    fn test_entry_from_expires_header() {
        let response = response(
            StatusCode::OK,
            &[("Expires", "Sat, 14 Mar 2026 15:09:26 GMT")],
            b"png",
        );
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 14, 0, 0).unwrap();
        let entry = CacheEntry::from_response("/a.png".into(), &response, "image", now).unwrap();
        assert_eq!(
            entry.expires,
            Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap().timestamp()
        );
    }

    #[test]
    fn test_uncacheable_responses_produce_no_entry() {
        let no_store = response(StatusCode::OK, &[("Cache-Control", "no-store")], b"x");
        assert!(CacheEntry::from_response("/a".into(), &no_store, "image", at(0)).is_none());

        let not_ok = response(StatusCode::NOT_FOUND, &[("Cache-Control", "max-age=60")], b"x");
        assert!(CacheEntry::from_response("/a".into(), &not_ok, "image", at(0)).is_none());

        let no_lifetime = response(StatusCode::OK, &[("Content-Type", "image/png")], b"x");
        assert!(CacheEntry::from_response("/a".into(), &no_lifetime, "image", at(0)).is_none());

        let already_stale = response(StatusCode::OK, &[("Cache-Control", "max-age=0")], b"x");
        assert!(CacheEntry::from_response("/a".into(), &already_stale, "image", at(0)).is_none());
    }

    #[test]
    fn test_expiry_is_whole_second_exclusive() {
        let response = response(StatusCode::OK, &[("Cache-Control", "max-age=10")], b"x");
        let entry = CacheEntry::from_response("/a".into(), &response, "image", at(100)).unwrap();
        assert!(!entry.is_expired(109));
        assert!(entry.is_expired(110));
        assert!(entry.is_expired(111));
    }

    #[test]
    fn test_replay_refreshes_and_filters_headers() {
        let response = response(
            StatusCode::OK,
            &[
                ("Content-Type", "image/png"),
                ("Cache-Control", "public, max-age=100"),
                ("Pragma", "no-cache"),
                ("Connection", "keep-alive"),
                ("Set-Cookie", "session=abc"),
                ("ETag", "\"cafe\""),
            ],
            b"png-bytes",
        );
        let entry = CacheEntry::from_response("/a.png".into(), &response, "image", at(1000)).unwrap();

        let replayed = entry.to_response(at(1040));
        assert_eq!(replayed.header("cache-control"), Some("public, max-age=60"));
        assert_eq!(replayed.header("content-length"), Some("9"));
        assert_eq!(replayed.header("etag"), Some("\"cafe\""));
        assert!(replayed.header("pragma").is_none());
        assert!(replayed.header("connection").is_none());
        assert!(replayed.header("set-cookie").is_none());
        assert_eq!(replayed.header("date"), Some(http_date(at(1040)).as_str()));
    }
}
