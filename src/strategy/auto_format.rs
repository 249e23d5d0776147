//! Format negotiation for capable clients

use crate::engine::image::ImageProcessor;
use crate::engine::{Exchange, RequestProcessor};

use super::Strategy;

/// Claims requests from clients that advertise a better output format than
/// the one addressed, unless the path already pins one.
pub struct AutoFormatStrategy;

impl Strategy for AutoFormatStrategy {
    fn name(&self) -> &'static str {
        "auto-format"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        exchange.params.format.is_none()
            && (exchange.hints.accepts_webp || exchange.hints.accepts_jp2)
    }

    fn create(&self) -> Box<dyn RequestProcessor> {
        Box::new(ImageProcessor::with_auto_format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Method};
    use std::collections::BTreeMap;

    fn exchange(path: &str, accept: Option<&str>, user_agent: &str) -> Exchange {
        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert("accept", HeaderValue::from_str(accept).unwrap());
        }
        headers.insert("user-agent", HeaderValue::from_str(user_agent).unwrap());
        let mut ex = Exchange::new(Method::GET, "", path, BTreeMap::new(), headers, None, None);
        ex.prepare().unwrap();
        ex
    }

    #[test]
    fn test_matches_webp_capable_clients() {
        let strategy = AutoFormatStrategy;
        assert!(strategy.matches(&exchange(
            "/images/a.jpg",
            Some("image/webp,*/*"),
            "Firefox/140.0"
        )));
        assert!(!strategy.matches(&exchange("/images/a.jpg", Some("*/*"), "curl/8.0")));
    }

    #[test]
    fn test_matches_safari_for_jp2() {
        let strategy = AutoFormatStrategy;
        let safari = "Mozilla/5.0 (Macintosh) AppleWebKit/605.1.15 Version/17.0 Safari/605.1.15";
        assert!(strategy.matches(&exchange("/images/a.jpg", None, safari)));
    }

    #[test]
    fn test_explicit_format_opts_out() {
        let strategy = AutoFormatStrategy;
        assert!(!strategy.matches(&exchange(
            "/f=png/images/a.jpg",
            Some("image/webp"),
            "Firefox/140.0"
        )));
    }
}
