//! Shared request helpers
//!
//! Pure, stateless functions used by the handlers. Split out of
//! services.rs so they stay unit-testable on their own.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::params::percent_decode;

/// Splits a raw query string into decoded name/value pairs.
///
/// Names without a `=` map to the empty string, `+` stands for a space, and
/// pairs that fail percent-decoding are dropped rather than failing the
/// whole request.
pub(crate) fn parse_query(raw: Option<&str>) -> BTreeMap<String, String> {
    let mut query = BTreeMap::new();
    let Some(raw) = raw else {
        return query;
    };
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = percent_decode(&name.replace('+', " "));
        let value = percent_decode(&value.replace('+', " "));
        if let (Ok(name), Ok(value)) = (name, value) {
            query.insert(name, value);
        }
    }
    query
}

/// `02h 41m 05s` style uptime rendering for the stats document. Hours do
/// not wrap at 24.
pub(crate) fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    format!(
        "{:02}h {:02}m {:02}s",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_decodes_pairs() {
        let query = parse_query(Some("dl=my%20image.png&q=errors"));
        assert_eq!(query.get("dl").map(String::as_str), Some("my image.png"));
        assert_eq!(query.get("q").map(String::as_str), Some("errors"));
    }

    #[test]
    fn test_parse_query_plus_and_bare_names() {
        let query = parse_query(Some("a+b=1+2&flag"));
        assert_eq!(query.get("a b").map(String::as_str), Some("1 2"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_query_drops_undecodable_pairs() {
        let query = parse_query(Some("bad=%zz&good=1"));
        assert!(!query.contains_key("bad"));
        assert_eq!(query.get("good").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some("")).is_empty());
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "00h 00m 00s");
        assert_eq!(format_uptime(Duration::from_secs(3661)), "01h 01m 01s");
        assert_eq!(format_uptime(Duration::from_secs(90_000)), "25h 00m 00s");
    }
}
