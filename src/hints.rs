//! Client hint negotiation
//!
//! Devices describe themselves through three channels, consulted in this
//! order when a path parameter does not already pin the value:
//!
//! 1. Client hint headers `DPR`, `Width`, `Viewport-Width`
//! 2. The `__pixbox__` cookie written by the feature-detection script,
//!    e.g. `dpr=1.2,dw=1920,dh=925,webp=1,jp2=1`
//! 3. Nothing; the source image is served at its stored size
//!
//! Format capability flags (`webp`, `jp2`) additionally consider the
//! `Accept` header and the user agent. Malformed cookie fields are ignored
//! rather than failing the request.

use axum::http::HeaderMap;
use std::collections::BTreeMap;

/// Cookie the client-side detection script maintains
pub const HINT_COOKIE_NAME: &str = "__pixbox__";

/// Request headers that can change the negotiated response
pub const HINT_HEADERS: [&str; 3] = ["DPR", "Width", "Viewport-Width"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientHints {
    pub dpr: Option<f64>,
    pub width: Option<u32>,
    pub viewport_width: Option<u32>,
    pub accepts_webp: bool,
    pub accepts_jp2: bool,
    /// jp2 support was inferred from the user agent alone, so a response
    /// negotiated on it varies on `User-Agent` rather than `Accept`
    pub jp2_from_agent: bool,
    pub cookie_present: bool,
}

impl ClientHints {
    pub fn negotiate(headers: &HeaderMap, cookies: &BTreeMap<String, String>) -> Self {
        let cookie = cookies
            .get(HINT_COOKIE_NAME)
            .map(|raw| HintCookie::parse(raw))
            .unwrap_or_default();
        let cookie_present = cookies.contains_key(HINT_COOKIE_NAME);

        let accept = header_str(headers, "accept").unwrap_or_default();
        let user_agent = header_str(headers, "user-agent").unwrap_or_default();
        let jp2_declared = accept.contains("image/jp2") || cookie.jp2;

        ClientHints {
            dpr: header_f64(headers, "dpr").or(cookie.dpr),
            width: header_u32(headers, "width")
                .or_else(|| header_u32(headers, "viewport-width"))
                .or(cookie.device_width),
            viewport_width: header_u32(headers, "viewport-width"),
            accepts_webp: accept.contains("image/webp") || cookie.webp,
            accepts_jp2: jp2_declared || is_safari_agent(&user_agent),
            jp2_from_agent: !jp2_declared && is_safari_agent(&user_agent),
            cookie_present,
        }
    }

    /// Headers a cached response negotiated from hints must vary on
    pub fn vary(&self) -> Vec<&'static str> {
        let mut vary: Vec<&'static str> = HINT_HEADERS.to_vec();
        if self.cookie_present {
            vary.push("Cookie");
        }
        vary
    }
}

/// Parsed `__pixbox__` cookie payload
#[derive(Debug, Clone, Default)]
struct HintCookie {
    dpr: Option<f64>,
    device_width: Option<u32>,
    webp: bool,
    jp2: bool,
}

impl HintCookie {
    fn parse(raw: &str) -> Self {
        let mut cookie = HintCookie::default();
        for field in raw.split(',') {
            let Some((name, value)) = field.trim().split_once('=') else {
                continue;
            };
            match name {
                "dpr" => cookie.dpr = value.parse().ok().filter(|d| *d > 0.0),
                "dw" => cookie.device_width = value.parse().ok().filter(|w| *w > 0),
                "webp" => cookie.webp = value == "1",
                "jp2" => cookie.jp2 = value == "1",
                _ => {}
            }
        }
        cookie
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name)
        .and_then(|v| v.trim().parse().ok())
        .filter(|d| *d > 0.0)
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    header_str(headers, name)
        .and_then(|v| v.trim().parse().ok())
        .filter(|w| *w > 0)
}

/// Safari negotiates JPEG 2000; Chrome ships the same `Safari` UA token, so
/// it has to be excluded explicitly.
pub fn is_safari_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    ua.contains("safari") && !ua.contains("chrome") && !ua.contains("chromium") && !ua.contains("android")
}

pub fn is_mobile_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    ua.contains("mobile") || ua.contains("android") || ua.contains("iphone")
}

/// Renders a device pixel ratio without a trailing `.0`
pub fn format_dpr(dpr: f64) -> String {
    if dpr.fract() == 0.0 {
        format!("{}", dpr as u32)
    } else {
        format!("{}", dpr)
    }
}
