//! Path-embedded transformation parameters
//!
//! Request paths carry ordered `name=value` segments ahead of the source
//! image path:
//!
//! ```text
//! /f=jpg/s=w320,h200,u/c=x5,y5,w100,h50/o=80/images/lenna.jpg
//! /s=w640/https://cdn.example.com/lenna.jpg
//! ```
//!
//! A segment is a parameter when it starts with a letter and contains exactly
//! one `=`; everything else (or an embedded absolute URL) is the source path.
//! Parameter names are case-insensitive, the source path keeps its case.
//! Repeating a name with a new value extends it (`s=w320/s=h200` equals
//! `s=w320,h200`); repeating an identical value is an error.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("Duplicated parameter: {0}")]
    Duplicated(String),

    #[error("Unknown parameter: {0}")]
    Unknown(String),

    #[error("Invalid path encoding: {0}")]
    Encoding(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Invalid quality: {0}")]
    Quality(String),

    #[error("Invalid scale: {0}")]
    Scale(String),

    #[error("Invalid crop: {0}")]
    Crop(String),

    #[error("Invalid padding: {0}")]
    Padding(String),

    #[error("Invalid border: {0}")]
    Border(String),
}

static PARAM_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][^=/]*=[^=/]*$").unwrap());

static FORMAT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[a-z]{2}[0-9]|[a-z]{3,}|[a-z0-9]{4,})$").unwrap());

static SCALE_DPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^dpr[0-9](?:[.d][0-9]{1,2})?$").unwrap());

/// Resampling mode selector (`s=m0`..`s=m5` or letter aliases)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    #[default]
    Automatic,
    BestFitBoth,
    FitExact,
    FitToWidth,
    FitToHeight,
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatOption {
    Progressive,
    Baseline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub name: String,
    pub option: Option<FormatOption>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub width_percent: Option<u32>,
    pub height_percent: Option<u32>,
    pub dpr: Option<f64>,
    pub upscale: bool,
    pub quality_hint: Option<u8>,
    pub mode: ScaleMode,
}

impl ScaleRequest {
    /// True when the request changes output dimensions (a DPR of exactly 1.0
    /// does not count).
    pub fn resizes(&self) -> bool {
        self.width.is_some()
            || self.height.is_some()
            || self.width_percent.is_some()
            || self.height_percent.is_some()
            || self.dpr.map(|d| d != 1.0).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropRequest {
    pub aspect: Option<(u32, u32)>,
    pub square: bool,
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub top: Option<u32>,
    pub left: Option<u32>,
    pub bottom: Option<u32>,
    pub right: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// Parses 3, 4, 6 or 8 digit lowercase hex; short forms double each digit.
    pub fn parse_hex(s: &str) -> Option<Self> {
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let expanded: String = match s.len() {
            3 | 4 => s.chars().flat_map(|c| [c, c]).collect(),
            6 | 8 => s.to_string(),
            _ => return None,
        };
        let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
        Some(Rgba {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if expanded.len() == 8 { channel(6)? } else { 0xff },
        })
    }

    pub fn to_css(&self) -> String {
        if self.a == 0xff {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Padding (`p=`) and border (`b=`) request: edge size plus fill color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inset {
    pub size: u32,
    pub color: Rgba,
}

/// Parsed view of one request path
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    raw: BTreeMap<String, String>,
    source: String,
    pub format: Option<FormatRequest>,
    pub quality: Option<u8>,
    pub scale: ScaleRequest,
    pub crop: Option<CropRequest>,
    pub padding: Option<Inset>,
    pub border: Option<Inset>,
}

impl RequestParams {
    pub fn parse(path: &str) -> Result<Self, ParamError> {
        let decoded = percent_decode(path)?;

        // An embedded absolute URL ends parameter territory; everything from
        // its scheme onwards is the source, slashes and all.
        let (param_part, url_source) = match decoded.find("://") {
            Some(idx) => {
                let start = decoded[..idx].rfind('/').map(|i| i + 1).unwrap_or(0);
                (decoded[..start].to_string(), Some(decoded[start..].to_string()))
            }
            None => (decoded, None),
        };

        let mut raw: BTreeMap<String, String> = BTreeMap::new();
        let mut source_parts: Vec<&str> = Vec::new();

        for segment in param_part.split('/').filter(|s| !s.is_empty()) {
            let lowered = segment.to_lowercase();
            if PARAM_SEGMENT.is_match(&lowered) {
                let (name, value) = lowered
                    .split_once('=')
                    .ok_or_else(|| ParamError::Encoding(segment.to_string()))?;
                match raw.get_mut(name) {
                    None => {
                        raw.insert(name.to_string(), value.to_string());
                    }
                    Some(existing) if existing.split(',').any(|v| v == value) => {
                        return Err(ParamError::Duplicated(name.to_string()));
                    }
                    Some(existing) => {
                        existing.push(',');
                        existing.push_str(value);
                    }
                }
            } else {
                source_parts.push(segment);
            }
        }

        let source = match url_source {
            Some(url) => url,
            None => source_parts.join("/"),
        };

        let mut params = RequestParams {
            raw,
            source,
            ..Default::default()
        };
        for (name, value) in params.raw.clone() {
            match name.as_str() {
                "f" => params.format = Some(parse_format(&value)?),
                "o" => params.quality = Some(parse_quality(&value)?),
                "s" => params.scale = parse_scale(&value)?,
                "c" => params.crop = Some(parse_crop(&value)?),
                "p" => params.padding = Some(parse_inset(&value).map_err(ParamError::Padding)?),
                "b" => params.border = Some(parse_inset(&value).map_err(ParamError::Border)?),
                other => return Err(ParamError::Unknown(other.to_string())),
            }
        }
        Ok(params)
    }

    /// Source path relative to the resource root, or an absolute URL
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_remote_source(&self) -> bool {
        self.source.contains("://")
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// True when any parameter changes the output bytes; such requests cannot
    /// be served as a plain passthrough of the source.
    pub fn has_transform(&self) -> bool {
        self.format.is_some()
            || self.quality.is_some()
            || self.scale.resizes()
            || self.crop.is_some()
            || self.padding.is_some()
            || self.border.is_some()
    }

    /// Canonical `name=value` rendition in name order, for cache keys
    pub fn canonical(&self) -> String {
        self.raw
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.raw.get(name).map(String::as_str)
    }
}

pub(crate) fn percent_decode(path: &str) -> Result<String, ParamError> {
    if !path.contains('%') {
        return Ok(path.to_string());
    }
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| ParamError::Encoding(path.to_string()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ParamError::Encoding(path.to_string()))
}

fn parse_format(value: &str) -> Result<FormatRequest, ParamError> {
    let mut tokens = value.split(',');
    let name = tokens
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParamError::Format(value.to_string()))?;
    if !FORMAT_NAME.is_match(name) {
        return Err(ParamError::Format(name.to_string()));
    }

    // pjpg/bjpg are shorthands for jpg with an explicit option
    let (name, mut option) = match name {
        "pjpg" => ("jpg", Some(FormatOption::Progressive)),
        "bjpg" => ("jpg", Some(FormatOption::Baseline)),
        other => (other, None),
    };

    for token in tokens {
        let parsed = match token {
            "p" => FormatOption::Progressive,
            "b" => FormatOption::Baseline,
            other => return Err(ParamError::Format(other.to_string())),
        };
        if option.is_some() {
            return Err(ParamError::Format(value.to_string()));
        }
        option = Some(parsed);
    }

    Ok(FormatRequest {
        name: name.to_string(),
        option,
    })
}

fn parse_quality(value: &str) -> Result<u8, ParamError> {
    let err = || ParamError::Quality(format!("{} must be between 0 and 100", value));
    if value.is_empty() || value.len() > 3 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(err());
    }
    let quality: u16 = value.parse().map_err(|_| err())?;
    if quality > 100 {
        return Err(err());
    }
    Ok(quality as u8)
}

fn parse_scale(value: &str) -> Result<ScaleRequest, ParamError> {
    let mut scale = ScaleRequest::default();
    for token in value.split(',') {
        match token {
            "u" => scale.upscale = true,
            t if SCALE_DPR.is_match(t) => {
                let ratio: f64 = t[3..]
                    .replace('d', ".")
                    .parse()
                    .map_err(|_| ParamError::Scale(t.to_string()))?;
                if ratio <= 0.0 {
                    return Err(ParamError::Scale(format!("{} must be greater than 0", t)));
                }
                scale.dpr = Some(ratio);
            }
            t if t.len() == 2 && t.starts_with('q') => {
                let hint = t[1..]
                    .parse::<u8>()
                    .ok()
                    .filter(|h| *h <= 4)
                    .ok_or_else(|| ParamError::Scale(t.to_string()))?;
                scale.quality_hint = Some(hint);
            }
            t if t.len() == 2 && t.starts_with('m') => {
                scale.mode = parse_scale_mode(&t[1..]).ok_or_else(|| ParamError::Scale(t.to_string()))?;
            }
            t if t.starts_with('w') || t.starts_with('h') => {
                let percent = t.ends_with('p');
                let digits = &t[1..t.len() - usize::from(percent)];
                let max_len = if percent { 3 } else { 5 };
                if digits.is_empty()
                    || digits.len() > max_len
                    || !digits.chars().all(|c| c.is_ascii_digit())
                {
                    return Err(ParamError::Scale(t.to_string()));
                }
                let pixels: u32 = digits.parse().map_err(|_| ParamError::Scale(t.to_string()))?;
                if pixels < 1 {
                    return Err(ParamError::Scale(format!("{} must be at least 1", t)));
                }
                match (t.starts_with('w'), percent) {
                    (true, false) => scale.width = Some(pixels),
                    (false, false) => scale.height = Some(pixels),
                    (true, true) => scale.width_percent = Some(pixels),
                    (false, true) => scale.height_percent = Some(pixels),
                }
            }
            other => return Err(ParamError::Scale(other.to_string())),
        }
    }
    Ok(scale)
}

fn parse_scale_mode(token: &str) -> Option<ScaleMode> {
    match token {
        "0" | "a" => Some(ScaleMode::Automatic),
        "1" | "b" => Some(ScaleMode::BestFitBoth),
        "2" | "e" => Some(ScaleMode::FitExact),
        "3" | "w" => Some(ScaleMode::FitToWidth),
        "4" | "h" => Some(ScaleMode::FitToHeight),
        "5" | "c" => Some(ScaleMode::Crop),
        _ => None,
    }
}

fn parse_crop(value: &str) -> Result<CropRequest, ParamError> {
    let mut crop = CropRequest::default();
    let mut bare: Vec<u32> = Vec::new();
    let tokens: Vec<&str> = value.split(',').collect();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token == "sq" {
            crop.square = true;
        } else if let Some(rest) = token.strip_prefix("ar") {
            crop.aspect = Some(parse_aspect(rest, tokens.get(i + 1).copied(), &mut i)?);
        } else if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
            bare.push(token.parse().map_err(|_| ParamError::Crop(token.to_string()))?);
        } else {
            // split_at would panic on an empty or non-ASCII token
            let (field, digits) = token
                .split_at_checked(1)
                .ok_or_else(|| ParamError::Crop(token.to_string()))?;
            let pixels: u32 = digits
                .parse()
                .map_err(|_| ParamError::Crop(token.to_string()))?;
            let slot = match field {
                "x" => &mut crop.x,
                "y" => &mut crop.y,
                "w" => &mut crop.width,
                "h" => &mut crop.height,
                "t" => &mut crop.top,
                "l" => &mut crop.left,
                "b" => &mut crop.bottom,
                "r" => &mut crop.right,
                _ => return Err(ParamError::Crop(token.to_string())),
            };
            if slot.is_some() {
                return Err(ParamError::Crop(token.to_string()));
            }
            *slot = Some(pixels);
        }
        i += 1;
    }

    match bare.len() {
        0 => {}
        2 => {
            crop.x = Some(bare[0]);
            crop.y = Some(bare[1]);
        }
        4 => {
            crop.x = Some(bare[0]);
            crop.y = Some(bare[1]);
            crop.width = Some(bare[2]);
            crop.height = Some(bare[3]);
        }
        _ => return Err(ParamError::Crop(value.to_string())),
    }

    let edged = crop.top.is_some() || crop.left.is_some() || crop.bottom.is_some() || crop.right.is_some();
    let boxed = crop.x.is_some() || crop.y.is_some() || crop.width.is_some() || crop.height.is_some();
    if edged && boxed {
        return Err(ParamError::Crop(value.to_string()));
    }
    Ok(crop)
}

fn parse_aspect(rest: &str, next: Option<&str>, index: &mut usize) -> Result<(u32, u32), ParamError> {
    if let Some((w, h)) = rest.split_once('x') {
        let width = w.parse().map_err(|_| ParamError::Crop(rest.to_string()))?;
        let height = h.parse().map_err(|_| ParamError::Crop(rest.to_string()))?;
        return Ok((width, height));
    }
    // "ar16,9" arrives as two comma tokens
    let width = rest.parse().map_err(|_| ParamError::Crop(rest.to_string()))?;
    let height = next
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| ParamError::Crop(rest.to_string()))?;
    *index += 1;
    Ok((width, height))
}

fn parse_inset(value: &str) -> Result<Inset, String> {
    let (size, color) = value.split_once(',').ok_or_else(|| value.to_string())?;
    let size: u32 = size
        .parse()
        .ok()
        .filter(|s| (1..=99).contains(s))
        .ok_or_else(|| format!("{} must be between 1 and 99", value))?;
    let color = Rgba::parse_hex(color).ok_or_else(|| format!("bad color: {}", color))?;
    Ok(Inset { size, color })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_has_no_params() {
        let params = RequestParams::parse("/images/lenna.jpg").unwrap();
        assert!(params.is_empty());
        assert!(!params.has_transform());
        assert_eq!(params.source(), "images/lenna.jpg");
    }

    #[test]
    fn test_full_pipeline_path() {
        let params =
            RequestParams::parse("/f=jpg/s=w320,h200,u/c=x5,y5,w100,h50/o=80/images/lenna.jpg")
                .unwrap();
        assert_eq!(params.format.as_ref().unwrap().name, "jpg");
        assert_eq!(params.quality, Some(80));
        assert_eq!(params.scale.width, Some(320));
        assert_eq!(params.scale.height, Some(200));
        assert!(params.scale.upscale);
        let crop = params.crop.as_ref().unwrap();
        assert_eq!(crop.x, Some(5));
        assert_eq!(crop.width, Some(100));
        assert_eq!(params.source(), "images/lenna.jpg");
    }

    #[test]
    fn test_source_keeps_case_params_do_not() {
        let params = RequestParams::parse("/F=JPG/Images/Lenna.JPG").unwrap();
        assert_eq!(params.format.as_ref().unwrap().name, "jpg");
        assert_eq!(params.source(), "Images/Lenna.JPG");
    }

    #[test]
    fn test_duplicate_identical_value_rejected() {
        let err = RequestParams::parse("/o=80/o=80/a.jpg").unwrap_err();
        assert_eq!(err, ParamError::Duplicated("o".to_string()));
    }

    #[test]
    fn test_repeated_name_extends_value() {
        let params = RequestParams::parse("/s=w320/s=h200/a.jpg").unwrap();
        assert_eq!(params.scale.width, Some(320));
        assert_eq!(params.scale.height, Some(200));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let err = RequestParams::parse("/zoom=2/a.jpg").unwrap_err();
        assert_eq!(err, ParamError::Unknown("zoom".to_string()));
    }

    #[test]
    fn test_progressive_shorthand() {
        let params = RequestParams::parse("/f=pjpg/a.png").unwrap();
        let format = params.format.unwrap();
        assert_eq!(format.name, "jpg");
        assert_eq!(format.option, Some(FormatOption::Progressive));

        let explicit = RequestParams::parse("/f=jpg,b/a.png").unwrap();
        assert_eq!(explicit.format.unwrap().option, Some(FormatOption::Baseline));
    }

    #[test]
    fn test_quality_bounds() {
        assert_eq!(RequestParams::parse("/o=0/a.jpg").unwrap().quality, Some(0));
        assert_eq!(RequestParams::parse("/o=100/a.jpg").unwrap().quality, Some(100));
        assert!(matches!(
            RequestParams::parse("/o=101/a.jpg").unwrap_err(),
            ParamError::Quality(_)
        ));
        assert!(matches!(
            RequestParams::parse("/o=high/a.jpg").unwrap_err(),
            ParamError::Quality(_)
        ));
    }

    #[test]
    fn test_scale_dpr_forms() {
        let dotted = RequestParams::parse("/s=dpr1.5/a.jpg").unwrap();
        assert_eq!(dotted.scale.dpr, Some(1.5));

        // 'd' stands in for the dot where clients cannot emit one
        let lettered = RequestParams::parse("/s=dpr1d5/a.jpg").unwrap();
        assert_eq!(lettered.scale.dpr, Some(1.5));

        assert!(matches!(
            RequestParams::parse("/s=dpr0/a.jpg").unwrap_err(),
            ParamError::Scale(_)
        ));
    }

    #[test]
    fn test_scale_percent_and_mode() {
        let params = RequestParams::parse("/s=w50p,m2,q3/a.jpg").unwrap();
        assert_eq!(params.scale.width_percent, Some(50));
        assert_eq!(params.scale.mode, ScaleMode::FitExact);
        assert_eq!(params.scale.quality_hint, Some(3));

        let alias = RequestParams::parse("/s=mw/a.jpg").unwrap();
        assert_eq!(alias.scale.mode, ScaleMode::FitToWidth);
    }

    #[test]
    fn test_dpr_of_one_is_not_a_transform() {
        let params = RequestParams::parse("/s=dpr1.0/a.jpg").unwrap();
        assert!(!params.has_transform());
        let scaled = RequestParams::parse("/s=dpr2.0/a.jpg").unwrap();
        assert!(scaled.has_transform());
    }

    #[test]
    fn test_crop_families() {
        let aspect = RequestParams::parse("/c=ar16x9/a.jpg").unwrap();
        assert_eq!(aspect.crop.unwrap().aspect, Some((16, 9)));

        let comma_aspect = RequestParams::parse("/c=ar16,9/a.jpg").unwrap();
        assert_eq!(comma_aspect.crop.unwrap().aspect, Some((16, 9)));

        let square = RequestParams::parse("/c=sq/a.jpg").unwrap();
        assert!(square.crop.unwrap().square);

        let bare_pair = RequestParams::parse("/c=5,10/a.jpg").unwrap();
        let crop = bare_pair.crop.unwrap();
        assert_eq!((crop.x, crop.y), (Some(5), Some(10)));

        let edges = RequestParams::parse("/c=t2,l4/a.jpg").unwrap();
        let crop = edges.crop.unwrap();
        assert_eq!((crop.top, crop.left), (Some(2), Some(4)));

        assert!(matches!(
            RequestParams::parse("/c=x5,t2/a.jpg").unwrap_err(),
            ParamError::Crop(_)
        ));
        assert!(matches!(
            RequestParams::parse("/c=1,2,3/a.jpg").unwrap_err(),
            ParamError::Crop(_)
        ));
        assert!(matches!(
            RequestParams::parse("/c=/a.jpg").unwrap_err(),
            ParamError::Crop(_)
        ));
    }

    #[test]
    fn test_padding_and_border() {
        let params = RequestParams::parse("/p=5,fff/b=2,00ff0080/a.jpg").unwrap();
        let padding = params.padding.unwrap();
        assert_eq!(padding.size, 5);
        assert_eq!(padding.color, Rgba { r: 255, g: 255, b: 255, a: 255 });
        let border = params.border.unwrap();
        assert_eq!(border.color.a, 0x80);

        assert!(matches!(
            RequestParams::parse("/p=0,fff/a.jpg").unwrap_err(),
            ParamError::Padding(_)
        ));
        assert!(matches!(
            RequestParams::parse("/b=5,zzz/a.jpg").unwrap_err(),
            ParamError::Border(_)
        ));
    }

    #[test]
    fn test_embedded_url_source() {
        let params = RequestParams::parse("/s=w640/https://cdn.example.com/img/lenna.jpg").unwrap();
        assert_eq!(params.scale.width, Some(640));
        assert!(params.is_remote_source());
        assert_eq!(params.source(), "https://cdn.example.com/img/lenna.jpg");
    }

    #[test]
    fn test_percent_encoded_url_source() {
        let params =
            RequestParams::parse("/o=50/https%3A%2F%2Fcdn.example.com%2Flenna.jpg").unwrap();
        assert!(params.is_remote_source());
        assert_eq!(params.source(), "https://cdn.example.com/lenna.jpg");
    }

    #[test]
    fn test_bad_percent_encoding() {
        assert!(matches!(
            RequestParams::parse("/images/len%GGna.jpg").unwrap_err(),
            ParamError::Encoding(_)
        ));
    }

    #[test]
    fn test_canonical_is_name_ordered() {
        let a = RequestParams::parse("/o=80/f=jpg/a.jpg").unwrap();
        let b = RequestParams::parse("/f=jpg/o=80/a.jpg").unwrap();
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "f=jpg/o=80");
    }
}
