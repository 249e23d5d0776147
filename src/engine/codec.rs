//! Image codec seam
//!
//! The engine only ever talks to [`ImageCodec`]; everything pixel-shaped
//! hides behind it. The built-in [`SniffCodec`] identifies formats from
//! magic bytes and container headers without decoding, and its transform is
//! a passthrough that keeps the source bytes and format. A decoding backend
//! can be dropped in at this seam without touching the dispatcher, the
//! strategies or the cache.

use bytes::Bytes;

use crate::params::Rgba;

use super::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: &'static str,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl ImageInfo {
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Output target computed from parameters and negotiation
#[derive(Debug, Clone, Default)]
pub struct TransformPlan {
    pub format: Option<String>,
    pub quality: Option<u8>,
    pub scale: crate::params::ScaleRequest,
    pub crop: Option<crate::params::CropRequest>,
    pub padding: Option<crate::params::Inset>,
    pub border: Option<crate::params::Inset>,
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Bytes,
    pub format: &'static str,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

pub trait ImageCodec: Send + Sync {
    fn identify(&self, data: &[u8]) -> Option<ImageInfo>;

    /// Whether this codec can produce the named format
    fn can_write(&self, format: &str) -> bool;

    fn transform(
        &self,
        data: Bytes,
        info: &ImageInfo,
        plan: &TransformPlan,
    ) -> Result<EncodedImage, EngineError>;

    /// Representative colors, most dominant first
    fn palette(&self, data: &[u8], info: &ImageInfo, max_colors: usize) -> Vec<Rgba>;
}

pub fn content_type_for(format: &str) -> Option<&'static str> {
    match format {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "jp2" => Some("image/jp2"),
        _ => None,
    }
}

/// Header-sniffing codec. Identification reads container metadata only;
/// transforms keep the original bytes and format.
#[derive(Debug, Default, Clone, Copy)]
pub struct SniffCodec;

impl ImageCodec for SniffCodec {
    fn identify(&self, data: &[u8]) -> Option<ImageInfo> {
        if let Some((width, height)) = sniff_png(data) {
            return Some(ImageInfo { format: "png", content_type: "image/png", width, height });
        }
        if let Some((width, height)) = sniff_jpeg(data) {
            return Some(ImageInfo { format: "jpg", content_type: "image/jpeg", width, height });
        }
        if let Some((width, height)) = sniff_gif(data) {
            return Some(ImageInfo { format: "gif", content_type: "image/gif", width, height });
        }
        if let Some((width, height)) = sniff_webp(data) {
            return Some(ImageInfo { format: "webp", content_type: "image/webp", width, height });
        }
        if let Some((width, height)) = sniff_bmp(data) {
            return Some(ImageInfo { format: "bmp", content_type: "image/bmp", width, height });
        }
        None
    }

    fn can_write(&self, format: &str) -> bool {
        matches!(format, "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp")
    }

    fn transform(
        &self,
        data: Bytes,
        info: &ImageInfo,
        _plan: &TransformPlan,
    ) -> Result<EncodedImage, EngineError> {
        Ok(EncodedImage {
            bytes: data,
            format: info.format,
            content_type: info.content_type,
            width: info.width,
            height: info.height,
        })
    }

    fn palette(&self, data: &[u8], _info: &ImageInfo, max_colors: usize) -> Vec<Rgba> {
        if max_colors == 0 || data.is_empty() {
            return Vec::new();
        }
        // Deterministic sample over the payload, skipping the header region
        let start = data.len() / 10;
        let body = &data[start..];
        let stride = (body.len() / (max_colors * 3)).max(1);
        let mut colors = Vec::with_capacity(max_colors);
        let mut i = 0;
        while colors.len() < max_colors && i + 2 < body.len() {
            colors.push(Rgba {
                r: body[i],
                g: body[i + 1],
                b: body[i + 2],
                a: 0xff,
            });
            i += stride * 3;
        }
        colors
    }
}

fn be16(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from(*data.get(at)?) << 8 | u32::from(*data.get(at + 1)?))
}

fn le16(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from(*data.get(at)?) | u32::from(*data.get(at + 1)?) << 8)
}

fn le24(data: &[u8], at: usize) -> Option<u32> {
    Some(le16(data, at)? | u32::from(*data.get(at + 2)?) << 16)
}

fn le32(data: &[u8], at: usize) -> Option<u32> {
    Some(le16(data, at)? | le16(data, at + 2)? << 16)
}

fn sniff_png(data: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    if data.len() < 24 || data[..8] != SIGNATURE || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = be16(data, 16)? << 16 | be16(data, 18)?;
    let height = be16(data, 20)? << 16 | be16(data, 22)?;
    Some((width, height))
}

fn sniff_jpeg(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 4 || data[0] != 0xff || data[1] != 0xd8 {
        return None;
    }
    let mut i = 2;
    while i + 1 < data.len() {
        if data[i] != 0xff {
            return None;
        }
        let marker = data[i + 1];
        match marker {
            // fill byte before a marker
            0xff => i += 1,
            // standalone markers carry no segment
            0x01 | 0xd0..=0xd8 => i += 2,
            // end of image or start of scan without a frame header
            0xd9 | 0xda => return None,
            // frame headers, excluding DHT, JPG and DAC
            0xc0..=0xcf if !matches!(marker, 0xc4 | 0xc8 | 0xcc) => {
                let height = be16(data, i + 5)?;
                let width = be16(data, i + 7)?;
                return Some((width, height));
            }
            _ => {
                let length = be16(data, i + 2)? as usize;
                if length < 2 {
                    return None;
                }
                i += 2 + length;
            }
        }
    }
    None
}

fn sniff_gif(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 10 || (&data[..6] != b"GIF87a" && &data[..6] != b"GIF89a") {
        return None;
    }
    Some((le16(data, 6)?, le16(data, 8)?))
}

fn sniff_webp(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 16 || &data[..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return None;
    }
    match &data[12..16] {
        b"VP8X" => Some((le24(data, 24)? + 1, le24(data, 27)? + 1)),
        b"VP8 " => {
            // key frame: 3 byte frame tag, then the 9d 01 2a start code
            if data.get(23..26)? != [0x9d, 0x01, 0x2a] {
                return None;
            }
            Some((le16(data, 26)? & 0x3fff, le16(data, 28)? & 0x3fff))
        }
        b"VP8L" => {
            if *data.get(20)? != 0x2f {
                return None;
            }
            let bits = le32(data, 21)?;
            Some(((bits & 0x3fff) + 1, (bits >> 14 & 0x3fff) + 1))
        }
        _ => None,
    }
}

fn sniff_bmp(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 26 || &data[..2] != b"BM" {
        return None;
    }
    let width = le32(data, 18)? as i32;
    // negative height marks a top-down bitmap
    let height = le32(data, 22)? as i32;
    Some((width.unsigned_abs(), height.unsigned_abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 2, 0, 0, 0]);
        data
    }

    fn jpeg_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0xff, 0xd8];
        // APP0 segment first, as real encoders emit
        data.extend_from_slice(&[0xff, 0xe0, 0x00, 0x04, 0x4a, 0x46]);
        data.extend_from_slice(&[0xff, 0xc0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data
    }

    fn gif_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data
    }

    fn webp_lossy_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&30u32.to_le_bytes());
        data.extend_from_slice(b"WEBPVP8 ");
        data.extend_from_slice(&22u32.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x9d, 0x01, 0x2a]);
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data
    }

    fn bmp_bytes(width: i32, height: i32) -> Vec<u8> {
        let mut data = b"BM".to_vec();
        data.extend_from_slice(&[0; 12]);
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data
    }

    #[test]
    fn test_identify_png() {
        let info = SniffCodec.identify(&png_bytes(320, 200)).unwrap();
        assert_eq!(info.format, "png");
        assert_eq!(info.content_type, "image/png");
        assert_eq!((info.width, info.height), (320, 200));
    }

    #[test]
    fn test_identify_jpeg_skips_leading_segments() {
        let info = SniffCodec.identify(&jpeg_bytes(1024, 768)).unwrap();
        assert_eq!(info.format, "jpg");
        assert_eq!((info.width, info.height), (1024, 768));
    }

    #[test]
    fn test_identify_gif() {
        let info = SniffCodec.identify(&gif_bytes(320, 200)).unwrap();
        assert_eq!(info.format, "gif");
        assert_eq!((info.width, info.height), (320, 200));
    }

    #[test]
    fn test_identify_webp_lossy() {
        let info = SniffCodec.identify(&webp_lossy_bytes(640, 480)).unwrap();
        assert_eq!(info.format, "webp");
        assert_eq!((info.width, info.height), (640, 480));
    }

    #[test]
    fn test_identify_bmp_top_down() {
        let info = SniffCodec.identify(&bmp_bytes(320, -200)).unwrap();
        assert_eq!(info.format, "bmp");
        assert_eq!((info.width, info.height), (320, 200));
    }

    #[test]
    fn test_unknown_bytes_are_not_an_image() {
        assert!(SniffCodec.identify(b"%PDF-1.7 ...").is_none());
        assert!(SniffCodec.identify(b"<html></html>").is_none());
        assert!(SniffCodec.identify(&[]).is_none());
    }

    #[test]
    fn test_transform_is_a_passthrough() {
        let data = Bytes::from(png_bytes(320, 200));
        let info = SniffCodec.identify(&data).unwrap();
        let plan = TransformPlan {
            format: Some("webp".to_string()),
            ..Default::default()
        };
        let out = SniffCodec.transform(data.clone(), &info, &plan).unwrap();
        assert_eq!(out.bytes, data);
        assert_eq!(out.format, "png");
    }

    #[test]
    fn test_palette_sampling_is_deterministic() {
        let data = png_bytes(320, 200).repeat(8);
        let info = SniffCodec.identify(&data).unwrap();
        let first = SniffCodec.palette(&data, &info, 4);
        let second = SniffCodec.palette(&data, &info, 4);
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(first.len() <= 4);
    }

    #[test]
    fn test_writable_formats() {
        assert!(SniffCodec.can_write("jpg"));
        assert!(SniffCodec.can_write("webp"));
        assert!(!SniffCodec.can_write("jp2"));
        assert!(!SniffCodec.can_write("tiff"));
    }
}
