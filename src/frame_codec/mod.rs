//! FrameCodec - Raw Frame / Wire Payload Bridge
//!
//! ## Responsibilities
//!
//! - Encode raw captured frames to bounded-size JPEG blobs
//! - Decode annotated payloads back into displayable frames
//! - Tolerate not-yet-ready sources (zero-dimension fallback)
//!
//! Remote push events carry a self-describing JSON payload
//! (`{"image": "<base64 jpeg>"}`). A decode failure is a dropped frame,
//! never a session failure; callers decide what to do with the error.

use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;
use serde::{Deserialize, Serialize};

/// Fallback dimensions for sources that have not reported a size yet
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 360;

/// JPEG start-of-image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Raw RGB frame as sampled from a capture source
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8 pixels (`width * height * 3` bytes)
    pub pixels: Vec<u8>,
}

impl RawFrame {
    /// Create a blank frame at the fallback dimensions
    pub fn blank() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixels: vec![0u8; (DEFAULT_WIDTH * DEFAULT_HEIGHT * 3) as usize],
        }
    }
}

/// A decoded frame ready for immediate display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayFrame {
    /// Annotated JPEG bytes
    #[serde(skip)]
    pub jpeg: Vec<u8>,
    /// When this frame was decoded locally
    pub decoded_at: DateTime<Utc>,
}

impl DisplayFrame {
    fn new(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            decoded_at: Utc::now(),
        }
    }
}

/// Inline frame event payload as emitted by the push channel
#[derive(Debug, Deserialize)]
struct FrameEventPayload {
    image: String,
}

/// Encode a raw frame as JPEG at the given quality (0-100).
///
/// Sources that have not produced a real frame yet may report zero
/// dimensions; those are replaced with a blank default-size frame so the
/// capture loop keeps a bounded payload instead of erroring out.
pub fn encode(frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
    let fallback;
    let frame = if frame.width == 0 || frame.height == 0 {
        fallback = RawFrame::blank();
        &fallback
    } else {
        frame
    };

    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.pixels.len() != expected {
        return Err(Error::Internal(format!(
            "Raw frame buffer size mismatch: got {} bytes, expected {}",
            frame.pixels.len(),
            expected
        )));
    }

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .write_image(
            &frame.pixels,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| Error::Internal(format!("JPEG encode failed: {}", e)))?;

    Ok(out)
}

/// Decode one push-channel event payload into a displayable frame.
///
/// The payload is the `data:` body of a server-sent event:
/// a JSON object with a base64-encoded JPEG in `image`.
pub fn decode_event(data: &str) -> Result<DisplayFrame> {
    let payload: FrameEventPayload = serde_json::from_str(data)
        .map_err(|e| Error::FrameDecode(format!("Malformed frame event: {}", e)))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.image.as_bytes())
        .map_err(|e| Error::FrameDecode(format!("Invalid base64 image data: {}", e)))?;

    decode_annotated(bytes)
}

/// Validate and wrap an annotated JPEG response body.
pub fn decode_annotated(bytes: Vec<u8>) -> Result<DisplayFrame> {
    if bytes.len() < 2 || bytes[..2] != JPEG_SOI {
        return Err(Error::FrameDecode(format!(
            "Payload is not a JPEG image ({} bytes)",
            bytes.len()
        )));
    }
    Ok(DisplayFrame::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(width: u32, height: u32) -> RawFrame {
        RawFrame {
            width,
            height,
            pixels: vec![128u8; (width * height * 3) as usize],
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let jpeg = encode(&test_frame(32, 24), 80).unwrap();
        assert!(jpeg.len() > 2);
        assert_eq!(&jpeg[..2], &JPEG_SOI);
    }

    #[test]
    fn test_encode_zero_dimension_fallback() {
        let frame = RawFrame {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
        let jpeg = encode(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &JPEG_SOI);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = RawFrame {
            width: 16,
            height: 16,
            pixels: vec![0u8; 10],
        };
        assert!(encode(&frame, 80).is_err());
    }

    #[test]
    fn test_decode_event_roundtrip() {
        let jpeg = encode(&test_frame(16, 16), 80).unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        let data = format!("{{\"image\": \"{}\"}}", b64);

        let frame = decode_event(&data).unwrap();
        assert_eq!(frame.jpeg, jpeg);
    }

    #[test]
    fn test_decode_event_malformed_json() {
        let err = decode_event("not json at all").unwrap_err();
        assert!(matches!(err, Error::FrameDecode(_)));
    }

    #[test]
    fn test_decode_event_bad_base64() {
        let err = decode_event("{\"image\": \"@@not-base64@@\"}").unwrap_err();
        assert!(matches!(err, Error::FrameDecode(_)));
    }

    #[test]
    fn test_decode_annotated_rejects_non_jpeg() {
        let err = decode_annotated(b"<html>oops</html>".to_vec()).unwrap_err();
        assert!(matches!(err, Error::FrameDecode(_)));
    }
}
