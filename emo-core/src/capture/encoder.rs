//! Fixed-resolution JPEG encoder.
//!
//! Every frame is resized to the configured resolution, compressed as
//! baseline JPEG at a fixed quality, and base64-encoded with the standard
//! alphabet. Identical input always yields identical output.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::capture::types::EncodedImage;
use crate::error::CaptureError;

// ── EncoderConfig ────────────────────────────────────────────────

/// Output geometry and quality for [`FrameEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: 80,
        }
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// Encodes captured frames into the transport representation.
#[derive(Debug, Clone, Default)]
pub struct FrameEncoder {
    config: EncoderConfig,
    frame_count: u64,
}

impl FrameEncoder {
    /// Create an encoder. Quality is clamped to 1..=100.
    pub fn new(mut config: EncoderConfig) -> Self {
        config.quality = config.quality.clamp(1, 100);
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Encode one frame.
    pub fn encode(&mut self, frame: &DynamicImage) -> Result<EncodedImage, CaptureError> {
        let EncoderConfig {
            width,
            height,
            quality,
        } = self.config;

        let rgb = if frame.width() == width && frame.height() == height {
            frame.to_rgb8()
        } else {
            frame.resize_exact(width, height, FilterType::Triangle).to_rgb8()
        };

        let mut jpeg = Cursor::new(Vec::with_capacity((width * height / 8) as usize));
        JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&rgb)?;

        self.frame_count += 1;
        Ok(EncodedImage {
            base64: STANDARD.encode(jpeg.into_inner()),
            width,
            height,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
