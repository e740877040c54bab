//! Shared types for the capture pipeline.

use async_trait::async_trait;
use image::DynamicImage;

use crate::error::CaptureError;

// ── FrameSource ──────────────────────────────────────────────────

/// A live visual source, such as a camera or a looping image set.
///
/// The capture loop takes ownership of the source and drops it when the
/// loop ends, so implementations should release devices in `Drop`.
pub trait FrameSource: Send + 'static {
    /// Whether the source currently has an active stream.
    ///
    /// When this returns `false` the capture tick is a no-op and
    /// [`grab`](Self::grab) is not called.
    fn is_streaming(&self) -> bool;

    /// Read the current frame.
    fn grab(&mut self) -> Result<DynamicImage, CaptureError>;
}

// ── PresenceFilter ───────────────────────────────────────────────

/// Optional pre-filter that can veto a capture tick, e.g. when no face
/// is visible.
///
/// Implementations must not panic. The capture loop applies a timeout and
/// treats an expired check as "not present".
#[async_trait]
pub trait PresenceFilter: Send + Sync {
    /// Returns `true` if the frame is worth sending.
    async fn is_present(&self, frame: &DynamicImage) -> bool;
}

// ── EncodedImage ─────────────────────────────────────────────────

/// A captured frame encoded as base64 JPEG, without a data-URL prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Base64 payload.
    pub base64: String,
    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
}

impl EncodedImage {
    /// Wrap a base64 payload produced elsewhere (e.g. a browser canvas).
    ///
    /// A leading `data:image/...;base64,` prefix is stripped.
    pub fn from_base64(payload: impl Into<String>, width: u32, height: u32) -> Self {
        let payload = payload.into();
        let base64 = match payload.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data.to_string(),
            _ => payload,
        };
        Self {
            base64,
            width,
            height,
        }
    }

    /// Size of the base64 payload in bytes.
    pub fn len(&self) -> usize {
        self.base64.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.base64.is_empty()
    }
}
