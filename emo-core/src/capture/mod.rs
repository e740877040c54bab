//! # capture — periodic frame sampling
//!
//! ```text
//! FrameSource::grab ──► PresenceFilter (optional) ──► FrameEncoder ──► on_frame
//!        ▲
//!   CaptureLoop tick (fixed interval, cancellable)
//! ```
//!
//! The loop never throttles itself: every tick that yields a frame is
//! offered downstream, and the session's send gate decides whether it
//! goes out.
//!
//! | Module    | Purpose                                           |
//! |-----------|---------------------------------------------------|
//! | `types`   | Source / filter traits and the encoded image type |
//! | `encoder` | Fixed-resolution JPEG + base64 encoder            |
//! | `service` | The cancellable capture loop                      |

pub mod encoder;
pub mod service;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use encoder::{EncoderConfig, FrameEncoder};
pub use service::{CaptureConfig, CaptureLoop, CaptureStats, MIN_INTERVAL};
pub use types::{EncodedImage, FrameSource, PresenceFilter};
