//! Domain-specific error types for the streaming client.
//!
//! Fallible operations return `Result<T, EmoError>`. Inside the live
//! control loop nothing is thrown across component boundaries: errors are
//! logged and turned into observable state instead.

use thiserror::Error;

/// The canonical error type for the streaming client.
#[derive(Debug, Error)]
pub enum EmoError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The transport rejected or failed an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // ── Protocol Errors ──────────────────────────────────────────
    /// An inbound message could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // ── Capture Errors ───────────────────────────────────────────
    /// Frame acquisition or encoding failed.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    // ── Runtime Errors ───────────────────────────────────────────
    /// The session runtime is gone (task ended or every handle dropped).
    #[error("session runtime closed")]
    RuntimeClosed,

    /// The local I/O layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ── TransportError ───────────────────────────────────────────────

/// Errors raised by the socket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A send was attempted while the connection is not open.
    #[error("connection is not open")]
    NotOpen,

    /// The configured endpoint is not a usable `ws://` / `wss://` URL.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}

// ── ProtocolError ────────────────────────────────────────────────

/// Errors raised while decoding inbound messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON or lacked required fields.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload was valid JSON but of no known message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

// ── CaptureError ─────────────────────────────────────────────────

/// Errors raised by frame sources and the frame encoder.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source has no active stream to read from.
    #[error("source is not streaming")]
    SourceInactive,

    /// The source failed to produce a frame.
    #[error("frame grab failed: {0}")]
    Grab(String),

    /// The frame could not be encoded.
    #[error("frame encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EmoError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EmoError::RuntimeClosed
    }
}
