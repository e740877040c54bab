//! # emo-core
//!
//! Streaming client core for live facial-emotion detection.
//!
//! This crate contains:
//! - **Transport**: `TransportMachine`, a pure reconnecting state machine,
//!   and `SocketHandle`, the per-attempt WebSocket driver
//! - **Capture**: `CaptureLoop` sampling a `FrameSource`, with an optional
//!   `PresenceFilter` and a fixed-resolution JPEG `FrameEncoder`
//! - **Session**: `SessionController`, the send gate and prediction state
//! - **Runtime**: `LiveClient` / `LiveHandle`, the single-task event loop
//!   publishing `SessionView` snapshots
//! - **Protocol**: `OutboundFrame`, `InboundMessage`, `Prediction`
//! - **Credentials**: `CredentialProvider` with `StaticToken` and `SharedToken`
//! - **Error**: `EmoError`, a `thiserror`-based error hierarchy

pub mod backoff;
pub mod capture;
pub mod client;
pub mod credential;
pub mod error;
pub mod message;
pub mod network;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use backoff::Backoff;
pub use capture::{
    CaptureConfig, CaptureLoop, CaptureStats, EncodedImage, EncoderConfig, FrameEncoder,
    FrameSource, PresenceFilter,
};
pub use client::{ClientConfig, DEFAULT_URL, LiveClient, LiveHandle};
pub use credential::{CredentialProvider, SharedToken, StaticToken};
pub use error::{CaptureError, EmoError, ProtocolError, TransportError};
pub use message::{InboundMessage, OutboundFrame, Prediction, Timestamp};
pub use network::SocketHandle;
pub use state::{
    ConnectionState, DropReason, FrameDecision, SessionController, SessionView,
    TransportConfig, TransportEffect, TransportEvent, TransportMachine,
};
