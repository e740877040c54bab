//! Wire messages exchanged with the emotion backend over the socket.
//!
//! # Wire Protocol
//!
//! ## Frame (client → backend)
//! ```text
//! {"command": "predict", "image": "<base64 jpeg>", "token": "<bearer>"}
//! ```
//!
//! ## Prediction (backend → client)
//! ```text
//! {"type": "prediction", "status": "success", "emotion_name": "happy",
//!  "confidence": 0.93, "model_version_tag": "v2", "processing_time_ms": 41,
//!  "timestamp": "2024-05-01T10:00:00Z"}
//! ```
//!
//! ## Error (backend → client)
//! ```text
//! {"type": "error", "message": "no_face_detected"}
//! {"status": "error", "message": "invalid token"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Command tag carried by every outbound frame.
pub const PREDICT_COMMAND: &str = "predict";

/// Message used when the backend reports an error without a text.
const UNKNOWN_ERROR: &str = "unknown error";

// ── OutboundFrame ────────────────────────────────────────────────

/// A captured still image packaged for the backend.
///
/// Fire-and-forget: there is no per-frame correlation id on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    /// Always [`PREDICT_COMMAND`].
    pub command: &'static str,
    /// Base64 image payload without a `data:` URL prefix.
    pub image: String,
    /// Bearer credential authorising the request.
    pub token: String,
}

impl OutboundFrame {
    /// Build a `predict` frame from an encoded image and a token.
    pub fn predict(image: String, token: String) -> Self {
        Self {
            command: PREDICT_COMMAND,
            image,
            token,
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Timestamp ────────────────────────────────────────────────────

/// Backend timestamp: either epoch milliseconds or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch.
    Epoch(f64),
    /// Textual timestamp, passed through untouched.
    Text(String),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Epoch(ms) => write!(f, "{ms}"),
            Timestamp::Text(s) => write!(f, "{s}"),
        }
    }
}

// ── Prediction ───────────────────────────────────────────────────

/// A successfully decoded emotion prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted label, e.g. `happy`.
    pub emotion: String,
    /// Model confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Version tag of the model that produced the prediction.
    pub model_version: Option<String>,
    /// Backend-side processing latency.
    pub processing_time_ms: Option<f64>,
    /// When the backend produced the prediction.
    pub timestamp: Option<Timestamp>,
}

// ── InboundMessage ───────────────────────────────────────────────

/// A decoded message received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The backend classified the last frame.
    Prediction(Prediction),
    /// The backend could not process the last frame.
    Error { message: String },
}

/// Loose JSON shape shared by every inbound message.
#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    message: Option<String>,
    emotion_name: Option<String>,
    confidence: Option<f64>,
    model_version_tag: Option<String>,
    processing_time_ms: Option<f64>,
    timestamp: Option<Timestamp>,
}

impl InboundMessage {
    /// Decode a text frame received from the socket.
    ///
    /// Errors are classified before predictions: a payload with
    /// `type == "error"` or `status == "error"` is always an error.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawInbound = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawInbound) -> Result<Self, ProtocolError> {
        let kind = raw.kind.as_deref();
        let status = raw.status.as_deref();

        if kind == Some("error") || status == Some("error") {
            return Ok(InboundMessage::Error {
                message: raw.message.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            });
        }

        match (kind, status) {
            (Some("prediction"), None | Some("success")) => {
                let (Some(emotion), Some(confidence)) = (raw.emotion_name, raw.confidence) else {
                    return Err(ProtocolError::UnknownType(
                        "prediction without emotion_name/confidence".into(),
                    ));
                };
                Ok(InboundMessage::Prediction(Prediction {
                    emotion,
                    confidence,
                    model_version: raw.model_version_tag,
                    processing_time_ms: raw.processing_time_ms,
                    timestamp: raw.timestamp,
                }))
            }
            (other, _) => Err(ProtocolError::UnknownType(
                other.unwrap_or("<missing>").to_string(),
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
