//! Session controller.
//!
//! Reconciles the transport and the capture loop into one observable
//! prediction session. The controller owns the [`TransportMachine`], gates
//! outgoing frames on connection state and the processing flag, and folds
//! inbound messages into the latest prediction.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::capture::EncodedImage;
use crate::credential::CredentialProvider;
use crate::message::{InboundMessage, OutboundFrame, Prediction};
use crate::state::connection::{
    ConnectionState, TransportConfig, TransportEffect, TransportEvent, TransportMachine,
};

// ── DropReason ───────────────────────────────────────────────────

/// Why the send gate refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The transport is not open.
    NotConnected,
    /// A previous frame is still awaiting its reply.
    Busy,
    /// No access token is available.
    NoCredential,
    /// The frame could not be serialized.
    Encoding,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NotConnected => write!(f, "not connected"),
            DropReason::Busy => write!(f, "busy"),
            DropReason::NoCredential => write!(f, "no credential"),
            DropReason::Encoding => write!(f, "encoding failed"),
        }
    }
}

/// Outcome of offering a frame to the send gate.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDecision {
    /// The frame was accepted; the driver must execute the transmit effect.
    Sent(TransportEffect),
    /// The frame was dropped.
    Dropped(DropReason),
}

impl FrameDecision {
    /// Returns `true` if the frame was accepted.
    pub fn is_sent(&self) -> bool {
        matches!(self, FrameDecision::Sent(_))
    }
}

// ── SessionView ──────────────────────────────────────────────────

/// Snapshot of everything a consumer may observe about the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_connecting: bool,
    /// Transport error (connection error or retries exhausted).
    pub error: Option<String>,
    pub reconnect_attempt: u32,
    pub max_reconnect_attempts: u32,
    pub prediction: Option<Prediction>,
    pub is_processing: bool,
    pub processing_time_ms: Option<f64>,
    pub model_version: Option<String>,
    /// Text of the most recent backend error message.
    pub last_backend_error: Option<String>,
    /// Frames accepted by the send gate since start.
    pub frames_sent: u64,
}

// ── SessionController ────────────────────────────────────────────

/// Send gate plus prediction state on top of a [`TransportMachine`].
pub struct SessionController {
    transport: TransportMachine,
    credentials: Arc<dyn CredentialProvider>,
    prediction: Option<Prediction>,
    processing: bool,
    last_backend_error: Option<String>,
    frames_sent: u64,
}

impl SessionController {
    pub fn new(config: TransportConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            transport: TransportMachine::new(config),
            credentials,
            prediction: None,
            processing: false,
            last_backend_error: None,
            frames_sent: 0,
        }
    }

    /// The underlying transport machine.
    pub fn transport(&self) -> &TransportMachine {
        &self.transport
    }

    /// Latest prediction, if any.
    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }

    /// Whether a sent frame is awaiting its reply.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    // ── Transport ────────────────────────────────────────────────

    /// Request a connection.
    pub fn connect(&mut self) -> Vec<TransportEffect> {
        self.apply(TransportEvent::Connect)
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&mut self) -> Vec<TransportEffect> {
        self.apply(TransportEvent::Disconnect)
    }

    /// Feed a transport event through the machine.
    ///
    /// Delivered messages are consumed here; the remaining effects are
    /// returned for the driver to execute.
    pub fn apply(&mut self, event: TransportEvent) -> Vec<TransportEffect> {
        let was_open = self.transport.state().is_open();
        let is_disconnect = matches!(event, TransportEvent::Disconnect);

        let mut pending = Vec::new();
        for effect in self.transport.handle(event) {
            match effect {
                TransportEffect::Deliver(message) => self.on_inbound(message),
                other => pending.push(other),
            }
        }

        if is_disconnect || (was_open && !self.transport.state().is_open()) {
            if self.processing {
                debug!("processing flag cleared on connection loss");
            }
            self.processing = false;
        }
        pending
    }

    // ── Send gate ────────────────────────────────────────────────

    /// Offer a captured frame for transmission.
    ///
    /// The transport state is checked on every call, so a connection that
    /// dropped between ticks never receives a frame.
    pub fn on_frame(&mut self, image: EncodedImage) -> FrameDecision {
        if !self.transport.state().is_open() {
            trace!(state = %self.transport.state(), "frame dropped: not connected");
            return FrameDecision::Dropped(DropReason::NotConnected);
        }
        if self.processing {
            trace!("frame dropped: previous frame in flight");
            return FrameDecision::Dropped(DropReason::Busy);
        }
        let Some(token) = self.credentials.access_token() else {
            warn!("frame dropped: no access token");
            return FrameDecision::Dropped(DropReason::NoCredential);
        };

        let text = match OutboundFrame::predict(image.base64, token).to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("frame dropped: {e}");
                return FrameDecision::Dropped(DropReason::Encoding);
            }
        };

        match self.transport.send(text) {
            Ok(effect) => {
                self.processing = true;
                self.frames_sent += 1;
                trace!(frames_sent = self.frames_sent, "frame sent");
                FrameDecision::Sent(effect)
            }
            Err(_) => FrameDecision::Dropped(DropReason::NotConnected),
        }
    }

    /// Fold an inbound message into the session.
    pub fn on_inbound(&mut self, message: InboundMessage) {
        self.processing = false;
        match message {
            InboundMessage::Prediction(prediction) => {
                debug!(
                    emotion = %prediction.emotion,
                    confidence = prediction.confidence,
                    "prediction received"
                );
                self.prediction = Some(prediction);
            }
            InboundMessage::Error { message } => {
                warn!("backend error: {message}");
                self.last_backend_error = Some(message);
            }
        }
    }

    /// Clear prediction state. The connection is left untouched.
    pub fn reset(&mut self) {
        self.prediction = None;
        self.processing = false;
        self.last_backend_error = None;
    }

    /// Snapshot the consumer-facing state.
    pub fn view(&self) -> SessionView {
        let state = self.transport.state();
        SessionView {
            state,
            is_connected: state.is_open(),
            is_connecting: state.is_connecting(),
            error: self.transport.error().map(str::to_string),
            reconnect_attempt: self.transport.retry_count(),
            max_reconnect_attempts: self.transport.max_attempts(),
            prediction: self.prediction.clone(),
            is_processing: self.processing,
            processing_time_ms: self.prediction.as_ref().and_then(|p| p.processing_time_ms),
            model_version: self.prediction.as_ref().and_then(|p| p.model_version.clone()),
            last_backend_error: self.last_backend_error.clone(),
            frames_sent: self.frames_sent,
        }
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("transport", &self.transport)
            .field("prediction", &self.prediction)
            .field("processing", &self.processing)
            .field("frames_sent", &self.frames_sent)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backoff::Backoff;
    use crate::credential::{SharedToken, StaticToken};
    use crate::state::connection::MAX_ATTEMPTS_REACHED;

    fn controller(token: Option<&str>) -> SessionController {
        let credentials: Arc<dyn CredentialProvider> = match token {
            Some(t) => Arc::new(StaticToken::new(t)),
            None => Arc::new(StaticToken::none()),
        };
        SessionController::new(
            TransportConfig {
                max_attempts: 5,
                backoff: Backoff::Fixed {
                    delay: Duration::from_millis(10),
                },
            },
            credentials,
        )
    }

    fn open(c: &mut SessionController) -> u64 {
        let effects = c.connect();
        let Some(TransportEffect::OpenSocket { attempt }) = effects.last().cloned() else {
            panic!("expected OpenSocket, got {effects:?}");
        };
        c.apply(TransportEvent::Opened { attempt });
        attempt
    }

    fn frame() -> EncodedImage {
        EncodedImage::from_base64("QUJD", 640, 480)
    }

    fn prediction_json(emotion: &str) -> String {
        format!(
            r#"{{"type":"prediction","status":"success","emotion_name":"{emotion}",
                "confidence":0.87,"model_version_tag":"v2","processing_time_ms":35}}"#
        )
    }

    #[test]
    fn sends_predict_frame_when_open() {
        let mut c = controller(Some("abc"));
        let attempt = open(&mut c);

        let decision = c.on_frame(frame());
        let FrameDecision::Sent(TransportEffect::Transmit { attempt: a, text }) = decision else {
            panic!("expected transmit, got {decision:?}");
        };
        assert_eq!(a, attempt);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"command": "predict", "image": "QUJD", "token": "abc"})
        );
        assert!(c.is_processing());
        assert_eq!(c.view().frames_sent, 1);
    }

    #[test]
    fn never_sends_unless_open() {
        let mut c = controller(Some("abc"));
        for _ in 0..10 {
            assert_eq!(
                c.on_frame(frame()),
                FrameDecision::Dropped(DropReason::NotConnected)
            );
        }

        c.connect();
        for _ in 0..10 {
            assert!(!c.on_frame(frame()).is_sent());
        }
        assert!(!c.is_processing());
        assert_eq!(c.view().frames_sent, 0);
    }

    #[test]
    fn busy_frames_are_dropped_until_reply() {
        let mut c = controller(Some("abc"));
        let attempt = open(&mut c);

        assert!(c.on_frame(frame()).is_sent());
        assert_eq!(c.on_frame(frame()), FrameDecision::Dropped(DropReason::Busy));
        assert_eq!(c.on_frame(frame()), FrameDecision::Dropped(DropReason::Busy));
        assert!(c.is_processing());

        c.apply(TransportEvent::Message {
            attempt,
            text: prediction_json("happy"),
        });
        assert!(!c.is_processing());
        assert!(c.on_frame(frame()).is_sent());
    }

    #[test]
    fn missing_token_drops_frame() {
        let mut c = controller(None);
        open(&mut c);
        assert_eq!(
            c.on_frame(frame()),
            FrameDecision::Dropped(DropReason::NoCredential)
        );
        assert!(!c.is_processing());
    }

    #[test]
    fn token_is_read_at_send_time() {
        let shared = Arc::new(SharedToken::new());
        let mut c = SessionController::new(TransportConfig::default(), shared.clone());
        open(&mut c);

        assert!(!c.on_frame(frame()).is_sent());
        shared.set(Some("fresh".into()));
        let FrameDecision::Sent(TransportEffect::Transmit { text, .. }) = c.on_frame(frame()) else {
            panic!("expected transmit");
        };
        assert!(text.contains(r#""token":"fresh""#));
    }

    #[test]
    fn prediction_round_trip() {
        let mut c = controller(Some("abc"));
        let attempt = open(&mut c);
        assert!(c.on_frame(frame()).is_sent());

        c.apply(TransportEvent::Message {
            attempt,
            text: prediction_json("happy"),
        });

        let view = c.view();
        let p = view.prediction.as_ref().unwrap();
        assert_eq!(p.emotion, "happy");
        assert_eq!(p.confidence, 0.87);
        assert_eq!(view.model_version.as_deref(), Some("v2"));
        assert_eq!(view.processing_time_ms, Some(35.0));
        assert!(!view.is_processing);
    }

    #[test]
    fn backend_error_keeps_prediction() {
        let mut c = controller(Some("abc"));
        let attempt = open(&mut c);
        c.on_frame(frame());
        c.apply(TransportEvent::Message {
            attempt,
            text: prediction_json("sad"),
        });
        c.on_frame(frame());
        assert!(c.is_processing());

        c.apply(TransportEvent::Message {
            attempt,
            text: r#"{"type":"error","message":"no_face_detected"}"#.into(),
        });

        assert!(!c.is_processing());
        assert_eq!(c.prediction().unwrap().emotion, "sad");
        assert_eq!(
            c.view().last_backend_error.as_deref(),
            Some("no_face_detected")
        );
    }

    #[test]
    fn disconnect_clears_processing() {
        let mut c = controller(Some("abc"));
        open(&mut c);
        c.on_frame(frame());
        assert!(c.is_processing());

        c.disconnect();
        assert!(!c.is_processing());
        assert_eq!(c.view().state, ConnectionState::Idle);
    }

    #[test]
    fn connection_loss_clears_processing() {
        let mut c = controller(Some("abc"));
        let attempt = open(&mut c);
        c.on_frame(frame());

        let effects = c.apply(TransportEvent::Closed { attempt });
        assert!(matches!(
            effects.as_slice(),
            [TransportEffect::ScheduleRetry { .. }]
        ));
        assert!(!c.is_processing());

        // A late reply from the dead socket must not be attributed.
        c.apply(TransportEvent::Message {
            attempt,
            text: prediction_json("angry"),
        });
        assert!(c.prediction().is_none());
    }

    #[test]
    fn reset_keeps_connection() {
        let mut c = controller(Some("abc"));
        let attempt = open(&mut c);
        c.on_frame(frame());
        c.apply(TransportEvent::Message {
            attempt,
            text: prediction_json("happy"),
        });

        c.reset();

        let view = c.view();
        assert!(view.prediction.is_none());
        assert!(view.model_version.is_none());
        assert!(view.processing_time_ms.is_none());
        assert!(!view.is_processing);
        assert!(view.is_connected);
        assert_eq!(c.transport().live_attempt(), Some(attempt));
    }

    #[test]
    fn view_reports_exhausted_retries() {
        let mut c = controller(Some("abc"));
        let mut attempt = open(&mut c);

        for _ in 0..5 {
            c.apply(TransportEvent::Closed { attempt });
            let effects = c.apply(TransportEvent::RetryElapsed);
            let Some(TransportEffect::OpenSocket { attempt: next }) = effects.last().cloned()
            else {
                panic!("expected reconnect, got {effects:?}");
            };
            attempt = next;
        }
        let view = c.view();
        assert!(view.is_connecting);
        assert_eq!(view.reconnect_attempt, 5);

        let effects = c.apply(TransportEvent::Closed { attempt });
        assert!(effects.is_empty());
        let view = c.view();
        assert_eq!(view.error.as_deref(), Some(MAX_ATTEMPTS_REACHED));
        assert_eq!(view.max_reconnect_attempts, 5);
        assert!(!view.is_connected);
    }
}
