//! Transport state machine.
//!
//! [`TransportMachine`] owns the connection lifecycle and the reconnect
//! policy without touching sockets or timers. Every input is a
//! [`TransportEvent`]; every side effect the driver must perform comes
//! back as a [`TransportEffect`]. This keeps retry behaviour testable
//! without a network.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::error::TransportError;
use crate::message::InboundMessage;

/// Error text recorded when the socket reports a failure.
pub const CONNECTION_ERROR: &str = "connection error occurred";

/// Error text recorded once automatic reconnection gives up.
pub const MAX_ATTEMPTS_REACHED: &str = "max reconnection attempts reached";

/// Default ceiling for automatic reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ── ConnectionState ──────────────────────────────────────────────

/// The current state of the backend connection.
///
/// ```text
///  Idle ──► Connecting ──► Open ──► Closed ──► Connecting (retry)
///   ▲           │                     │
///   │           └────────► Closed     └──────► Idle (disconnect)
///   └──────────────── disconnect ◄──── any
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none wanted. Initial state.
    #[default]
    Idle,

    /// A socket is being established.
    Connecting,

    /// The socket is up; frames may be sent.
    Open,

    /// The socket went away without being asked to.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ConnectionState {
    /// Returns `true` when frames may be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` while a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

// ── Events & effects ─────────────────────────────────────────────

/// Inputs to the transport state machine.
///
/// Socket-originated events carry the attempt id of the socket that
/// produced them; events from any socket other than the live one are
/// discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Explicit request to connect.
    Connect,
    /// Explicit request to disconnect.
    Disconnect,
    /// The scheduled reconnect delay has elapsed.
    RetryElapsed,
    /// The socket finished its handshake.
    Opened { attempt: u64 },
    /// A text frame arrived.
    Message { attempt: u64, text: String },
    /// The socket reported an error.
    Error { attempt: u64, reason: String },
    /// The socket is gone.
    Closed { attempt: u64 },
}

/// Side effects the driver must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEffect {
    /// Start a new socket tagged with `attempt`.
    OpenSocket { attempt: u64 },
    /// Close the socket tagged with `attempt`.
    CloseSocket { attempt: u64 },
    /// Arm the reconnect timer.
    ScheduleRetry { delay: Duration },
    /// Disarm the reconnect timer.
    CancelRetry,
    /// Write a text frame on the socket tagged with `attempt`.
    Transmit { attempt: u64, text: String },
    /// Hand a decoded message to the session.
    Deliver(InboundMessage),
}

// ── TransportConfig ──────────────────────────────────────────────

/// Reconnect policy for [`TransportMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Ceiling for automatic reconnect attempts.
    pub max_attempts: u32,
    /// Delay strategy between attempts.
    pub backoff: Backoff,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

// ── TransportMachine ─────────────────────────────────────────────

/// Connection lifecycle and reconnect policy, free of I/O.
#[derive(Debug, Clone)]
pub struct TransportMachine {
    config: TransportConfig,
    state: ConnectionState,
    retry_count: u32,
    error: Option<String>,
    intentional_close: bool,
    retry_pending: bool,
    /// Last attempt id handed out.
    next_attempt: u64,
    /// Attempt id of the socket currently owned, if any.
    live: Option<u64>,
}

impl TransportMachine {
    /// Create an idle machine.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            retry_count: 0,
            error: None,
            intentional_close: false,
            retry_pending: false,
            next_attempt: 0,
            live: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Automatic reconnect attempts made since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Configured reconnect ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Last transport error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether a reconnect timer is currently armed.
    pub fn is_retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Attempt id of the socket currently owned.
    pub fn live_attempt(&self) -> Option<u64> {
        self.live
    }

    /// Returns `true` once automatic reconnection has given up.
    pub fn is_exhausted(&self) -> bool {
        self.state == ConnectionState::Closed
            && !self.retry_pending
            && self.retry_count >= self.config.max_attempts
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Apply one event and return the effects to execute, in order.
    pub fn handle(&mut self, event: TransportEvent) -> Vec<TransportEffect> {
        let mut effects = Vec::new();
        match event {
            TransportEvent::Connect => self.on_connect(&mut effects),
            TransportEvent::Disconnect => self.on_disconnect(&mut effects),
            TransportEvent::RetryElapsed => self.on_retry_elapsed(&mut effects),
            TransportEvent::Opened { attempt } => self.on_opened(attempt),
            TransportEvent::Message { attempt, text } => {
                self.on_message(attempt, &text, &mut effects)
            }
            TransportEvent::Error { attempt, reason } => self.on_error(attempt, &reason),
            TransportEvent::Closed { attempt } => self.on_closed(attempt, &mut effects),
        }
        effects
    }

    /// Prepare a text frame for transmission.
    ///
    /// Only succeeds while the connection is open. Nothing is queued.
    pub fn send(&self, text: String) -> Result<TransportEffect, TransportError> {
        match (self.state, self.live) {
            (ConnectionState::Open, Some(attempt)) => Ok(TransportEffect::Transmit { attempt, text }),
            _ => {
                warn!(state = %self.state, "socket is not connected; dropping outbound frame");
                Err(TransportError::NotOpen)
            }
        }
    }

    fn on_connect(&mut self, effects: &mut Vec<TransportEffect>) {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            debug!(state = %self.state, "connect ignored");
            return;
        }
        // An explicit connect starts a fresh retry budget.
        self.retry_count = 0;
        self.error = None;
        self.begin_attempt(effects);
    }

    fn on_disconnect(&mut self, effects: &mut Vec<TransportEffect>) {
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(TransportEffect::CancelRetry);
        }
        if let Some(attempt) = self.live {
            if !self.intentional_close {
                effects.push(TransportEffect::CloseSocket { attempt });
            }
        }
        self.intentional_close = true;
        self.retry_count = 0;
        self.error = None;
        self.state = ConnectionState::Idle;
    }

    fn on_retry_elapsed(&mut self, effects: &mut Vec<TransportEffect>) {
        if !self.retry_pending {
            trace!("stale retry timer ignored");
            return;
        }
        self.retry_pending = false;
        if self.state != ConnectionState::Closed {
            return;
        }
        info!(
            "reconnecting, attempt {}/{}",
            self.retry_count, self.config.max_attempts
        );
        self.begin_attempt(effects);
    }

    fn on_opened(&mut self, attempt: u64) {
        if !self.is_live(attempt) || self.state != ConnectionState::Connecting {
            trace!(attempt, "open event ignored");
            return;
        }
        info!(attempt, "connected");
        self.state = ConnectionState::Open;
        self.retry_count = 0;
        self.error = None;
    }

    fn on_message(&mut self, attempt: u64, text: &str, effects: &mut Vec<TransportEffect>) {
        if !self.is_live(attempt) || self.state != ConnectionState::Open {
            trace!(attempt, "message after close ignored");
            return;
        }
        match InboundMessage::decode(text) {
            Ok(message) => effects.push(TransportEffect::Deliver(message)),
            Err(e) => warn!("failed to parse inbound message: {e}"),
        }
    }

    fn on_error(&mut self, attempt: u64, reason: &str) {
        if !self.is_live(attempt) || self.intentional_close {
            return;
        }
        warn!(attempt, "socket error: {reason}");
        self.error = Some(CONNECTION_ERROR.to_string());
    }

    fn on_closed(&mut self, attempt: u64, effects: &mut Vec<TransportEffect>) {
        if !self.is_live(attempt) {
            trace!(attempt, "close of stale socket ignored");
            return;
        }
        self.live = None;

        if self.intentional_close {
            info!(attempt, "connection closed intentionally");
            self.state = ConnectionState::Idle;
            self.retry_count = 0;
            return;
        }

        info!(attempt, "connection lost");
        self.state = ConnectionState::Closed;
        if self.retry_count < self.config.max_attempts {
            self.retry_count += 1;
            self.retry_pending = true;
            let delay = self.config.backoff.delay(self.retry_count);
            debug!(
                "retry {}/{} in {delay:?}",
                self.retry_count, self.config.max_attempts
            );
            effects.push(TransportEffect::ScheduleRetry { delay });
        } else {
            warn!("{MAX_ATTEMPTS_REACHED}");
            self.error = Some(MAX_ATTEMPTS_REACHED.to_string());
        }
    }

    fn begin_attempt(&mut self, effects: &mut Vec<TransportEffect>) {
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(TransportEffect::CancelRetry);
        }
        // After a disconnect the previous socket is already being closed.
        if let Some(previous) = self.live.take() {
            if !self.intentional_close {
                effects.push(TransportEffect::CloseSocket { attempt: previous });
            }
        }
        self.intentional_close = false;
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.live = Some(attempt);
        self.state = ConnectionState::Connecting;
        effects.push(TransportEffect::OpenSocket { attempt });
    }

    fn is_live(&self, attempt: u64) -> bool {
        self.live == Some(attempt)
    }
}

impl Default for TransportMachine {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max_attempts: u32) -> TransportMachine {
        TransportMachine::new(TransportConfig {
            max_attempts,
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(100),
            },
        })
    }

    /// Connect and complete the handshake; returns the live attempt id.
    fn open(m: &mut TransportMachine) -> u64 {
        let effects = m.handle(TransportEvent::Connect);
        let Some(TransportEffect::OpenSocket { attempt }) = effects.last().cloned() else {
            panic!("expected OpenSocket, got {effects:?}");
        };
        m.handle(TransportEvent::Opened { attempt });
        attempt
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut m = machine(5);
        assert_eq!(m.state(), ConnectionState::Idle);

        let effects = m.handle(TransportEvent::Connect);
        assert_eq!(effects, vec![TransportEffect::OpenSocket { attempt: 1 }]);
        assert_eq!(m.state(), ConnectionState::Connecting);

        m.handle(TransportEvent::Opened { attempt: 1 });
        assert!(m.state().is_open());
        assert_eq!(m.retry_count(), 0);
        assert!(m.error().is_none());

        let effects = m.handle(TransportEvent::Disconnect);
        assert_eq!(effects, vec![TransportEffect::CloseSocket { attempt: 1 }]);
        assert_eq!(m.state(), ConnectionState::Idle);

        let effects = m.handle(TransportEvent::Closed { attempt: 1 });
        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(!m.is_retry_pending());
    }

    #[test]
    fn connect_is_noop_while_open_or_connecting() {
        let mut m = machine(5);
        m.handle(TransportEvent::Connect);
        assert!(m.handle(TransportEvent::Connect).is_empty());
        m.handle(TransportEvent::Opened { attempt: 1 });
        assert!(m.handle(TransportEvent::Connect).is_empty());
        assert_eq!(m.live_attempt(), Some(1));
    }

    #[test]
    fn send_only_when_open() {
        let mut m = machine(5);
        assert!(matches!(m.send("x".into()), Err(TransportError::NotOpen)));

        m.handle(TransportEvent::Connect);
        assert!(m.send("x".into()).is_err());

        m.handle(TransportEvent::Opened { attempt: 1 });
        assert_eq!(
            m.send("x".into()).unwrap(),
            TransportEffect::Transmit {
                attempt: 1,
                text: "x".into()
            }
        );
    }

    #[test]
    fn unexpected_close_schedules_retry() {
        let mut m = machine(5);
        let attempt = open(&mut m);

        let effects = m.handle(TransportEvent::Closed { attempt });
        assert_eq!(
            effects,
            vec![TransportEffect::ScheduleRetry {
                delay: Duration::from_millis(100)
            }]
        );
        assert_eq!(m.state(), ConnectionState::Closed);
        assert_eq!(m.retry_count(), 1);
        assert!(m.is_retry_pending());

        let effects = m.handle(TransportEvent::RetryElapsed);
        assert_eq!(effects, vec![TransportEffect::OpenSocket { attempt: 2 }]);
        assert_eq!(m.retry_count(), 1);

        m.handle(TransportEvent::Opened { attempt: 2 });
        assert_eq!(m.retry_count(), 0);
    }

    #[test]
    fn five_unexpected_closes_exhaust_retries() {
        let mut m = machine(5);
        let mut attempt = open(&mut m);

        for expected in 1..=5 {
            let effects = m.handle(TransportEvent::Closed { attempt });
            assert!(matches!(effects[..], [TransportEffect::ScheduleRetry { .. }]));
            assert_eq!(m.retry_count(), expected);

            let effects = m.handle(TransportEvent::RetryElapsed);
            let [TransportEffect::OpenSocket { attempt: next }] = effects[..] else {
                panic!("expected OpenSocket, got {effects:?}");
            };
            attempt = next;
        }

        // The fifth retry also fails: no sixth timer.
        let effects = m.handle(TransportEvent::Closed { attempt });
        assert!(effects.is_empty());
        assert_eq!(m.retry_count(), 5);
        assert_eq!(m.error(), Some(MAX_ATTEMPTS_REACHED));
        assert!(!m.is_retry_pending());
        assert!(m.is_exhausted());

        // A late timer event cannot restart anything.
        assert!(m.handle(TransportEvent::RetryElapsed).is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn explicit_connect_leaves_exhausted_state() {
        let mut m = machine(0);
        let attempt = open(&mut m);
        assert!(m.handle(TransportEvent::Closed { attempt }).is_empty());
        assert!(m.is_exhausted());

        let effects = m.handle(TransportEvent::Connect);
        assert_eq!(effects, vec![TransportEffect::OpenSocket { attempt: 2 }]);
        assert!(m.error().is_none());
        assert_eq!(m.retry_count(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut m = machine(5);
        let attempt = open(&mut m);
        m.handle(TransportEvent::Closed { attempt });
        assert!(m.is_retry_pending());

        let first = m.handle(TransportEvent::Disconnect);
        assert_eq!(first, vec![TransportEffect::CancelRetry]);
        let snapshot = (m.state(), m.retry_count(), m.is_retry_pending(), m.error().map(str::to_owned));

        let second = m.handle(TransportEvent::Disconnect);
        assert!(second.is_empty());
        assert_eq!(
            snapshot,
            (m.state(), m.retry_count(), m.is_retry_pending(), m.error().map(str::to_owned))
        );
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.retry_count(), 0);
        assert!(!m.is_retry_pending());
    }

    #[test]
    fn messages_after_disconnect_are_ignored() {
        let mut m = machine(5);
        let attempt = open(&mut m);
        m.handle(TransportEvent::Disconnect);

        let effects = m.handle(TransportEvent::Message {
            attempt,
            text: r#"{"type":"error","message":"late"}"#.into(),
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn events_from_stale_sockets_are_ignored() {
        let mut m = machine(5);
        let old = open(&mut m);
        m.handle(TransportEvent::Disconnect);
        let effects = m.handle(TransportEvent::Connect);
        assert_eq!(effects, vec![TransportEffect::OpenSocket { attempt: old + 1 }]);

        // The old socket's close arrives late: it must not schedule a retry.
        assert!(m.handle(TransportEvent::Closed { attempt: old }).is_empty());
        m.handle(TransportEvent::Opened { attempt: old });
        assert_eq!(m.state(), ConnectionState::Connecting);

        m.handle(TransportEvent::Opened { attempt: old + 1 });
        assert!(m.state().is_open());
    }

    #[test]
    fn socket_error_is_non_fatal() {
        let mut m = machine(5);
        let attempt = open(&mut m);
        let effects = m.handle(TransportEvent::Error {
            attempt,
            reason: "reset".into(),
        });
        assert!(effects.is_empty());
        assert!(m.state().is_open());
        assert_eq!(m.error(), Some(CONNECTION_ERROR));
    }

    #[test]
    fn malformed_message_is_discarded() {
        let mut m = machine(5);
        let attempt = open(&mut m);
        let effects = m.handle(TransportEvent::Message {
            attempt,
            text: "{not json".into(),
        });
        assert!(effects.is_empty());
        assert!(m.state().is_open());

        let effects = m.handle(TransportEvent::Message {
            attempt,
            text: r#"{"type":"error","message":"no_face_detected"}"#.into(),
        });
        assert!(matches!(effects[..], [TransportEffect::Deliver(InboundMessage::Error { .. })]));
    }

    #[test]
    fn retry_counter_never_exceeds_ceiling() {
        // Drive a deterministic mix of opens, failures, retries and
        // explicit commands; the invariant must hold after every step.
        for max in 0..4u32 {
            let mut m = machine(max);
            let mut seed: u64 = 0x9e37_79b9_7f4a_7c15 ^ u64::from(max);
            for _ in 0..500 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let live = m.live_attempt().unwrap_or(0);
                let event = match seed % 7 {
                    0 => TransportEvent::Connect,
                    1 => TransportEvent::Disconnect,
                    2 => TransportEvent::RetryElapsed,
                    3 => TransportEvent::Opened { attempt: live },
                    4 => TransportEvent::Error {
                        attempt: live,
                        reason: "x".into(),
                    },
                    _ => TransportEvent::Closed { attempt: live },
                };
                let exhausted_before = m.is_exhausted();
                let was_connect = event == TransportEvent::Connect;
                let effects = m.handle(event);

                assert!(m.retry_count() <= max);
                if exhausted_before && !was_connect {
                    assert!(
                        !effects
                            .iter()
                            .any(|e| matches!(e, TransportEffect::ScheduleRetry { .. }))
                    );
                }
            }
        }
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Idle.to_string(), "Idle");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(TransportMachine::default().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }
}
