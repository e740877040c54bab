//! One WebSocket per connection attempt.
//!
//! [`SocketHandle::open`] spawns a task that dials the endpoint and then
//! pumps frames in both directions. Everything the socket observes is
//! reported back as a [`TransportEvent`] tagged with the attempt id:
//!
//! ```text
//!   Opened ──► Message* ──► [Error] ──► Closed
//!   Error ──► Closed                    (dial failed)
//! ```
//!
//! Exactly one `Closed` is emitted per attempt. Dropping the handle (or
//! calling [`SocketHandle::close`]) makes the task send a Close frame and
//! exit.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::state::connection::TransportEvent;

/// Sender half used by socket tasks to report back to the runtime.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Upper bound for the TCP connect plus TLS and WebSocket handshakes.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that `url` names a WebSocket endpoint.
pub fn validate_url(url: &str) -> Result<(), TransportError> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }
    Ok(())
}

/// Owning handle to a socket task.
#[derive(Debug)]
pub struct SocketHandle {
    attempt: u64,
    // Channel to the writer half; dropping it closes the socket.
    tx: mpsc::UnboundedSender<String>,
}

impl SocketHandle {
    /// Dial `url` in a background task tagged with `attempt`.
    ///
    /// A dial that has not completed within `handshake_timeout` is
    /// reported as an error followed by `Closed`.
    pub fn open(url: &str, attempt: u64, handshake_timeout: Duration, events: EventSender) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(url.to_string(), attempt, handshake_timeout, rx, events));
        Self { attempt, tx }
    }

    /// Attempt id this socket was opened with.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Queue a text frame for the writer.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).map_err(|_| TransportError::NotOpen)
    }

    /// Ask the socket to close. The task reports `Closed` when done.
    pub fn close(self) {
        drop(self);
    }
}

/// Select ring as the process-wide rustls provider for `wss://` dials.
fn install_crypto_provider() {
    // Fails harmlessly once a provider is installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn dial_failed(events: &EventSender, attempt: u64, reason: String) {
    let _ = events.send(TransportEvent::Error { attempt, reason });
    let _ = events.send(TransportEvent::Closed { attempt });
}

async fn run(
    url: String,
    attempt: u64,
    handshake_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: EventSender,
) {
    debug!(attempt, %url, "dialing");
    if url.starts_with("wss://") {
        install_crypto_provider();
    }

    let dial = tokio::select! {
        result = tokio::time::timeout(handshake_timeout, connect_async(url.as_str())) => Some(result),
        // The handle was dropped before the handshake finished.
        _ = outbound.recv() => None,
    };

    let ws = match dial {
        Some(Ok(Ok((ws, _response)))) => ws,
        Some(Ok(Err(e))) => {
            dial_failed(&events, attempt, e.to_string());
            return;
        }
        Some(Err(_elapsed)) => {
            dial_failed(
                &events,
                attempt,
                format!("handshake timed out after {handshake_timeout:?}"),
            );
            return;
        }
        None => {
            trace!(attempt, "dial abandoned");
            let _ = events.send(TransportEvent::Closed { attempt });
            return;
        }
    };

    if events.send(TransportEvent::Opened { attempt }).is_err() {
        return;
    }

    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = writer.send(Message::text(text)).await {
                        let _ = events.send(TransportEvent::Error { attempt, reason: e.to_string() });
                        break;
                    }
                }
                None => {
                    trace!(attempt, "closing socket");
                    let _ = writer.close().await;
                    break;
                }
            },
            inbound = reader.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let event = TransportEvent::Message { attempt, text };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(attempt, ?frame, "server closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error { attempt, reason: e.to_string() });
                    break;
                }
                None => break,
            },
        }
    }

    let _ = events.send(TransportEvent::Closed { attempt });
}

// ── Tests ────────────────────────────────────────────────────────
