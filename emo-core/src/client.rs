//! Live session runtime.
//!
//! [`LiveClient::spawn`] starts a single Tokio task that owns the
//! [`SessionController`], the current socket and the reconnect timer.
//! Every mutation happens inside that task, one event at a time. Consumers
//! talk to it through a cloneable [`LiveHandle`] and observe it through a
//! `watch` channel of [`SessionView`] snapshots.
//!
//! ```text
//!  LiveHandle ──commands──►┐
//!                          ├──► runtime task ──► SessionController
//!  sockets / timer ─events─┘         │
//!                                    └──► watch<SessionView> ──► consumers
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::capture::EncodedImage;
use crate::credential::CredentialProvider;
use crate::error::EmoError;
use crate::network::connection::{
    DEFAULT_HANDSHAKE_TIMEOUT, EventSender, SocketHandle, validate_url,
};
use crate::state::connection::{
    DEFAULT_MAX_ATTEMPTS, TransportConfig, TransportEffect, TransportEvent,
};
use crate::state::session::{FrameDecision, SessionController, SessionView};

/// Default backend endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws/emotion";

// ── ClientConfig ─────────────────────────────────────────────────

/// Configuration for [`LiveClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the emotion backend.
    pub url: String,
    /// Delay strategy between reconnect attempts.
    pub backoff: Backoff,
    /// Ceiling for automatic reconnect attempts.
    pub max_attempts: u32,
    /// Time allowed for a single dial before it counts as failed.
    pub handshake_timeout: Duration,
    /// Connect as soon as the runtime starts.
    pub auto_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            backoff: Backoff::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            auto_connect: true,
        }
    }
}

impl ClientConfig {
    fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Reset,
    Frame(EncodedImage),
    Shutdown,
}

// ── LiveHandle ───────────────────────────────────────────────────

/// Cloneable handle to a running session.
///
/// All commands are non-blocking and may be issued from inside callbacks.
/// The runtime ends on [`shutdown`](Self::shutdown) or when every handle
/// has been dropped.
#[derive(Debug, Clone)]
pub struct LiveHandle {
    commands: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<SessionView>,
}

impl LiveHandle {
    /// Connect (no-op while open or connecting).
    pub fn connect(&self) -> Result<(), EmoError> {
        self.command(Command::Connect)
    }

    /// Disconnect and stop reconnecting.
    pub fn disconnect(&self) -> Result<(), EmoError> {
        self.command(Command::Disconnect)
    }

    /// Clear the prediction state; the connection is untouched.
    pub fn reset(&self) -> Result<(), EmoError> {
        self.command(Command::Reset)
    }

    /// Offer a frame to the send gate.
    pub fn send_frame(&self, image: EncodedImage) -> Result<(), EmoError> {
        self.command(Command::Frame(image))
    }

    /// Stop the runtime. Closes the socket and cancels pending retries.
    pub fn shutdown(&self) -> Result<(), EmoError> {
        self.command(Command::Shutdown)
    }

    /// Subscribe to session snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Latest session snapshot.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// Wait until a snapshot satisfies `pred`.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, EmoError> {
        let mut rx = self.view_rx.clone();
        let view = rx
            .wait_for(|view| pred(view))
            .await
            .map_err(|_| EmoError::RuntimeClosed)?;
        Ok(view.clone())
    }

    /// Wait until the runtime task has ended.
    pub async fn closed(&self) {
        let mut rx = self.view_rx.clone();
        while rx.changed().await.is_ok() {}
    }

    fn command(&self, command: Command) -> Result<(), EmoError> {
        Ok(self.commands.send(command)?)
    }
}

// ── LiveClient ───────────────────────────────────────────────────

/// Entry point for starting a live session.
pub struct LiveClient;

impl LiveClient {
    /// Spawn the session runtime on the current Tokio runtime.
    pub fn spawn(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<LiveHandle, EmoError> {
        validate_url(&config.url)?;

        let session = SessionController::new(config.transport(), credentials);
        let (view_tx, view_rx) = watch::channel(session.view());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let runtime = Runtime {
            url: config.url,
            handshake_timeout: config.handshake_timeout,
            session,
            socket: None,
            retry: None,
            events_tx,
            view_tx,
        };
        tokio::spawn(runtime.run(config.auto_connect, cmd_rx, events_rx));

        Ok(LiveHandle {
            commands: cmd_tx,
            view_rx,
        })
    }
}

// ── Runtime ──────────────────────────────────────────────────────

struct Runtime {
    url: String,
    handshake_timeout: Duration,
    session: SessionController,
    socket: Option<SocketHandle>,
    retry: Option<JoinHandle<()>>,
    events_tx: EventSender,
    view_tx: watch::Sender<SessionView>,
}

impl Runtime {
    async fn run(
        mut self,
        auto_connect: bool,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!(url = %self.url, "live session started");
        if auto_connect {
            let effects = self.session.connect();
            self.execute(effects);
            self.publish();
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = events.recv() => {
                    let effects = self.session.apply(event);
                    self.execute(effects);
                }
            }
            self.publish();
        }

        self.teardown();
        info!("live session stopped");
    }

    fn on_command(&mut self, command: Command) {
        let effects = match command {
            Command::Connect => self.session.connect(),
            Command::Disconnect => self.session.disconnect(),
            Command::Reset => {
                self.session.reset();
                Vec::new()
            }
            Command::Frame(image) => match self.session.on_frame(image) {
                FrameDecision::Sent(effect) => vec![effect],
                FrameDecision::Dropped(reason) => {
                    trace!(%reason, "frame not sent");
                    Vec::new()
                }
            },
            Command::Shutdown => Vec::new(),
        };
        self.execute(effects);
    }

    fn execute(&mut self, effects: Vec<TransportEffect>) {
        for effect in effects {
            match effect {
                TransportEffect::OpenSocket { attempt } => {
                    debug!(attempt, "opening socket");
                    self.socket = Some(SocketHandle::open(
                        &self.url,
                        attempt,
                        self.handshake_timeout,
                        self.events_tx.clone(),
                    ));
                }
                TransportEffect::CloseSocket { attempt } => {
                    if let Some(socket) = self.socket.take_if(|s| s.attempt() == attempt) {
                        socket.close();
                    }
                }
                TransportEffect::ScheduleRetry { delay } => {
                    self.cancel_retry();
                    let tx = self.events_tx.clone();
                    self.retry = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(TransportEvent::RetryElapsed);
                    }));
                }
                TransportEffect::CancelRetry => self.cancel_retry(),
                TransportEffect::Transmit { attempt, text } => match &self.socket {
                    Some(socket) if socket.attempt() == attempt => {
                        if let Err(e) = socket.send(text) {
                            warn!(attempt, "transmit failed: {e}");
                        }
                    }
                    _ => warn!(attempt, "transmit for a socket that is gone"),
                },
                TransportEffect::Deliver(message) => self.session.on_inbound(message),
            }
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.abort();
        }
    }

    fn publish(&self) {
        let view = self.session.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn teardown(&mut self) {
        self.cancel_retry();
        let effects = self.session.disconnect();
        self.execute(effects);
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.publish();
    }
}

// ── Tests ────────────────────────────────────────────────────────
