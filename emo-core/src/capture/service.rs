//! The periodic capture loop.
//!
//! Runs in its own Tokio task:
//!
//! 1. Wait for the next tick (missed ticks are skipped, not bunched).
//! 2. Skip the tick if the source has no active stream.
//! 3. Grab a frame; optionally ask the [`PresenceFilter`] about it.
//! 4. Encode with [`FrameEncoder`] on the blocking pool and hand the result
//!    to `on_frame`.
//!
//! The loop owns the source. Stopping, dropping the [`CaptureLoop`], or
//! aborting the runtime all end the task and drop the source with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::capture::encoder::{EncoderConfig, FrameEncoder};
use crate::capture::types::{EncodedImage, FrameSource, PresenceFilter};

// ── CaptureConfig ────────────────────────────────────────────────

/// Shortest accepted tick interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for [`CaptureLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Time between capture ticks. Raised to [`MIN_INTERVAL`] if shorter.
    pub interval: Duration,
    /// Output encoding.
    pub encoder: EncoderConfig,
    /// Upper bound for a single presence check.
    pub presence_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            encoder: EncoderConfig::default(),
            presence_timeout: Duration::from_millis(500),
        }
    }
}

// ── CaptureStats ─────────────────────────────────────────────────

/// Counters published after every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Ticks elapsed since start.
    pub ticks: u64,
    /// Ticks skipped because the source was not streaming.
    pub idle: u64,
    /// Ticks vetoed by the presence filter.
    pub vetoed: u64,
    /// Ticks lost to grab or encode failures.
    pub failed: u64,
    /// Frames handed to `on_frame`.
    pub offered: u64,
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Handle to a running capture loop.
///
/// # Lifetime
///
/// The loop runs until [`stop`](Self::stop) is called or the handle is
/// dropped. Both are idempotent and may be called from any task,
/// including from inside `on_frame` via [`cancel_token`](Self::cancel_token).
pub struct CaptureLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stats_rx: watch::Receiver<CaptureStats>,
}

impl CaptureLoop {
    /// Start sampling `source` without a presence filter.
    pub fn start<S, F>(source: S, config: CaptureConfig, on_frame: F) -> Self
    where
        S: FrameSource,
        F: FnMut(EncodedImage) + Send + 'static,
    {
        Self::start_filtered(source, config, None, on_frame)
    }

    /// Start sampling `source`, consulting `filter` before each encode.
    pub fn start_filtered<S, F>(
        source: S,
        mut config: CaptureConfig,
        filter: Option<Arc<dyn PresenceFilter>>,
        on_frame: F,
    ) -> Self
    where
        S: FrameSource,
        F: FnMut(EncodedImage) + Send + 'static,
    {
        if config.interval < MIN_INTERVAL {
            warn!(
                interval = ?config.interval,
                "capture interval too short; using {MIN_INTERVAL:?}"
            );
            config.interval = MIN_INTERVAL;
        }

        let cancel = CancellationToken::new();
        let (stats_tx, stats_rx) = watch::channel(CaptureStats::default());

        info!(interval = ?config.interval, "capture loop started");
        let handle = tokio::spawn(run(
            source,
            config,
            filter,
            on_frame,
            cancel.clone(),
            stats_tx,
        ));

        Self {
            cancel,
            handle: Some(handle),
            stats_rx,
        }
    }

    /// Signal the loop to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the loop and wait until the task (and the source) are gone.
    pub async fn join(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// A token that stops this loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the loop is still sampling.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Obtain a receiver for the loop counters.
    pub fn stats_receiver(&self) -> watch::Receiver<CaptureStats> {
        self.stats_rx.clone()
    }

    /// Latest counters.
    pub fn stats(&self) -> CaptureStats {
        self.stats_rx.borrow().clone()
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<S, F>(
    mut source: S,
    config: CaptureConfig,
    filter: Option<Arc<dyn PresenceFilter>>,
    mut on_frame: F,
    cancel: CancellationToken,
    stats_tx: watch::Sender<CaptureStats>,
) where
    S: FrameSource,
    F: FnMut(EncodedImage) + Send + 'static,
{
    let mut encoder = FrameEncoder::new(config.encoder);
    let mut stats = CaptureStats::default();
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + config.interval,
        config.interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        stats.ticks += 1;

        if !source.is_streaming() {
            stats.idle += 1;
            stats_tx.send_replace(stats.clone());
            continue;
        }

        let frame = match source.grab() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("frame grab failed: {e}");
                stats.failed += 1;
                stats_tx.send_replace(stats.clone());
                continue;
            }
        };

        if let Some(filter) = &filter {
            let present = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(config.presence_timeout, filter.is_present(&frame)) => {
                    result.unwrap_or_else(|_| {
                        debug!("presence check timed out");
                        false
                    })
                }
            };
            if !present {
                trace!("tick vetoed by presence filter");
                stats.vetoed += 1;
                stats_tx.send_replace(stats.clone());
                continue;
            }
        }

        // Resize and JPEG compression are CPU-bound.
        let job = tokio::task::spawn_blocking(move || {
            let result = encoder.encode(&frame);
            (encoder, result)
        });
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            joined = job => match joined {
                Ok((returned, result)) => {
                    encoder = returned;
                    result
                }
                Err(e) => {
                    warn!("encode task failed: {e}");
                    encoder = FrameEncoder::new(config.encoder);
                    stats.failed += 1;
                    stats_tx.send_replace(stats.clone());
                    continue;
                }
            },
        };

        match result {
            Ok(image) => {
                trace!(bytes = image.len(), "frame captured");
                stats.offered += 1;
                on_frame(image);
            }
            Err(e) => {
                warn!("frame encode failed: {e}");
                stats.failed += 1;
            }
        }
        stats_tx.send_replace(stats.clone());
    }

    drop(source);
    info!(
        ticks = stats.ticks,
        offered = stats.offered,
        "capture loop stopped"
    );
}

// ── Tests ────────────────────────────────────────────────────────
