//! Terminal client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use emo_core::{Backoff, CaptureConfig, ClientConfig, DEFAULT_URL, EncoderConfig};

/// Top-level configuration for the terminal client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Backend endpoints and reconnect policy.
    pub network: NetworkConfig,
    /// Frame sampling and encoding.
    pub capture: CaptureSettings,
    /// Credentials.
    pub auth: AuthConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Delay strategy between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Constant interval.
    #[default]
    Fixed,
    /// Doubling interval, capped at `max_reconnect_interval_ms`.
    Exponential,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket endpoint for live predictions.
    pub ws_url: String,
    /// Base URL of the REST API.
    pub api_base_url: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_interval_ms: u64,
    /// Upper bound for exponential backoff.
    pub max_reconnect_interval_ms: u64,
    /// Reconnect ceiling.
    pub max_reconnect_attempts: u32,
    /// Time allowed for one connection attempt.
    pub handshake_timeout_ms: u64,
    pub backoff: BackoffKind,
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Time between frames.
    pub interval_ms: u64,
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1–100.
    pub quality: u8,
}

/// Credentials. A token wins over username/password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: String,
    pub username: String,
    pub password: String,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_URL.into(),
            api_base_url: "http://localhost:8000/api".into(),
            reconnect_interval_ms: 3000,
            max_reconnect_interval_ms: 30_000,
            max_reconnect_attempts: 5,
            handshake_timeout_ms: 10_000,
            backoff: BackoffKind::Fixed,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let encoder = EncoderConfig::default();
        Self {
            interval_ms: 1000,
            width: encoder.width,
            height: encoder.height,
            quality: encoder.quality,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl LiveConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    // ── Conversions ──────────────────────────────────────────────

    /// Session runtime settings.
    pub fn client_config(&self) -> ClientConfig {
        let base = Duration::from_millis(self.network.reconnect_interval_ms);
        let backoff = match self.network.backoff {
            BackoffKind::Fixed => Backoff::Fixed { delay: base },
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(self.network.max_reconnect_interval_ms).max(base),
            },
        };
        ClientConfig {
            url: self.network.ws_url.clone(),
            backoff,
            max_attempts: self.network.max_reconnect_attempts,
            handshake_timeout: Duration::from_millis(self.network.handshake_timeout_ms.max(1)),
            auto_connect: true,
        }
    }

    /// Capture loop settings.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            interval: Duration::from_millis(self.capture.interval_ms.max(1)),
            encoder: EncoderConfig {
                width: self.capture.width,
                height: self.capture.height,
                quality: self.capture.quality,
            },
            ..CaptureConfig::default()
        }
    }

    /// Configured bearer token, if non-empty.
    pub fn token(&self) -> Option<&str> {
        Some(self.auth.token.as_str()).filter(|t| !t.is_empty())
    }

    /// Configured login, if both fields are set.
    pub fn login(&self) -> Option<(&str, &str)> {
        let AuthConfig {
            username, password, ..
        } = &self.auth;
        (!username.is_empty() && !password.is_empty())
            .then_some((username.as_str(), password.as_str()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
