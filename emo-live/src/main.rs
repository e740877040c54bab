//! emo-live — entry point.
//!
//! ```text
//! emo-live --source <dir>          Stream images from a directory
//! emo-live predict <image>         Classify one image over REST
//! emo-live login                   Log in and print the access token
//! emo-live --config <path>         Use custom config TOML
//! emo-live --gen-config            Write the default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use emo_core::{CaptureLoop, LiveClient, SessionView, SharedToken};

use emo_live::api::ApiClient;
use emo_live::config::LiveConfig;
use emo_live::source::ImageFileSource;
use emo_live::status::{banner, emotion_emoji, prediction_line};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "emo-live", about = "Live facial-emotion detection client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "emo-live.toml")]
    config: PathBuf,

    /// WebSocket endpoint (overrides config).
    #[arg(long)]
    url: Option<String>,

    /// REST API base URL (overrides config).
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token (overrides config).
    #[arg(short, long)]
    token: Option<String>,

    /// Image file or directory to stream frames from.
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Write the default configuration to `--config` and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Stream frames and print predictions (default).
    Live,
    /// Classify a single image over REST.
    Predict { image: PathBuf },
    /// Log in with the configured username/password and print the token.
    Login,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        LiveConfig::write_default(&cli.config)?;
        println!("wrote default config to {}", cli.config.display());
        return Ok(());
    }

    let mut config = LiveConfig::load(&cli.config);
    if let Some(url) = cli.url {
        config.network.ws_url = url;
    }
    if let Some(url) = cli.api_url {
        config.network.api_base_url = url;
    }
    if let Some(token) = cli.token {
        config.auth.token = token;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("emo-live v{}", env!("CARGO_PKG_VERSION"));

    let credentials = Arc::new(SharedToken::new());
    let api = ApiClient::new(config.network.api_base_url.clone(), credentials.clone());

    match cli.command.unwrap_or(Mode::Live) {
        Mode::Login => {
            let (username, password) = config
                .login()
                .ok_or("login needs auth.username and auth.password in the config")?;
            let auth = api.login(username, password).await?;
            println!("{}", auth.access_token);
        }
        Mode::Predict { image } => {
            authenticate(&config, &api, &credentials).await?;
            let result = api.predict(&image).await?;
            println!(
                "{} {} {:.1}%",
                emotion_emoji(&result.emotion),
                result.emotion,
                result.confidence * 100.0
            );
            if let Some(model) = result.model_version {
                println!("model: {model}");
            }
            if let Some(ms) = result.processing_time_ms {
                println!("processing: {ms:.0} ms");
            }
        }
        Mode::Live => {
            let path = cli
                .source
                .ok_or("live mode needs --source <image or directory>")?;
            authenticate(&config, &api, &credentials).await?;
            run_live(&config, path, credentials).await?;
        }
    }

    Ok(())
}

/// Fill `credentials` from the config, logging in if only a password is set.
async fn authenticate(
    config: &LiveConfig,
    api: &ApiClient,
    credentials: &SharedToken,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(token) = config.token() {
        credentials.set(Some(token.to_string()));
    } else if let Some((username, password)) = config.login() {
        let auth = api.login(username, password).await?;
        credentials.set(Some(auth.access_token));
    } else {
        warn!("no credentials configured; frames will not be sent");
    }
    Ok(())
}

async fn run_live(
    config: &LiveConfig,
    path: PathBuf,
    credentials: Arc<SharedToken>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = ImageFileSource::open(&path)?;

    // ── 1. Start the session ────────────────────────────────────

    let handle = LiveClient::spawn(config.client_config(), credentials)?;

    // ── 2. Start capturing ──────────────────────────────────────

    let frames = handle.clone();
    let mut capture = CaptureLoop::start(source, config.capture_config(), move |image| {
        if let Err(e) = frames.send_frame(image) {
            debug!("frame not queued: {e}");
        }
    });

    // ── 3. Report until interrupted ─────────────────────────────

    let mut views = handle.subscribe();
    let mut report = Reporter::default();
    report.update(&views.borrow_and_update().clone());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                report.update(&view);
            }
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    capture.join().await;
    let stats = capture.stats();
    let _ = handle.shutdown();
    handle.closed().await;
    info!(
        ticks = stats.ticks,
        offered = stats.offered,
        sent = handle.view().frames_sent,
        "done"
    );
    Ok(())
}

/// Logs banner and prediction lines when they change.
#[derive(Default)]
struct Reporter {
    banner: Option<String>,
    prediction: Option<String>,
    backend_error: Option<String>,
}

impl Reporter {
    fn update(&mut self, view: &SessionView) {
        let next = banner(view);
        if next != self.banner {
            if let Some(text) = &next {
                info!("{text}");
            }
            self.banner = next;
        }

        let next = prediction_line(view);
        if next != self.prediction {
            if let Some(text) = &next {
                info!("{text}");
            }
            self.prediction = next;
        }

        if view.last_backend_error != self.backend_error {
            if let Some(message) = &view.last_backend_error {
                warn!("backend: {message}");
            }
            self.backend_error = view.last_backend_error.clone();
        }
    }
}
