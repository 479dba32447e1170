//! phonebridge - relay a desktop AI chat to phone browsers.
//!
//! ```bash
//! # Run with defaults (listens on 0.0.0.0:8000)
//! phonebridge
//!
//! # Custom port and data directory, verbose logs
//! phonebridge --port 9000 --data-dir /tmp/bridge --verbose
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use phonebridge::bridge::ChatBridge;
use phonebridge::bus::SessionRegistry;
use phonebridge::extract::{NoiseClassifier, NoiseRules, QueueSource};
use phonebridge::history::HistoryLog;
use phonebridge::inject::{CommandSink, SinkChain, SocketSink};
use phonebridge::server::{start_server, AppState};
use phonebridge::settings;

#[derive(Parser, Debug)]
#[command(name = "phonebridge", about = "Bridge a desktop AI chat to phone browsers")]
struct Args {
    /// Path to settings.toml (defaults to ~/.phonebridge/settings.toml)
    #[arg(long, env = "PHONEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port from settings
    #[arg(short, long, env = "PHONEBRIDGE_PORT")]
    port: Option<u16>,

    /// Override the data directory (history log, rotated logs)
    #[arg(long, env = "PHONEBRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = settings::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(data_dir) = &args.data_dir {
        settings.history.data_dir = Some(data_dir.clone());
    }

    let data_dir = settings
        .history
        .data_dir
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".phonebridge")))
        .context("cannot determine data directory")?;

    let log_level = if args.verbose { "debug" } else { "info" };
    let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "phonebridge.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("phonebridge={log_level}").parse()?),
        )
        .with_writer(file_writer.and(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");

    let noise = match &settings.noise.rules_path {
        Some(path) => NoiseRules::from_path(path)
            .with_context(|| format!("loading noise rules from {}", path.display()))?,
        None => NoiseRules::embedded(),
    };

    let source = Arc::new(QueueSource::new());
    let socket_sink = Arc::new(SocketSink::new());

    let mut injector = SinkChain::new(Duration::from_millis(settings.injection.timeout_ms));
    injector.push(socket_sink.clone());
    if !settings.injection.fallback_command.is_empty() {
        injector.push(Arc::new(CommandSink::new(
            settings.injection.fallback_command.clone(),
            settings.injection.fallback_args.clone(),
        )));
    }

    let registry = Arc::new(SessionRegistry::new(settings.server.max_sessions));
    let history = HistoryLog::open(&data_dir).await?;

    let bridge = Arc::new(ChatBridge::new(
        &settings,
        source.clone(),
        NoiseClassifier::new(noise),
        registry,
        history,
        injector,
    ));

    let shutdown = CancellationToken::new();
    let state = AppState {
        bridge: bridge.clone(),
        source,
        socket_sink,
        replay_limit: settings.history.replay_limit,
        shutdown: shutdown.clone(),
    };

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            ctrl_c_shutdown.cancel();
        }
    });

    start_server(&settings, state).await?;
    bridge.stop_polling();
    Ok(())
}
