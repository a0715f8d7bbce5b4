//! Grass CLI
//!
//! Reads account identities (and optionally proxies) from newline-delimited
//! files, then keeps one WebSocket session alive per (identity, route) pair
//! until interrupted.

use clap::Parser;
use grass_core::events::StdoutEventSink;
use grass_core::{
    kilobytes, ClientConfig, CoreError, HttpRouteValidator, Mode, Supervisor, WsConnector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod inputs;

/// Grass - long-lived authenticated WebSocket sessions per account and route
///
/// Without `--proxies` every identity connects directly. With it, each
/// identity connects once through every proxy that passes validation.
#[derive(Parser, Debug)]
#[command(name = "grass")]
#[command(version, about, long_about = None)]
struct Args {
    /// File with one identity per line
    #[arg(short, long, env = "GRASS_USER_IDS", default_value = "userid.txt")]
    user_ids: PathBuf,

    /// File with one proxy address per line (enables proxy mode)
    #[arg(short, long, env = "GRASS_PROXIES")]
    proxies: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, env = "GRASS_FORMAT", default_value = "text")]
    format: OutputFormat,

    /// WebSocket endpoint
    #[arg(long, env = "GRASS_WS_URL", default_value = grass_core::config::defaults::DEFAULT_WEBSOCKET_URL)]
    ws_url: String,

    /// IP-metadata endpoint used to validate proxies
    #[arg(long, env = "GRASS_IP_CHECK_URL", default_value = grass_core::config::defaults::DEFAULT_IP_CHECK_URL)]
    ip_check_url: String,

    /// Seconds between keep-alive pings
    #[arg(long, env = "GRASS_KEEP_ALIVE_SECS", default_value_t = grass_core::config::defaults::DEFAULT_KEEP_ALIVE_SECS)]
    keep_alive_secs: u64,

    /// Seconds to wait before reconnecting
    #[arg(long, env = "GRASS_RETRY_SECS", default_value_t = grass_core::config::defaults::DEFAULT_RETRY_DELAY_SECS)]
    retry_secs: u64,

    /// Maximum random delay before each connect, in milliseconds
    #[arg(long, env = "GRASS_JITTER_MS", default_value_t = grass_core::config::defaults::DEFAULT_CONNECT_JITTER_MS)]
    jitter_ms: u64,

    /// Connect timeout for proxy validation, in seconds
    #[arg(long, env = "GRASS_VALIDATION_TIMEOUT_SECS", default_value_t = grass_core::config::defaults::DEFAULT_VALIDATION_TIMEOUT_SECS)]
    validation_timeout_secs: u64,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig::new()
            .with_websocket_url(&self.ws_url)
            .with_ip_check_url(&self.ip_check_url)
            .with_keep_alive_interval(Duration::from_secs(self.keep_alive_secs))
            .with_retry_delay(Duration::from_secs(self.retry_secs))
            .with_connect_jitter(Duration::from_millis(self.jitter_ms))
            .with_validation_timeout(Duration::from_secs(self.validation_timeout_secs))
    }

    fn mode(&self) -> Result<Mode, CoreError> {
        match &self.proxies {
            Some(path) => Ok(Mode::Proxy(inputs::load_proxies(path)?)),
            None => Ok(Mode::Direct),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CoreError> {
    let config = args.client_config();
    config.validate()?;

    let identities = inputs::load_identities(&args.user_ids)?;
    let mode = args.mode()?;

    let json_output = matches!(args.format, OutputFormat::Json);
    let sink = Arc::new(StdoutEventSink::new(json_output));
    let connector = Arc::new(WsConnector::from_config(&config)?);
    let validator = Arc::new(HttpRouteValidator::from_config(&config));

    tracing::info!(
        "Starting {} identities in {} mode against {}",
        identities.len(),
        match mode {
            Mode::Direct => "direct",
            Mode::Proxy(_) => "proxy",
        },
        config.websocket_url
    );

    let supervisor = Supervisor::new(config, connector, validator, sink);
    let handle = supervisor.start(&identities, &mode).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, stopping {} sessions", handle.len());

    for (identity, bytes) in handle.usage().snapshot() {
        tracing::info!("{}: {} KB received", identity, kilobytes(bytes));
    }
    handle.shutdown().await;
    Ok(())
}
