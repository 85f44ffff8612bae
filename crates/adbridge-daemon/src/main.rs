//! adbridge daemon - main entry point
//!
//! Serves locally attached devices to remote clients: device info over
//! HTTP, the live device list and per-service byte channels over WebSocket.

mod api;
mod config;
mod credential;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "adbridge")]
#[command(about = "Bridge local devices to HTTP and WebSocket clients")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "adbridge.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("adbridge v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        devices = config.loopback_devices.len(),
        high_water_mark = config.bridge.high_water_mark,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone()).await?;

    server::run(state, &config.daemon.bind, config.daemon.tls.as_ref()).await
}
