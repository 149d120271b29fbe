//! # livecast
//!
//! Live chunk relay binary. Loads configuration, installs logging and serves
//! the WebSocket relay until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livecast_server::ServerConfig;
use livecast_telemetry::{init_telemetry, TelemetryConfig};

/// Live media chunk relay.
#[derive(Parser, Debug)]
#[command(name = "livecast", about = "Live media chunk relay")]
struct Cli {
    /// JSON config file. Missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config and environment).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign.
    #[arg(long)]
    port: Option<u16>,

    /// Allowed CORS origin, or `*`.
    #[arg(long)]
    cors_origin: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(origin) = self.cors_origin {
            config.cors_origin = origin;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.log_json {
            config.log_json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = livecast_server::load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let log_level = config
        .log_level
        .parse::<tracing::Level>()
        .with_context(|| format!("Invalid log level: {}", config.log_level))?;
    let telemetry = init_telemetry(TelemetryConfig {
        log_level,
        json: config.log_json,
        ..Default::default()
    });

    let handle = livecast_server::start(config, telemetry.metrics())
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port(), "Livecast relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!(
        streams = handle.engine().store().len(),
        clients = handle.client_count(),
        "Shutting down"
    );
    handle.shutdown();
    Ok(())
}
