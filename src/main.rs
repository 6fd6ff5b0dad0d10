//! # relay
//!
//! Relay server binary: loads settings, initialises logging and metrics,
//! and serves the chat and feed endpoints until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{LogFormat, RelaySettings};

/// WebSocket chat relay and orderbook feed server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "WebSocket chat relay and orderbook feed server")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Deliver chat messages back to their sender.
    #[arg(long)]
    echo_to_sender: bool,

    /// Log output format: `json` or `pretty`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.echo_to_sender {
            settings.chat.echo_to_sender = true;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings =
        relay_settings::load_settings(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    relay_logging::init_logging(&settings.logging).context("Failed to initialise logging")?;
    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let server = RelayServer::new(config, metrics);

    let (addr, mut handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "relay listening on ws://{addr} (chat {}, feed {})",
        server.config().chat_path,
        server.config().feed_path
    );

    let server_exited = tokio::select! {
        result = shutdown_signal() => {
            result?;
            tracing::info!("Shutting down...");
            false
        }
        _ = &mut handle => {
            tracing::warn!("server task exited unexpectedly");
            true
        }
    };

    let pending = if server_exited { Vec::new() } else { vec![handle] };
    let clean = server
        .shutdown()
        .graceful_shutdown(pending, Some(shutdown_timeout))
        .await;
    if clean {
        tracing::info!("Shutdown complete");
    }
    Ok(())
}
