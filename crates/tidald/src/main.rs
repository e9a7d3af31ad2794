//! tidald: Tidal audio streaming daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;

use tidal_core::config::TidalConfig;
use tidal_stream::{new_session_table, StreamServer};

#[derive(Parser)]
#[command(name = "tidald")]
#[command(about = "Stream WAV files to tidal-play clients over UDP")]
struct Args {
    /// Config file (defaults to $TIDAL_CONFIG or ~/.config/tidal/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// UDP port for requests and streaming
    #[arg(long)]
    port: Option<u16>,

    /// Directory requested files are resolved against
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TidalConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            if let Err(e) = TidalConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            TidalConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                TidalConfig::default()
            })
        }
    };
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(root) = args.root {
        config.library.root = root;
    }

    let addr = config.bind_addr();
    let socket = Arc::new(
        UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?,
    );
    tracing::info!(
        %addr,
        root = %config.library.root.display(),
        transfer_unit = config.stream.transfer_unit,
        deadline_ms = config.stream.deadline_ms,
        max_sessions = config.network.max_sessions,
        "tidald starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    StreamServer::new(socket, new_session_table(), config, shutdown_tx.subscribe())
        .run()
        .await
        .context("stream server failed")?;

    Ok(())
}
