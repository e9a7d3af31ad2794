//! tidal-play: request a file from a tidald server and play it out.
//!
//! Raw PCM goes to stdout unless `--output` names a WAV file, so the usual
//! use is piping into a player:
//!
//!   tidal-play host song.wav | aplay -f cd

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tidal_core::config::TidalConfig;
use tidal_stream::{play, resolve, AudioSink, Playback, RawSink, UdpLink, WavSink};

#[derive(Parser)]
#[command(name = "tidal-play")]
#[command(about = "Stream an audio file from a tidald server")]
struct Args {
    /// Server host name or address
    host: String,

    /// File to request, relative to the server's library root
    filename: String,

    /// Server UDP port (defaults to the configured port, 1234)
    #[arg(long)]
    port: Option<u16>,

    /// Write a WAV file instead of raw PCM on stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries audio.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = TidalConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TidalConfig::default()
    });
    let port = args.port.unwrap_or(config.network.port);

    let server = resolve(&args.host, port)
        .await
        .with_context(|| format!("failed to resolve {}:{port}", args.host))?;
    let mut link = UdpLink::open(server)
        .await
        .context("failed to open client socket")?;
    tracing::debug!(%server, local = %link.local_addr()?, "socket ready");

    let playback = match &args.output {
        Some(path) => {
            let mut sink = WavSink::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            receive_into(&mut link, &args.filename, &mut sink, &config).await?
        }
        None => {
            let mut sink = RawSink::new(tokio::io::stdout());
            receive_into(&mut link, &args.filename, &mut sink, &config).await?
        }
    };

    tracing::info!(
        format = %playback.format,
        chunks = playback.report.chunks,
        bytes = playback.report.bytes,
        duplicates = playback.report.duplicates,
        "playback complete"
    );
    Ok(())
}

async fn receive_into<K: AudioSink>(
    link: &mut UdpLink,
    filename: &str,
    sink: &mut K,
    config: &TidalConfig,
) -> Result<Playback> {
    play(link, filename, sink, &config.supervisor())
        .await
        .with_context(|| format!("failed to stream {filename}"))
}
