//! Tidal integration test harness.
//!
//! Tests in this crate run the real server and client over UDP on
//! 127.0.0.1:
//!
//!   cargo test --test integration
//!
//! Every server binds an ephemeral port and serves its own library
//! directory under the system temp dir, so tests run in parallel without
//! interfering with each other.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tidal_core::config::TidalConfig;
use tidal_core::wav::canonical_header;
use tidal_core::AudioFormat;
use tidal_stream::{new_session_table, SessionTable, StreamServer};

mod failures;
mod streaming;

// ── Harness ───────────────────────────────────────────────────────────────────

static NEXT_LIBRARY: AtomicUsize = AtomicUsize::new(0);

/// A running server with its own library directory.
pub struct Harness {
    pub addr: SocketAddr,
    pub library: PathBuf,
    pub sessions: SessionTable,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl Harness {
    /// Start a server whose sessions give up after `deadline` of silence.
    pub async fn start(deadline: Duration) -> Result<Self> {
        let library = std::env::temp_dir().join(format!(
            "tidal-it-{}-{}",
            std::process::id(),
            NEXT_LIBRARY.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&library)
            .with_context(|| format!("failed to create {}", library.display()))?;

        let mut config = TidalConfig::default();
        config.network.bind = "127.0.0.1".parse()?;
        config.network.port = 0;
        config.stream.deadline_ms = deadline.as_millis() as u64;
        config.library.root = library.clone();

        let socket = Arc::new(
            UdpSocket::bind(config.bind_addr())
                .await
                .context("failed to bind server socket")?,
        );
        let addr = socket.local_addr()?;
        let sessions = new_session_table();
        let (shutdown, _) = broadcast::channel(1);
        let server = StreamServer::new(socket, sessions.clone(), config, shutdown.subscribe());
        let task = tokio::spawn(server.run());

        Ok(Self {
            addr,
            library,
            sessions,
            shutdown,
            task,
        })
    }

    /// Put a WAV file into the library.
    pub fn add_wav(&self, name: &str, format: &AudioFormat, pcm: &[u8]) -> Vec<u8> {
        let file = wav_bytes(format, pcm);
        std::fs::write(self.library.join(name), &file).expect("write test wav");
        file
    }

    pub fn add_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.library.join(name);
        std::fs::write(&path, contents).expect("write test file");
        path
    }

    /// Wait until the session table drains, or give up after `limit`.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.sessions.is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sessions.is_empty()
    }

    /// Signal shutdown, wait for the listener and remove the library.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
        let _ = std::fs::remove_dir_all(&self.library);
    }
}

/// A complete canonical WAV file.
pub fn wav_bytes(format: &AudioFormat, pcm: &[u8]) -> Vec<u8> {
    let mut file = canonical_header(format, pcm.len() as u32).expect("format fits a WAV header");
    file.extend_from_slice(pcm);
    file
}

/// Deterministic, non-repeating-looking test audio.
pub fn pcm(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

pub fn cd() -> AudioFormat {
    AudioFormat::new(44_100, 16, 2).expect("cd format")
}
