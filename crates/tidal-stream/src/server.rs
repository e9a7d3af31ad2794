//! Stream server: one listening socket, one task per client.
//!
//! The listener reads every datagram on the shared socket. A request from
//! an address with no session starts one; anything from an address that
//! has a session is routed to that session's inbox. Sessions remove
//! themselves from the table when they end, whatever the outcome.

use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};

use tidal_core::config::TidalConfig;
use tidal_core::wire::{Datagram, MAX_DATAGRAM};
use tidal_core::{Pacing, Session, StreamError, Supervisor};

use crate::link::{DatagramLink, SessionLink};
use crate::negotiate::negotiate;
use crate::source::{open_wav, AudioSource};
use crate::transmit::{transmit, TransmitReport};

/// Active sessions keyed by client address.
pub type SessionTable = Arc<DashMap<SocketAddr, mpsc::Sender<Bytes>>>;

pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

/// Serve one already-opened source over `link`: negotiate, then transmit.
pub async fn serve<L: DatagramLink, S: AudioSource>(
    link: &mut L,
    source: &mut S,
    transfer_unit: usize,
    slack: f64,
    supervisor: &Supervisor,
) -> Result<TransmitReport, StreamError> {
    let format = source.format();
    let pacing = Pacing::new(&format, transfer_unit, slack)?;
    let mut session = Session::serving(link.peer(), format, pacing);
    tracing::debug!(
        peer = %link.peer(),
        %format,
        interval_us = pacing.interval().as_micros() as u64,
        "negotiating"
    );

    let attempts = negotiate(link, &mut session, format, pacing.interval(), supervisor).await?;
    tracing::debug!(peer = %link.peer(), attempts, "header acknowledged");

    transmit(link, source, &mut session, &pacing, supervisor).await
}

// ── Library ──────────────────────────────────────────────────────────────────

/// The directory requested filenames are resolved against.
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a requested name to a path inside the library. Absolute paths
    /// and any `..` component are refused.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, LibraryError> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(LibraryError::OutsideLibrary(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("{0:?} escapes the library root")]
    OutsideLibrary(String),
}

// ── Listener ─────────────────────────────────────────────────────────────────

pub struct StreamServer {
    socket: Arc<UdpSocket>,
    sessions: SessionTable,
    library: Library,
    config: Arc<TidalConfig>,
    shutdown: broadcast::Receiver<()>,
}

impl StreamServer {
    pub fn new(
        socket: Arc<UdpSocket>,
        sessions: SessionTable,
        config: TidalConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            sessions,
            library: Library::new(config.library.root.clone()),
            config: Arc::new(config),
            shutdown,
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let addr = self.socket.local_addr()?;
        tracing::info!(
            %addr,
            root = %self.library.root().display(),
            "stream server listening"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(active = self.sessions.len(), "stream server shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.route(&buf[..len], peer);
                }
            }
        }
    }

    fn route(&self, data: &[u8], peer: SocketAddr) {
        if let Some(inbox) = self.sessions.get(&peer) {
            if let Ok(Datagram::Request { filename }) = Datagram::decode(data) {
                tracing::debug!(%peer, filename, "request from a client already streaming, ignoring");
                return;
            }
            match inbox.try_send(Bytes::copy_from_slice(data)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%peer, "session inbox full, dropping datagram");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(%peer, "session ending, dropping datagram");
                }
            }
            return;
        }

        match Datagram::decode(data) {
            Ok(Datagram::Request { filename }) => self.accept(peer, filename),
            Ok(Datagram::Ack { seq }) => {
                tracing::trace!(%peer, seq, "ack outside any session, ignoring");
            }
            Ok(other) => {
                tracing::debug!(%peer, kind = other.kind(), "datagram outside any session, ignoring");
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "undecodable datagram, ignoring");
            }
        }
    }

    fn accept(&self, peer: SocketAddr, filename: &str) {
        let limit = self.config.network.max_sessions;
        if self.sessions.len() >= limit {
            tracing::warn!(%peer, filename, limit, "session limit reached, refusing request");
            return;
        }
        let path = match self.library.resolve(filename) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "refusing request");
                return;
            }
        };

        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.stream.inbox_depth);
        self.sessions.insert(peer, inbox_tx);
        tracing::info!(%peer, filename, active = self.sessions.len(), "session started");

        let link = SessionLink::new(self.socket.clone(), peer, inbox_rx);
        let guard = SessionGuard {
            sessions: self.sessions.clone(),
            peer,
        };
        let config = self.config.clone();
        tokio::spawn(async move {
            run_session(link, path, &config).await;
            drop(guard);
        });
    }
}

/// Removes a session from the table when its task ends, even on panic.
struct SessionGuard {
    sessions: SessionTable,
    peer: SocketAddr,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.peer);
    }
}

async fn run_session(mut link: SessionLink, path: PathBuf, config: &TidalConfig) {
    let peer = link.peer();
    let mut source = match open_wav(&path).await {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(%peer, path = %path.display(), error = %e, "cannot open audio file");
            return;
        }
    };

    let result = serve(
        &mut link,
        &mut source,
        config.stream.transfer_unit,
        config.stream.slack,
        &config.supervisor(),
    )
    .await;

    match result {
        Ok(report) => tracing::info!(
            %peer,
            path = %path.display(),
            chunks = report.chunks,
            bytes = report.bytes,
            resends = report.resends,
            "stream complete"
        ),
        Err(e) if e.is_timeout() => {
            tracing::warn!(%peer, path = %path.display(), error = %e, "client went silent")
        }
        Err(StreamError::Transport(e)) => {
            tracing::error!(%peer, error = %e, "socket failure, session aborted")
        }
        Err(e) => tracing::warn!(%peer, path = %path.display(), error = %e, "session aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_resolves_plain_names() {
        let library = Library::new("/srv/music");
        assert_eq!(
            library.resolve("take-five.wav").unwrap(),
            PathBuf::from("/srv/music/take-five.wav")
        );
        assert_eq!(
            library.resolve("jazz/so-what.wav").unwrap(),
            PathBuf::from("/srv/music/jazz/so-what.wav")
        );
        assert!(library.resolve("./intro.wav").is_ok());
    }

    #[test]
    fn library_refuses_escapes() {
        let library = Library::new("/srv/music");
        for name in ["../etc/passwd", "/etc/passwd", "jazz/../../secret.wav", ".."] {
            assert!(
                matches!(library.resolve(name), Err(LibraryError::OutsideLibrary(_))),
                "{name} should be refused"
            );
        }
    }

    #[tokio::test]
    async fn guard_removes_session_on_drop() {
        let sessions = new_session_table();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        sessions.insert(peer, tx);

        drop(SessionGuard {
            sessions: sessions.clone(),
            peer,
        });
        assert!(sessions.is_empty());
    }
}
