//! In-process lossy link and in-memory sink for protocol tests.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use tidal_core::wire::Datagram;
use tidal_core::AudioFormat;

use crate::link::DatagramLink;
use crate::sink::AudioSink;

pub const SERVER_ADDR: &str = "127.0.0.1:1234";
pub const CLIENT_ADDR: &str = "127.0.0.1:40000";

/// Everything one endpoint ever sent, plus its drop plan.
#[derive(Default)]
struct Wire {
    sent: Vec<Bytes>,
    drop: HashSet<usize>,
    mute: bool,
}

/// Observer and fault injector for one direction of a loopback pair.
#[derive(Clone, Default)]
pub struct Tap(Arc<Mutex<Wire>>);

impl Tap {
    /// Lose the `n`th datagram (0-based) this endpoint sends.
    pub fn drop_nth(&self, n: usize) {
        self.0.lock().unwrap().drop.insert(n);
    }

    /// Lose everything from now on.
    pub fn mute(&self) {
        self.0.lock().unwrap().mute = true;
    }

    /// Every send attempt, delivered or not.
    pub fn sent(&self) -> Vec<Bytes> {
        self.0.lock().unwrap().sent.clone()
    }

    /// (kind, seq) of every send attempt.
    pub fn frames(&self) -> Vec<(&'static str, u32)> {
        self.sent()
            .iter()
            .map(|d| {
                let datagram = Datagram::decode(d).unwrap();
                let seq = match datagram {
                    Datagram::Ack { seq } | Datagram::Chunk { seq, .. } | Datagram::Fin { seq } => seq,
                    _ => 0,
                };
                (datagram.kind(), seq)
            })
            .collect()
    }
}

/// One end of an in-memory datagram pipe.
pub struct Loopback {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    tap: Tap,
}

impl Loopback {
    pub fn tap(&self) -> Tap {
        self.tap.clone()
    }
}

/// (server end, client end).
pub fn pair() -> (Loopback, Loopback) {
    let (to_client, client_rx) = mpsc::unbounded_channel();
    let (to_server, server_rx) = mpsc::unbounded_channel();
    let server = Loopback {
        peer: CLIENT_ADDR.parse().unwrap(),
        tx: to_client,
        rx: server_rx,
        tap: Tap::default(),
    };
    let client = Loopback {
        peer: SERVER_ADDR.parse().unwrap(),
        tx: to_server,
        rx: client_rx,
        tap: Tap::default(),
    };
    (server, client)
}

impl DatagramLink for Loopback {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let datagram = Bytes::copy_from_slice(datagram);
        let deliver = {
            let mut wire = self.tap.0.lock().unwrap();
            let index = wire.sent.len();
            wire.sent.push(datagram.clone());
            !wire.mute && !wire.drop.contains(&index)
        };
        if deliver {
            // A vanished peer is indistinguishable from loss.
            let _ = self.tx.send(datagram);
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.recv().await {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            None => std::future::pending().await,
        }
    }
}

/// Collects chunks in memory.
#[derive(Default)]
pub struct MemorySink {
    pub format: Option<AudioFormat>,
    pub chunks: Vec<Vec<u8>>,
    pub finished: bool,
}

impl AudioSink for MemorySink {
    async fn open(&mut self, format: AudioFormat) -> io::Result<()> {
        self.format = Some(format);
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.chunks.push(chunk.to_vec());
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}
