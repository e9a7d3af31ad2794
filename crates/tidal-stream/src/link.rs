//! Datagram links: the socket a session talks to its peer through.
//!
//! A session never sees the raw socket. The client owns a [`UdpLink`]
//! bound to an ephemeral port; each server session gets a [`SessionLink`]
//! that sends through the shared listening socket and receives whatever
//! the listener routes to it.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// One peer, one datagram at a time. Delivery is best effort.
pub trait DatagramLink: Send + Sync {
    fn peer(&self) -> SocketAddr;

    /// Send one datagram to the peer.
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram from the peer. Returns its length.
    /// Datagrams longer than `buf` are truncated.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

// ── Client side ──────────────────────────────────────────────────────────────

/// A UDP socket talking to a single server address.
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpLink {
    /// Bind an ephemeral port in the peer's address family.
    pub async fn open(peer: SocketAddr) -> io::Result<Self> {
        let unspecified = if peer.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
        Ok(Self { socket, peer })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramLink for UdpLink {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.peer).await.map(|_| ())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            if from == self.peer {
                return Ok(len);
            }
            tracing::debug!(%from, expected = %self.peer, len, "datagram from unexpected address, discarding");
        }
    }
}

// ── Server side ──────────────────────────────────────────────────────────────

/// A server session's view of the shared socket.
pub struct SessionLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: mpsc::Receiver<Bytes>,
}

impl SessionLink {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, inbox: mpsc::Receiver<Bytes>) -> Self {
        Self {
            socket,
            peer,
            inbox,
        }
    }
}

impl DatagramLink for SessionLink {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.peer).await.map(|_| ())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbox.recv().await {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session inbox closed by listener",
            )),
        }
    }
}
