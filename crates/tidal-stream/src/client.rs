//! Client: request a file, negotiate, receive into a sink.

use std::io;
use std::net::SocketAddr;

use tidal_core::wire::Datagram;
use tidal_core::{AudioFormat, Session, StreamError, Supervisor};

use crate::link::DatagramLink;
use crate::negotiate::await_header;
use crate::receive::{receive, ReceiveReport};
use crate::sink::AudioSink;

/// Outcome of a completed playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Playback {
    pub format: AudioFormat,
    pub report: ReceiveReport,
}

/// Resolve `host` (a name or literal address) and `port` to the server's
/// address, preferring IPv4.
pub async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{host} has no addresses")))
}

/// Request `filename` from the peer and play it into `sink`.
pub async fn play<L: DatagramLink, K: AudioSink>(
    link: &mut L,
    filename: &str,
    sink: &mut K,
    supervisor: &Supervisor,
) -> Result<Playback, StreamError> {
    let mut session = Session::requesting(link.peer());

    let request = Datagram::Request { filename }.to_vec()?;
    link.send(&request).await.map_err(StreamError::Transport)?;
    tracing::debug!(peer = %link.peer(), filename, "stream requested");

    let format = await_header(link, &mut session, supervisor).await?;
    tracing::info!(peer = %link.peer(), %format, "stream format negotiated");
    if let Err(e) = sink.open(format).await {
        session.fail();
        return Err(StreamError::Sink(e));
    }

    let report = receive(link, sink, &mut session, supervisor).await?;
    Ok(Playback { format, report })
}
