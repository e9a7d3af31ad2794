//! Header negotiation.
//!
//! The server sends the header and waits one pacing interval for the
//! header ack, resending until the ack arrives or the stall deadline
//! passes. The client waits once, for up to the whole deadline, and acks
//! the first header it sees. A repeated header reaching the client later
//! is re-acked by the receiver, so the server never gets stuck on a lost
//! header ack.

use std::time::Duration;

use tokio::time::timeout;

use tidal_core::wire::{Datagram, ENVELOPE_LEN, HEADER_SEQ};
use tidal_core::{AudioFormat, Session, SessionState, StreamError, Supervisor, WaitPoint};

use crate::link::DatagramLink;

/// Server side. Returns how many times the header went out.
pub async fn negotiate<L: DatagramLink>(
    link: &mut L,
    session: &mut Session,
    format: AudioFormat,
    interval: Duration,
    supervisor: &Supervisor,
) -> Result<u32, StreamError> {
    let result = send_header(link, format, interval, supervisor).await;
    match result {
        Ok(attempts) => {
            session.advance(SessionState::Streaming)?;
            Ok(attempts)
        }
        Err(e) => {
            session.fail();
            Err(e)
        }
    }
}

async fn send_header<L: DatagramLink>(
    link: &mut L,
    format: AudioFormat,
    interval: Duration,
    supervisor: &Supervisor,
) -> Result<u32, StreamError> {
    let header = Datagram::Header(format).to_vec()?;
    let mut buf = [0u8; ENVELOPE_LEN];
    let clock = supervisor.watch();
    let mut attempts = 0u32;

    loop {
        link.send(&header).await.map_err(StreamError::Transport)?;
        attempts += 1;
        tracing::trace!(peer = %link.peer(), attempts, "header sent");

        let Ok(received) = timeout(interval, link.recv(&mut buf)).await else {
            if clock.expired() {
                return Err(StreamError::Timeout {
                    at: WaitPoint::HeaderAck,
                    waited: clock.elapsed(),
                });
            }
            continue;
        };

        let len = received.map_err(StreamError::Transport)?;
        return match Datagram::decode(&buf[..len]) {
            Ok(Datagram::Ack { seq: HEADER_SEQ }) => Ok(attempts),
            Ok(Datagram::Ack { seq }) => Err(StreamError::violation(format!(
                "ack {seq} before the header was acknowledged"
            ))),
            Ok(other) => Err(StreamError::violation(format!(
                "expected header ack, got {}",
                other.kind()
            ))),
            Err(e) => Err(StreamError::violation(format!(
                "expected header ack, got undecodable datagram: {e}"
            ))),
        };
    }
}

/// Client side: wait for the header, ack it and return the format.
pub async fn await_header<L: DatagramLink>(
    link: &mut L,
    session: &mut Session,
    supervisor: &Supervisor,
) -> Result<AudioFormat, StreamError> {
    match receive_header(link, supervisor).await {
        Ok(format) => {
            session.set_format(format);
            session.advance(SessionState::Streaming)?;
            Ok(format)
        }
        Err(e) => {
            session.fail();
            Err(e)
        }
    }
}

async fn receive_header<L: DatagramLink>(
    link: &mut L,
    supervisor: &Supervisor,
) -> Result<AudioFormat, StreamError> {
    let mut buf = [0u8; ENVELOPE_LEN];
    let clock = supervisor.watch();

    let len = match timeout(supervisor.deadline(), link.recv(&mut buf)).await {
        Ok(received) => received.map_err(StreamError::Transport)?,
        Err(_) => {
            return Err(StreamError::Timeout {
                at: WaitPoint::Header,
                waited: clock.elapsed(),
            })
        }
    };

    let format = match Datagram::decode(&buf[..len]) {
        Ok(Datagram::Header(format)) => format,
        Ok(other) => {
            return Err(StreamError::violation(format!(
                "expected header, got {}",
                other.kind()
            )))
        }
        Err(e) => {
            return Err(StreamError::violation(format!(
                "expected header, got undecodable datagram: {e}"
            )))
        }
    };

    let ack = Datagram::Ack { seq: HEADER_SEQ }.to_vec()?;
    link.send(&ack).await.map_err(StreamError::Transport)?;
    tracing::debug!(peer = %link.peer(), %format, "header acknowledged");
    Ok(format)
}
