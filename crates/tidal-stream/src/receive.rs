//! Client-side chunk reception.
//!
//! Chunks are delivered to the sink strictly in sequence order, each one
//! exactly once. A chunk the client already has (its ack was lost, so the
//! server resent it) is acked again but not delivered. A repeated header
//! means the header ack was lost; it is acked again too. The end-of-stream
//! marker must follow the last delivered chunk.

use std::time::Duration;

use tokio::time::timeout;

use tidal_core::wire::{Datagram, WireError, HEADER_SEQ, MAX_DATAGRAM};
use tidal_core::{Session, SessionState, StreamError, Supervisor, WaitPoint};

use crate::link::DatagramLink;
use crate::sink::AudioSink;

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// `delivered` is the sequence number of the last chunk handed to the
    /// sink, or the header's before the first chunk.
    Streaming { delivered: u32 },
    Closed,
    Failed,
}

impl RxState {
    pub fn start() -> Self {
        RxState::Streaming {
            delivered: HEADER_SEQ,
        }
    }
}

#[derive(Debug)]
pub enum RxEvent<'a> {
    Datagram(Datagram<'a>),
    Garbled(WireError),
    /// Nothing arrived for `waited`.
    Silence { waited: Duration },
}

#[derive(Debug)]
pub enum RxAction<'a> {
    /// Write the payload to the sink, then ack it.
    Deliver { seq: u32, payload: &'a [u8] },
    /// Ack again without delivering.
    Reack { seq: u32 },
    Close,
    Abort(StreamError),
}

pub fn step(state: RxState, event: RxEvent<'_>) -> (RxState, RxAction<'_>) {
    match (state, event) {
        (RxState::Streaming { delivered }, RxEvent::Datagram(Datagram::Chunk { seq, payload }))
            if seq == delivered.wrapping_add(1) =>
        {
            (
                RxState::Streaming { delivered: seq },
                RxAction::Deliver { seq, payload },
            )
        }
        (state @ RxState::Streaming { delivered }, RxEvent::Datagram(Datagram::Chunk { seq, .. }))
            if seq <= delivered =>
        {
            (state, RxAction::Reack { seq })
        }
        (RxState::Streaming { delivered }, RxEvent::Datagram(Datagram::Chunk { seq, .. })) => (
            RxState::Failed,
            RxAction::Abort(StreamError::violation(format!(
                "chunk {seq} skips ahead of {delivered}"
            ))),
        ),
        (state @ RxState::Streaming { .. }, RxEvent::Datagram(Datagram::Header(_))) => {
            (state, RxAction::Reack { seq: HEADER_SEQ })
        }
        (RxState::Streaming { delivered }, RxEvent::Datagram(Datagram::Fin { seq }))
            if seq == delivered.wrapping_add(1) =>
        {
            (RxState::Closed, RxAction::Close)
        }
        (RxState::Streaming { delivered }, RxEvent::Datagram(Datagram::Fin { seq })) => (
            RxState::Failed,
            RxAction::Abort(StreamError::violation(format!(
                "end of stream at {seq} after chunk {delivered}"
            ))),
        ),
        (RxState::Streaming { .. }, RxEvent::Silence { waited }) => (
            RxState::Failed,
            RxAction::Abort(StreamError::Timeout {
                at: WaitPoint::NextChunk,
                waited,
            }),
        ),
        (_, RxEvent::Datagram(other)) => (
            RxState::Failed,
            RxAction::Abort(StreamError::violation(format!(
                "unexpected {} during playback",
                other.kind()
            ))),
        ),
        (_, RxEvent::Garbled(e)) => (
            RxState::Failed,
            RxAction::Abort(StreamError::violation(format!("undecodable datagram: {e}"))),
        ),
        (state, RxEvent::Silence { .. }) => (
            RxState::Failed,
            RxAction::Abort(StreamError::violation(format!(
                "receiver woken while {state:?}"
            ))),
        ),
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Chunks delivered to the sink.
    pub chunks: u64,
    pub bytes: u64,
    /// Resent chunks that were acked again and dropped.
    pub duplicates: u64,
}

/// Receive chunks into `sink` until end of stream. The session must
/// already be streaming; it ends closed on success and failed otherwise.
pub async fn receive<L: DatagramLink, K: AudioSink>(
    link: &mut L,
    sink: &mut K,
    session: &mut Session,
    supervisor: &Supervisor,
) -> Result<ReceiveReport, StreamError> {
    let result = run(link, sink, session, supervisor).await;
    if result.is_err() {
        session.fail();
    }
    result
}

async fn run<L: DatagramLink, K: AudioSink>(
    link: &mut L,
    sink: &mut K,
    session: &mut Session,
    supervisor: &Supervisor,
) -> Result<ReceiveReport, StreamError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut ack = Vec::new();
    let mut report = ReceiveReport::default();
    let mut state = RxState::start();

    loop {
        let clock = supervisor.watch();
        let event = match timeout(supervisor.deadline(), link.recv(&mut buf)).await {
            Err(_) => RxEvent::Silence {
                waited: clock.elapsed(),
            },
            Ok(received) => {
                let len = received.map_err(StreamError::Transport)?;
                match Datagram::decode(&buf[..len]) {
                    Ok(datagram) => RxEvent::Datagram(datagram),
                    Err(e) => RxEvent::Garbled(e),
                }
            }
        };

        let (next, action) = step(state, event);
        state = next;

        let acked = match action {
            RxAction::Deliver { seq, payload } => {
                sink.write_chunk(payload).await.map_err(StreamError::Sink)?;
                report.chunks += 1;
                report.bytes += payload.len() as u64;
                seq
            }
            RxAction::Reack { seq } => {
                if seq != HEADER_SEQ {
                    report.duplicates += 1;
                }
                tracing::debug!(peer = %link.peer(), seq, "repeat received, acking again");
                seq
            }
            RxAction::Close => {
                session.advance(SessionState::Terminating)?;
                sink.finish().await.map_err(StreamError::Sink)?;
                session.advance(SessionState::Closed)?;
                tracing::debug!(peer = %link.peer(), chunks = report.chunks, "end of stream");
                return Ok(report);
            }
            RxAction::Abort(e) => return Err(e),
        };

        ack.clear();
        Datagram::Ack { seq: acked }.encode_into(&mut ack)?;
        link.send(&ack).await.map_err(StreamError::Transport)?;
    }
}
