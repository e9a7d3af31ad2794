//! Server-side chunk transmission.
//!
//! Stop-and-wait: one chunk in flight, resent every pacing interval until
//! its ack arrives or the stall deadline passes. Each chunk owns one
//! interval-long slot on a fixed schedule; after an ack the transmitter
//! sleeps until the slot ends, so the stream runs no faster than the audio's
//! byte rate and timer rounding never accumulates across chunks.
//!
//! The decisions live in [`step`], a pure function over [`TxState`] and
//! [`TxEvent`]. [`transmit`] performs the I/O each [`TxAction`] asks for
//! and feeds the outcome back in as the next event.

use std::time::Duration;

use tokio::time::{sleep_until, timeout, Instant};

use tidal_core::supervisor::StallClock;
use tidal_core::wire::{Datagram, ENVELOPE_LEN, FIRST_CHUNK_SEQ};
use tidal_core::{Pacing, Session, SessionState, StreamError, Supervisor, WaitPoint};

use crate::link::DatagramLink;
use crate::source::AudioSource;

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// The next read from the source becomes chunk `next_seq`.
    Ready { next_seq: u32 },
    /// Chunk `seq` is in flight.
    AwaitingAck { seq: u32 },
    Closed,
    Failed,
}

impl TxState {
    pub fn start() -> Self {
        TxState::Ready {
            next_seq: FIRST_CHUNK_SEQ,
        }
    }
}

#[derive(Debug)]
pub enum TxEvent {
    /// The source produced `len` bytes; 0 means exhausted.
    Read { len: usize },
    /// An ack arrived `waited` into the chunk's slot.
    Ack { seq: u32, waited: Duration },
    /// The interval ran out with no ack. `stalled` is the time since the
    /// chunk was first sent.
    Silence { stalled: Duration },
    /// Anything else arrived.
    Unexpected(String),
}

#[derive(Debug)]
pub enum TxAction {
    /// Send the chunk just read as `seq`, then wait for its ack.
    Send { seq: u32 },
    /// Send chunk `seq` again, then wait for its ack.
    Resend { seq: u32 },
    /// Keep waiting out the current interval.
    Listen,
    /// Sleep out what is left of the slot, then read the next chunk.
    Pace(Duration),
    /// Send the end-of-stream marker with this sequence number.
    Finish { seq: u32 },
    Abort(StreamError),
}

/// Timing inputs to [`step`].
#[derive(Debug, Clone, Copy)]
pub struct TxPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

pub fn step(state: TxState, event: TxEvent, policy: &TxPolicy) -> (TxState, TxAction) {
    match (state, event) {
        (TxState::Ready { next_seq }, TxEvent::Read { len: 0 }) => {
            (TxState::Closed, TxAction::Finish { seq: next_seq })
        }
        (TxState::Ready { next_seq }, TxEvent::Read { .. }) => (
            TxState::AwaitingAck { seq: next_seq },
            TxAction::Send { seq: next_seq },
        ),

        (TxState::AwaitingAck { seq }, TxEvent::Ack { seq: acked, waited }) if acked == seq => (
            TxState::Ready {
                next_seq: seq.wrapping_add(1),
            },
            TxAction::Pace(policy.interval.saturating_sub(waited)),
        ),
        // A late ack for a chunk that was already acknowledged.
        (state @ TxState::AwaitingAck { seq }, TxEvent::Ack { seq: acked, .. }) if acked < seq => {
            (state, TxAction::Listen)
        }
        (TxState::AwaitingAck { seq }, TxEvent::Ack { seq: acked, .. }) => (
            TxState::Failed,
            TxAction::Abort(StreamError::violation(format!(
                "ack {acked} for a chunk never sent (awaiting {seq})"
            ))),
        ),

        (TxState::AwaitingAck { .. }, TxEvent::Silence { stalled }) if stalled > policy.deadline => (
            TxState::Failed,
            TxAction::Abort(StreamError::Timeout {
                at: WaitPoint::ChunkAck,
                waited: stalled,
            }),
        ),
        (state @ TxState::AwaitingAck { seq }, TxEvent::Silence { .. }) => {
            (state, TxAction::Resend { seq })
        }

        (_, TxEvent::Unexpected(what)) => (
            TxState::Failed,
            TxAction::Abort(StreamError::ProtocolViolation(what)),
        ),
        (state, event) => (
            TxState::Failed,
            TxAction::Abort(StreamError::violation(format!(
                "transmitter got {event:?} while {state:?}"
            ))),
        ),
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitReport {
    /// Distinct chunks sent.
    pub chunks: u64,
    /// Audio bytes sent, not counting resends.
    pub bytes: u64,
    pub resends: u64,
}

/// Stream `source` to the peer. The session must already be streaming;
/// it ends closed on success and failed otherwise.
pub async fn transmit<L: DatagramLink, S: AudioSource>(
    link: &mut L,
    source: &mut S,
    session: &mut Session,
    pacing: &Pacing,
    supervisor: &Supervisor,
) -> Result<TransmitReport, StreamError> {
    let result = run(link, source, session, pacing, supervisor).await;
    if result.is_err() {
        session.fail();
    }
    result
}

async fn run<L: DatagramLink, S: AudioSource>(
    link: &mut L,
    source: &mut S,
    session: &mut Session,
    pacing: &Pacing,
    supervisor: &Supervisor,
) -> Result<TransmitReport, StreamError> {
    let policy = TxPolicy {
        interval: pacing.interval(),
        deadline: supervisor.deadline(),
    };
    let mut chunk = vec![0u8; pacing.transfer_unit()];
    let mut frame = Vec::with_capacity(chunk.len() + ENVELOPE_LEN);
    let mut inbound = [0u8; ENVELOPE_LEN];
    let mut report = TransmitReport::default();

    // Reset on every fresh send; resends do not count as progress.
    let mut stall = supervisor.watch();
    // Start of the current wait window, reset on every (re)send.
    let mut window = Instant::now();
    // Scheduled start of the current chunk's slot.
    let mut slot = window;

    let mut len = source.read_chunk(&mut chunk).await.map_err(StreamError::Source)?;
    let mut state = TxState::start();
    let mut event = TxEvent::Read { len };

    loop {
        let (next, action) = step(state, event, &policy);
        state = next;

        event = match action {
            TxAction::Send { seq } => {
                frame.clear();
                Datagram::Chunk {
                    seq,
                    payload: &chunk[..len],
                }
                .encode_into(&mut frame)?;
                link.send(&frame).await.map_err(StreamError::Transport)?;
                report.chunks += 1;
                report.bytes += len as u64;
                stall = supervisor.watch();
                window = Instant::now();
                tracing::trace!(peer = %link.peer(), seq, len, "chunk sent");
                await_ack(link, &mut inbound, window, slot, &policy, &stall).await?
            }
            TxAction::Resend { seq } => {
                // `frame` still holds the chunk in flight.
                link.send(&frame).await.map_err(StreamError::Transport)?;
                report.resends += 1;
                window = Instant::now();
                tracing::debug!(
                    peer = %link.peer(),
                    seq,
                    stalled_ms = stall.elapsed().as_millis() as u64,
                    "no ack, chunk resent"
                );
                await_ack(link, &mut inbound, window, slot, &policy, &stall).await?
            }
            TxAction::Listen => {
                await_ack(link, &mut inbound, window, slot, &policy, &stall).await?
            }
            TxAction::Pace(rest) => {
                if rest.is_zero() {
                    // Resends overran the slot; restart the schedule from now.
                    slot = Instant::now();
                } else {
                    slot += policy.interval;
                    sleep_until(slot).await;
                }
                len = source.read_chunk(&mut chunk).await.map_err(StreamError::Source)?;
                TxEvent::Read { len }
            }
            TxAction::Finish { seq } => {
                session.advance(SessionState::Terminating)?;
                let fin = Datagram::Fin { seq }.to_vec()?;
                link.send(&fin).await.map_err(StreamError::Transport)?;
                session.advance(SessionState::Closed)?;
                tracing::debug!(peer = %link.peer(), seq, "end of stream sent");
                return Ok(report);
            }
            TxAction::Abort(e) => return Err(e),
        };
    }
}

/// Wait out the rest of the current window for an ack.
async fn await_ack<L: DatagramLink>(
    link: &mut L,
    buf: &mut [u8],
    window: Instant,
    slot: Instant,
    policy: &TxPolicy,
    stall: &StallClock,
) -> Result<TxEvent, StreamError> {
    let remaining = policy.interval.saturating_sub(window.elapsed());
    let received = if remaining.is_zero() {
        None
    } else {
        timeout(remaining, link.recv(buf)).await.ok()
    };
    let Some(received) = received else {
        return Ok(TxEvent::Silence {
            stalled: stall.elapsed(),
        });
    };

    let len = received.map_err(StreamError::Transport)?;
    Ok(match Datagram::decode(&buf[..len]) {
        Ok(Datagram::Ack { seq }) => TxEvent::Ack {
            seq,
            waited: slot.elapsed(),
        },
        Ok(other) => TxEvent::Unexpected(format!("{} while waiting for a chunk ack", other.kind())),
        Err(e) => TxEvent::Unexpected(format!("undecodable datagram while waiting for a chunk ack: {e}")),
    })
}
