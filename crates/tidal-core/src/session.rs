//! Session bookkeeping and the error taxonomy shared by both sides.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::format::{AudioFormat, FormatError};
use crate::pacing::Pacing;
use crate::wire::WireError;

/// Where a session is in its lifecycle.
///
///   Negotiating → Streaming → Terminating → Closed
///        └────────────┴────────────┴──────→ Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Streaming,
    Terminating,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Negotiating, Streaming) | (Streaming, Terminating) | (Terminating, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Streaming => "streaming",
            SessionState::Terminating => "terminating",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One streaming session, owned by the task that runs it.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    format: Option<AudioFormat>,
    pacing: Option<Pacing>,
    state: SessionState,
}

impl Session {
    /// Server side: the format is known before negotiation starts.
    pub fn serving(peer: SocketAddr, format: AudioFormat, pacing: Pacing) -> Self {
        Self {
            peer,
            format: Some(format),
            pacing: Some(pacing),
            state: SessionState::Negotiating,
        }
    }

    /// Client side: the format arrives with the header.
    pub fn requesting(peer: SocketAddr) -> Self {
        Self {
            peer,
            format: None,
            pacing: None,
            state: SessionState::Negotiating,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn pacing(&self) -> Option<Pacing> {
        self.pacing
    }

    /// Record the format learned from the header.
    pub fn set_format(&mut self, format: AudioFormat) {
        self.format = Some(format);
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: SessionState) -> Result<(), StreamError> {
        if !self.state.can_become(next) {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark the session failed. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Which wait point a timeout happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoint {
    /// Server waiting for the header ack.
    HeaderAck,
    /// Client waiting for the header.
    Header,
    /// Server waiting for a chunk ack.
    ChunkAck,
    /// Client waiting for the next chunk or fin.
    NextChunk,
}

impl fmt::Display for WaitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitPoint::HeaderAck => "header ack",
            WaitPoint::Header => "header",
            WaitPoint::ChunkAck => "chunk ack",
            WaitPoint::NextChunk => "next chunk",
        };
        f.write_str(name)
    }
}

/// Everything that can end a session early.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Socket send/receive failure.
    #[error("transport failure: {0}")]
    Transport(#[source] std::io::Error),

    /// The peer stayed silent past the deadline.
    #[error("peer silent for {:.3}s waiting for {at}", .waited.as_secs_f64())]
    Timeout { at: WaitPoint, waited: Duration },

    /// A datagram arrived that does not fit the protocol at this point.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("audio source failure: {0}")]
    Source(#[source] std::io::Error),

    #[error("audio sink failure: {0}")]
    Sink(#[source] std::io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("illegal session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl StreamError {
    pub fn violation(msg: impl Into<String>) -> Self {
        StreamError::ProtocolViolation(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout { .. })
    }
}
