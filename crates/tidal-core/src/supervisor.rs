//! Connection supervision: how long either side tolerates a silent peer.
//!
//! The same deadline bounds the header-ack wait, the per-chunk ack wait and
//! the receiver's wait for the next datagram. Without it a crashed peer or a
//! partitioned network would leave the other side blocked forever.

use std::time::Duration;

use tokio::time::Instant;

/// Default stall deadline.
pub const OVERALL_DEADLINE: Duration = Duration::from_secs(6);

/// Stall policy shared by negotiation, transmission and reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervisor {
    deadline: Duration,
}

impl Supervisor {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Start a stall clock at the current instant.
    pub fn watch(&self) -> StallClock {
        StallClock {
            started: Instant::now(),
            deadline: self.deadline,
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(OVERALL_DEADLINE)
    }
}

/// Measures one stall: time since the last sign of life from the peer.
#[derive(Debug, Clone, Copy)]
pub struct StallClock {
    started: Instant,
    deadline: Duration,
}

impl StallClock {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once strictly more than the deadline has passed.
    pub fn expired(&self) -> bool {
        self.elapsed() > self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.elapsed())
    }
}
