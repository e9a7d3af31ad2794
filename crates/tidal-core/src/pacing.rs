//! Pacing: how long to wait between chunks so delivery tracks playback.
//!
//!   byte_rate          = sample_rate * sample_size/8 * channels
//!   packets_per_second = byte_rate / transfer_unit
//!   interval           = 1 / packets_per_second * slack
//!
//! The slack factor, in (0, 1], under-allocates the interval so per-packet
//! overhead and network latency never starve the receiver.

use std::time::Duration;

use crate::format::{AudioFormat, FormatError};

/// Default slack applied to the ideal packet interval.
pub const DEFAULT_SLACK: f64 = 0.94;

/// Pacing derived once per session from the negotiated format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    byte_rate: u64,
    transfer_unit: usize,
    interval: Duration,
}

impl Pacing {
    pub fn new(format: &AudioFormat, transfer_unit: usize, slack: f64) -> Result<Self, FormatError> {
        if transfer_unit == 0 {
            return Err(FormatError::ZeroTransferUnit);
        }
        if !(slack > 0.0 && slack <= 1.0) {
            return Err(FormatError::InvalidSlack(slack));
        }

        // AudioFormat guarantees a positive byte rate.
        let byte_rate = format.byte_rate();
        let packets_per_second = byte_rate as f64 / transfer_unit as f64;
        let interval = Duration::try_from_secs_f64(slack / packets_per_second)
            .map_err(|_| FormatError::IntervalOutOfRange(transfer_unit))?;

        Ok(Self {
            byte_rate,
            transfer_unit,
            interval,
        })
    }

    /// Time budget for one chunk: ack wait plus pacing sleep.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn byte_rate(&self) -> u64 {
        self.byte_rate
    }

    pub fn transfer_unit(&self) -> usize {
        self.transfer_unit
    }

    /// Remaining sleep after `waited` of the interval was spent waiting for an ack.
    pub fn remainder(&self, waited: Duration) -> Duration {
        self.interval.saturating_sub(waited)
    }
}
