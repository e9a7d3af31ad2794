//! Audio format descriptor carried in the stream header.

use std::fmt;

/// Sample sizes (bits) a stream may carry. Samples are packed and interleaved.
pub const SUPPORTED_SAMPLE_SIZES: [u32; 4] = [8, 16, 24, 32];

/// Format of the PCM stream: rate, sample width and channel count.
///
/// Constructed only through [`AudioFormat::new`], so every value in
/// circulation has a strictly positive byte rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    sample_size: u32,
    channel_count: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, sample_size: u32, channel_count: u32) -> Result<Self, FormatError> {
        if sample_rate == 0 {
            return Err(FormatError::ZeroSampleRate);
        }
        if !SUPPORTED_SAMPLE_SIZES.contains(&sample_size) {
            return Err(FormatError::UnsupportedSampleSize(sample_size));
        }
        if channel_count == 0 {
            return Err(FormatError::ZeroChannels);
        }
        Ok(Self {
            sample_rate,
            sample_size,
            channel_count,
        })
    }

    /// Samples per second per channel (Hz).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bits per sample.
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Bytes in one frame (one sample for every channel).
    pub fn block_align(&self) -> u64 {
        u64::from(self.sample_size / 8) * u64::from(self.channel_count)
    }

    /// Bytes of audio consumed per second of playback.
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.sample_size / 8) * u64::from(self.channel_count)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}bit/{}ch",
            self.sample_rate, self.sample_size, self.channel_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("sample rate must be positive")]
    ZeroSampleRate,

    #[error("unsupported sample size: {0} bits (expected 8, 16, 24 or 32)")]
    UnsupportedSampleSize(u32),

    #[error("channel count must be positive")]
    ZeroChannels,

    #[error("transfer unit must be positive")]
    ZeroTransferUnit,

    #[error("pacing slack must be in (0, 1], got {0}")]
    InvalidSlack(f64),

    #[error("pacing interval for {0}-byte units is out of range")]
    IntervalOutOfRange(usize),
}
