//! RIFF/WAVE layouts used by the WAV audio source and sink.
//!
//! WAV is little-endian throughout, unlike the Tidal wire format.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::format::AudioFormat;

pub const RIFF_ID: [u8; 4] = *b"RIFF";
pub const WAVE_ID: [u8; 4] = *b"WAVE";
pub const FMT_ID: [u8; 4] = *b"fmt ";
pub const DATA_ID: [u8; 4] = *b"data";

/// Integer PCM.
pub const FORMAT_PCM: u16 = 0x0001;
/// WAVE_FORMAT_EXTENSIBLE; the sub-format GUID is assumed to be PCM.
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// `RIFF <size> WAVE`
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RiffHeader {
    pub riff: [u8; 4],
    /// File length minus 8.
    pub size: U32,
    pub wave: [u8; 4],
}

assert_eq_size!(RiffHeader, [u8; 12]);

/// Id and length preceding every sub-chunk.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkPrelude {
    pub id: [u8; 4],
    pub size: U32,
}

assert_eq_size!(ChunkPrelude, [u8; 8]);

/// Common part of the `fmt ` chunk.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FmtBody {
    pub format_tag: U16,
    pub channels: U16,
    pub sample_rate: U32,
    pub byte_rate: U32,
    pub block_align: U16,
    pub bits_per_sample: U16,
}

assert_eq_size!(FmtBody, [u8; 16]);

/// Length of the canonical header written by [`canonical_header`].
pub const CANONICAL_HEADER_LEN: usize = 12 + 8 + 16 + 8;

/// Offset of the RIFF size field.
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the data chunk size field in a canonical header.
pub const DATA_SIZE_OFFSET: u64 = (CANONICAL_HEADER_LEN - 4) as u64;

/// A 44-byte PCM header for `format` with `data_len` bytes of samples, or
/// `None` if the format overflows the header's 16-bit channel and block
/// align fields or its 32-bit byte rate.
pub fn canonical_header(format: &AudioFormat, data_len: u32) -> Option<Vec<u8>> {
    let channels = u16::try_from(format.channel_count()).ok()?;
    let byte_rate = u32::try_from(format.byte_rate()).ok()?;
    let block_align = u16::try_from(format.block_align()).ok()?;

    let riff = RiffHeader {
        riff: RIFF_ID,
        size: U32::new(riff_size(data_len)),
        wave: WAVE_ID,
    };
    let fmt_prelude = ChunkPrelude {
        id: FMT_ID,
        size: U32::new(std::mem::size_of::<FmtBody>() as u32),
    };
    let fmt = FmtBody {
        format_tag: U16::new(FORMAT_PCM),
        channels: U16::new(channels),
        sample_rate: U32::new(format.sample_rate()),
        byte_rate: U32::new(byte_rate),
        block_align: U16::new(block_align),
        bits_per_sample: U16::new(format.sample_size() as u16),
    };
    let data_prelude = ChunkPrelude {
        id: DATA_ID,
        size: U32::new(data_len),
    };

    let mut out = Vec::with_capacity(CANONICAL_HEADER_LEN);
    out.extend_from_slice(riff.as_bytes());
    out.extend_from_slice(fmt_prelude.as_bytes());
    out.extend_from_slice(fmt.as_bytes());
    out.extend_from_slice(data_prelude.as_bytes());
    Some(out)
}

/// RIFF size field for a canonical file holding `data_len` sample bytes.
pub fn riff_size(data_len: u32) -> u32 {
    (CANONICAL_HEADER_LEN as u32 - 8).saturating_add(data_len)
}
