//! Tidal wire format: every datagram exchanged between server and client.
//!
//! Each datagram opens with an 8-byte [`Preamble`]: a 3-byte ASCII tag, the
//! wire version and a sequence number. All integers are big-endian so hosts
//! of any byte order interoperate. Control datagrams (header, ack, fin) are
//! padded to the fixed 64-byte envelope; chunks carry up to one transfer
//! unit of raw audio after the preamble.
//!
//! Layouts use zerocopy derives over byte-order-aware integer types, so
//! there is no unsafe code and no manual shifting in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::network_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::format::{AudioFormat, FormatError};

// ── Layouts ──────────────────────────────────────────────────────────────────

/// Leading bytes of every datagram.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Preamble {
    /// ASCII tag identifying the datagram kind (`REQ`, `HDR`, `ACK`, `CHK`, `FIN`).
    pub tag: [u8; 3],

    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Sequence number. 0 for requests, headers and the header ack;
    /// chunks count up from 1; fin carries last chunk + 1.
    pub seq: U32,
}

assert_eq_size!(Preamble, [u8; 8]);

/// Body of a request: the NUL-padded ASCII name of the file to stream.
///
/// Wire size: 64 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RequestBody {
    pub filename: [u8; FILENAME_LEN],
}

assert_eq_size!(RequestBody, [u8; 64]);

/// Body of the stream header: the audio format, big-endian.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct HeaderBody {
    /// Samples per second (Hz).
    pub sample_rate: U32,
    /// Bits per sample.
    pub sample_size: U32,
    pub channel_count: U32,
}

assert_eq_size!(HeaderBody, [u8; 12]);

// ── Constants ────────────────────────────────────────────────────────────────

pub const TAG_REQUEST: [u8; 3] = *b"REQ";
pub const TAG_HEADER: [u8; 3] = *b"HDR";
pub const TAG_ACK: [u8; 3] = *b"ACK";
pub const TAG_CHUNK: [u8; 3] = *b"CHK";
pub const TAG_FIN: [u8; 3] = *b"FIN";

/// Current wire format version.
pub const WIRE_VERSION: u8 = 0x01;

pub const PREAMBLE_LEN: usize = std::mem::size_of::<Preamble>();

/// Fixed size of control datagrams (header, ack, fin).
pub const ENVELOPE_LEN: usize = 64;

/// Maximum filename length in a request.
pub const FILENAME_LEN: usize = 64;

/// Sequence number of the request, the header and the header ack.
pub const HEADER_SEQ: u32 = 0;

/// Sequence number of the first chunk of a stream.
pub const FIRST_CHUNK_SEQ: u32 = 1;

/// Default UDP port shared by requests and streaming.
pub const DEFAULT_PORT: u16 = 1234;

/// Default maximum audio bytes per chunk.
pub const DEFAULT_TRANSFER_UNIT: usize = 1024;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest audio payload a single chunk can carry.
pub const MAX_CHUNK_PAYLOAD: usize = MAX_DATAGRAM - PREAMBLE_LEN;

// ── Datagrams ────────────────────────────────────────────────────────────────

/// A decoded datagram. Chunk payloads and filenames borrow from the
/// receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datagram<'a> {
    /// Client asks the server to stream a file.
    Request { filename: &'a str },
    /// Server announces the stream format.
    Header(AudioFormat),
    /// Receipt of the unit with the given sequence number.
    Ack { seq: u32 },
    /// One unit of raw audio.
    Chunk { seq: u32, payload: &'a [u8] },
    /// End of stream.
    Fin { seq: u32 },
}

impl<'a> Datagram<'a> {
    /// Parse a received datagram.
    ///
    /// Trailing envelope padding is ignored; a body shorter than its layout
    /// is an error.
    pub fn decode(buf: &'a [u8]) -> Result<Self, WireError> {
        let preamble = Preamble::read_from_prefix(buf).ok_or(WireError::Truncated {
            kind: "preamble",
            len: buf.len(),
        })?;
        if preamble.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(preamble.version));
        }
        let seq = preamble.seq.get();
        let body = &buf[PREAMBLE_LEN..];

        match preamble.tag {
            TAG_REQUEST => {
                let request = RequestBody::read_from_prefix(body).ok_or(WireError::Truncated {
                    kind: "request",
                    len: buf.len(),
                })?;
                let end = request
                    .filename
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(FILENAME_LEN);
                let raw = &body[..end];
                let filename = std::str::from_utf8(raw)
                    .ok()
                    .filter(|name| !name.is_empty() && name.is_ascii())
                    .ok_or(WireError::BadFilename)?;
                Ok(Datagram::Request { filename })
            }
            TAG_HEADER => {
                let header = HeaderBody::read_from_prefix(body).ok_or(WireError::Truncated {
                    kind: "header",
                    len: buf.len(),
                })?;
                let format = AudioFormat::new(
                    header.sample_rate.get(),
                    header.sample_size.get(),
                    header.channel_count.get(),
                )?;
                Ok(Datagram::Header(format))
            }
            TAG_ACK => Ok(Datagram::Ack { seq }),
            TAG_CHUNK => Ok(Datagram::Chunk { seq, payload: body }),
            TAG_FIN => Ok(Datagram::Fin { seq }),
            other => Err(WireError::UnknownTag(other)),
        }
    }

    /// Append the encoded datagram to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let start = out.len();
        match *self {
            Datagram::Request { filename } => {
                if filename.is_empty() || !filename.is_ascii() || filename.contains('\0') {
                    return Err(WireError::BadFilename);
                }
                if filename.len() > FILENAME_LEN {
                    return Err(WireError::FilenameTooLong(filename.len()));
                }
                out.extend_from_slice(preamble(TAG_REQUEST, HEADER_SEQ).as_bytes());
                let mut body = RequestBody::new_zeroed();
                body.filename[..filename.len()].copy_from_slice(filename.as_bytes());
                out.extend_from_slice(body.as_bytes());
            }
            Datagram::Header(format) => {
                out.extend_from_slice(preamble(TAG_HEADER, HEADER_SEQ).as_bytes());
                let body = HeaderBody {
                    sample_rate: U32::new(format.sample_rate()),
                    sample_size: U32::new(format.sample_size()),
                    channel_count: U32::new(format.channel_count()),
                };
                out.extend_from_slice(body.as_bytes());
                out.resize(start + ENVELOPE_LEN, 0);
            }
            Datagram::Ack { seq } => {
                out.extend_from_slice(preamble(TAG_ACK, seq).as_bytes());
                out.resize(start + ENVELOPE_LEN, 0);
            }
            Datagram::Chunk { seq, payload } => {
                if payload.len() > MAX_CHUNK_PAYLOAD {
                    return Err(WireError::PayloadTooLarge(payload.len()));
                }
                out.extend_from_slice(preamble(TAG_CHUNK, seq).as_bytes());
                out.extend_from_slice(payload);
            }
            Datagram::Fin { seq } => {
                out.extend_from_slice(preamble(TAG_FIN, seq).as_bytes());
                out.resize(start + ENVELOPE_LEN, 0);
            }
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(ENVELOPE_LEN);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Short name for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Datagram::Request { .. } => "request",
            Datagram::Header(_) => "header",
            Datagram::Ack { .. } => "ack",
            Datagram::Chunk { .. } => "chunk",
            Datagram::Fin { .. } => "fin",
        }
    }
}

fn preamble(tag: [u8; 3], seq: u32) -> Preamble {
    Preamble {
        tag,
        version: WIRE_VERSION,
        seq: U32::new(seq),
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("{kind} truncated: datagram is {len} bytes")]
    Truncated { kind: &'static str, len: usize },

    #[error("unknown datagram tag: {0:02x?}")]
    UnknownTag([u8; 3]),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("filename must be non-empty ASCII without NUL bytes")]
    BadFilename,

    #[error("filename length {0} exceeds maximum {}", FILENAME_LEN)]
    FilenameTooLong(usize),

    #[error("payload length {0} exceeds maximum {}", MAX_CHUNK_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("invalid audio format in header: {0}")]
    BadFormat(#[from] FormatError),
}

// ── Tests ────────────────────────────────────────────────────────────────────
