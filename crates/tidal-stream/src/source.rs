//! Audio sources: where the server reads chunks from.

use std::future::Future;
use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, Take};
use zerocopy::FromBytes;

use tidal_core::wav::{
    ChunkPrelude, FmtBody, RiffHeader, DATA_ID, FMT_ID, FORMAT_EXTENSIBLE, FORMAT_PCM, RIFF_ID,
    WAVE_ID,
};
use tidal_core::{AudioFormat, FormatError};

/// A PCM stream with a known format, read front to back.
pub trait AudioSource: Send {
    fn format(&self) -> AudioFormat;

    /// Fill `buf` with the next bytes of audio. Returns 0 once exhausted;
    /// a short read only happens at the end of the stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Headerless PCM from any reader, with the format supplied by the caller.
pub struct RawSource<R> {
    reader: R,
    format: AudioFormat,
}

impl<R> RawSource<R> {
    pub fn new(reader: R, format: AudioFormat) -> Self {
        Self { reader, format }
    }
}

impl<R: AsyncRead + Unpin + Send> AudioSource for RawSource<R> {
    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// The `data` chunk of a WAV stream.
pub type WavSource<R> = RawSource<Take<R>>;

/// Open a WAV file and position it at the first sample.
pub async fn open_wav(path: &Path) -> Result<WavSource<BufReader<File>>, SourceError> {
    let file = File::open(path).await?;
    read_wav(BufReader::new(file)).await
}

/// Parse RIFF/WAVE headers from `reader` up to the `data` chunk.
///
/// Chunks other than `fmt ` and `data` are skipped. A data length of
/// 0xFFFFFFFF (written by some streaming encoders) reads to end of input.
pub async fn read_wav<R: AsyncRead + Unpin>(mut reader: R) -> Result<WavSource<R>, SourceError> {
    let mut riff = [0u8; std::mem::size_of::<RiffHeader>()];
    reader.read_exact(&mut riff).await.map_err(truncated)?;
    let riff = RiffHeader::read_from(&riff[..]).ok_or(SourceError::NotWav)?;
    if riff.riff != RIFF_ID || riff.wave != WAVE_ID {
        return Err(SourceError::NotWav);
    }

    let mut format = None;
    loop {
        let mut prelude = [0u8; std::mem::size_of::<ChunkPrelude>()];
        reader.read_exact(&mut prelude).await.map_err(truncated)?;
        let prelude = ChunkPrelude::read_from(&prelude[..]).ok_or(SourceError::NotWav)?;
        let size = prelude.size.get();

        match prelude.id {
            FMT_ID => {
                let body_len = std::mem::size_of::<FmtBody>() as u32;
                if size < body_len {
                    return Err(SourceError::Malformed("fmt chunk shorter than 16 bytes"));
                }
                let mut body = [0u8; std::mem::size_of::<FmtBody>()];
                reader.read_exact(&mut body).await.map_err(truncated)?;
                let fmt = FmtBody::read_from(&body[..]).ok_or(SourceError::NotWav)?;

                let tag = fmt.format_tag.get();
                if tag != FORMAT_PCM && tag != FORMAT_EXTENSIBLE {
                    return Err(SourceError::UnsupportedEncoding(tag));
                }
                format = Some(AudioFormat::new(
                    fmt.sample_rate.get(),
                    u32::from(fmt.bits_per_sample.get()),
                    u32::from(fmt.channels.get()),
                )?);
                skip(&mut reader, padded(size) - u64::from(body_len)).await?;
            }
            DATA_ID => {
                let format = format.ok_or(SourceError::Malformed("data chunk before fmt chunk"))?;
                let limit = if size == u32::MAX {
                    u64::MAX
                } else {
                    u64::from(size)
                };
                return Ok(RawSource::new(reader.take(limit), format));
            }
            _ => skip(&mut reader, padded(size)).await?,
        }
    }
}

/// Sub-chunks are padded to an even length.
fn padded(size: u32) -> u64 {
    u64::from(size) + u64::from(size & 1)
}

async fn skip<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> Result<(), SourceError> {
    let skipped = tokio::io::copy(&mut reader.take(len), &mut tokio::io::sink()).await?;
    if skipped != len {
        return Err(SourceError::Malformed("chunk runs past end of file"));
    }
    Ok(())
}

fn truncated(e: io::Error) -> SourceError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SourceError::Malformed("file ends before the data chunk")
    } else {
        SourceError::Io(e)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("not a RIFF/WAVE file")]
    NotWav,

    #[error("malformed WAV: {0}")]
    Malformed(&'static str),

    #[error("unsupported WAV encoding 0x{0:04x} (only integer PCM is streamed)")]
    UnsupportedEncoding(u16),

    #[error(transparent)]
    Format(#[from] FormatError),
}
