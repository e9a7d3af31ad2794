//! Audio sinks: where the client writes received chunks.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use tidal_core::wav::{canonical_header, riff_size, DATA_SIZE_OFFSET, RIFF_SIZE_OFFSET};
use tidal_core::AudioFormat;

/// Consumer of the chunk stream, in order.
pub trait AudioSink: Send {
    /// Called once the format is known, before the first chunk.
    fn open(&mut self, format: AudioFormat) -> impl Future<Output = io::Result<()>> + Send;

    fn write_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Called after the end-of-stream marker.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Headerless PCM, e.g. stdout piped into a player.
pub struct RawSink<W> {
    writer: W,
}

impl<W> RawSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send> AudioSink for RawSink<W> {
    async fn open(&mut self, _format: AudioFormat) -> io::Result<()> {
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

/// A WAV file. Sizes in the header are patched in on `finish`.
pub struct WavSink<W> {
    writer: W,
    data_len: u64,
}

impl WavSink<File> {
    pub async fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::create(path).await?))
    }
}

impl<W> WavSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            data_len: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + AsyncSeek + Unpin + Send> AudioSink for WavSink<W> {
    async fn open(&mut self, format: AudioFormat) -> io::Result<()> {
        let header = canonical_header(&format, 0).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{format} does not fit a WAV header"),
            )
        })?;
        self.writer.write_all(&header).await
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.data_len += chunk.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        let data_len = u32::try_from(self.data_len).unwrap_or(u32::MAX);
        let pad = data_len & 1;
        if pad == 1 {
            self.writer.write_all(&[0]).await?;
        }

        self.writer.seek(SeekFrom::Start(RIFF_SIZE_OFFSET)).await?;
        self.writer
            .write_all(&riff_size(data_len).saturating_add(pad).to_le_bytes())
            .await?;
        self.writer.seek(SeekFrom::Start(DATA_SIZE_OFFSET)).await?;
        self.writer.write_all(&data_len.to_le_bytes()).await?;
        self.writer.seek(SeekFrom::End(0)).await?;
        self.writer.flush().await
    }
}
