//! Length-prefixed, checksummed frames.
//!
//! Frame layout: `u32 BE length | u32 BE crc32 | body`, with the length
//! covering checksum and body. The length is validated against the size
//! cap before any allocation, and the checksum before any decode. Buffers
//! are reused across frames.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;
use crate::wire::WireRecord;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;
const CHECKSUM_LEN: usize = 4;

/// Framed record stream over any async byte stream.
pub struct FramedConn<S> {
    stream: S,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    max_frame_size: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedConn<S> {
    pub fn new(stream: S, max_frame_size: usize) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            write_buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame_size,
        }
    }

    /// Write one record as a single frame and flush it.
    pub async fn write_record(&mut self, record: &WireRecord) -> Result<(), CodecError> {
        let body = record.encode()?;
        self.write_frame(&body).await
    }

    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), CodecError> {
        let frame_len = body.len() + CHECKSUM_LEN;
        if frame_len > self.max_frame_size {
            return Err(CodecError::too_large(frame_len, self.max_frame_size));
        }
        let checksum = crc32fast::hash(body);

        self.write_buffer.clear();
        self.write_buffer
            .extend_from_slice(&(frame_len as u32).to_be_bytes());
        self.write_buffer.extend_from_slice(&checksum.to_be_bytes());
        self.write_buffer.extend_from_slice(body);

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one record.
    pub async fn read_record(&mut self) -> Result<WireRecord, CodecError> {
        let body = self.read_frame().await?;
        WireRecord::decode(&body)
    }

    pub async fn read_frame(&mut self) -> Result<Bytes, CodecError> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let frame_len = u32::from_be_bytes(len_bytes) as usize;

        if frame_len > self.max_frame_size {
            return Err(CodecError::too_large(frame_len, self.max_frame_size));
        }
        if frame_len < CHECKSUM_LEN {
            return Err(CodecError::corrupt("frame shorter than its checksum"));
        }

        if self.read_buffer.capacity() < frame_len {
            self.read_buffer
                .reserve(frame_len - self.read_buffer.capacity());
        }
        self.read_buffer.resize(frame_len, 0);
        self.stream.read_exact(&mut self.read_buffer).await?;

        let frame = self.read_buffer.split_to(frame_len).freeze();
        let expected = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let body = frame.slice(CHECKSUM_LEN..);
        let actual = crc32fast::hash(&body);
        if actual != expected {
            return Err(CodecError::corrupt(format!(
                "checksum mismatch: frame carries {expected:#010x}, body hashes to {actual:#010x}"
            )));
        }
        Ok(body)
    }

    /// Shut the write side down. Used on every connection exit path.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
