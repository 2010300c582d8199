//! # Length-Prefixed Framing
//!
//! Shared by every connection in the system so the wire format cannot drift
//! between tiers.
//!
//! ## Wire Format
//! ```text
//! ┌──────────────────────────┬──────────────────────────────────────┐
//! │ length: u32 (big-endian) │ payload: `length` bytes, opaque      │
//! └──────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! The payload is never inspected. A read that hits end-of-stream before the
//! first header byte is a clean disconnect (`Ok(None)`); end-of-stream
//! anywhere later is a truncated frame.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound for an incoming frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors from framing operations. All of them end the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer went away part-way through a length header.
    #[error("stream ended after {read} of {HEADER_LEN} header bytes")]
    TruncatedHeader { read: usize },

    /// The peer went away part-way through a payload.
    #[error("stream ended after {read} of {expected} payload bytes")]
    TruncatedPayload { read: usize, expected: usize },

    /// Announced or supplied length exceeds the limit.
    #[error("frame too large: {len} bytes (limit {max})")]
    TooLarge { len: usize, max: usize },
}

/// Prepends the big-endian length of `payload`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

// =============================================================================
// Reader
// =============================================================================

/// Reads whole frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_len(inner, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(inner: R, max_frame_len: usize) -> Self {
        FrameReader {
            inner,
            max_frame_len,
        }
    }

    /// Reads the next frame's payload.
    ///
    /// Returns `Ok(None)` on a clean disconnect between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        let read = self.fill(&mut header).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_LEN {
            return Err(FrameError::TruncatedHeader { read });
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len];
        let read = self.fill(&mut payload).await?;
        if read < len {
            return Err(FrameError::TruncatedPayload {
                read,
                expected: len,
            });
        }

        Ok(Some(payload))
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads until `buf` is full or the stream ends; returns bytes read.
    async fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Writes whole frames to a byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        FrameWriter { inner }
    }

    /// Writes one frame and flushes.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(payload)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts down the write direction; the peer sees end-of-stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields at most `chunk` bytes per read to force partial reads.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let end = (self.pos + self.chunk).min(self.data.len());
            let n = (end - self.pos).min(buf.remaining());
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_read_frame_roundtrip() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        let buf = writer.into_inner();

        let mut reader = FrameReader::new(Cursor::new(buf));
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"hello");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[test]
    fn test_encode_frame_header() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(frame, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_payload_containing_its_own_length_prefix() {
        // 8-byte payload whose first 4 bytes equal its encoded length
        let payload = vec![0, 0, 0, 8, 0, 0, 0, 8];
        let mut stream = encode_frame(&payload).unwrap();
        stream.extend(encode_frame(b"next").unwrap());

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), payload);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"next");
    }

    #[tokio::test]
    async fn test_partial_reads_are_reassembled() {
        let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let data = encode_frame(&payload).unwrap();

        let mut reader = FrameReader::new(Trickle {
            data,
            pos: 0,
            chunk: 3,
        });
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), payload);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_disconnect() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8, 0]));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { read: 2 }));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut data = 1000u32.to_be_bytes().to_vec();
        data.extend_from_slice(&[7u8; 10]);

        let mut reader = FrameReader::new(Cursor::new(data));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::TruncatedPayload {
                read: 10,
                expected: 1000
            }
        ));
    }

    #[tokio::test]
    async fn test_frame_over_limit_rejected_before_allocation() {
        let data = u32::MAX.to_be_bytes().to_vec();
        let mut reader = FrameReader::with_max_frame_len(Cursor::new(data), 16);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { max: 16, .. }));
        assert_eq!(reader.max_frame_len(), 16);
    }
}
