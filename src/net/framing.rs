//! Length-prefixed framing for the simulation socket
//!
//! A frame is a `u32` little-endian byte count followed by that many payload
//! bytes. The first payload byte is a `MessageType` discriminant; binary
//! bodies after it (tick updates) use big-endian integers, which is what
//! [`PayloadReader`] and [`PayloadWriter`] speak.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_MESSAGE_SIZE;

const PREFIX_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FramingError {
    fn from(e: io::Error) -> Self {
        // A peer vanishing mid-frame is a plain disconnect
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FramingError::ConnectionClosed
        } else {
            FramingError::Io(e)
        }
    }
}

/// Read half of a framed connection
///
/// Keeps one payload buffer alive for the whole connection; ticks arrive
/// many times a second and are decoded in place.
pub struct FrameStream<R> {
    inner: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameStream<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_MESSAGE_SIZE)
    }

    pub fn with_limit(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_len,
        }
    }

    /// Wait for the next complete frame
    ///
    /// An oversized prefix leaves the stream unsynchronised, so callers
    /// must drop the connection on `Oversized`.
    pub async fn next_frame(&mut self) -> Result<&[u8], FramingError> {
        let mut prefix = [0u8; PREFIX_LEN];
        self.inner.read_exact(&mut prefix).await?;

        let len = u32::from_le_bytes(prefix) as usize;
        if len > self.max_len {
            return Err(FramingError::Oversized { len, max: self.max_len });
        }

        self.buf.resize(len, 0);
        self.inner.read_exact(&mut self.buf).await?;
        Ok(&self.buf)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Write one frame and flush it
///
/// Prefix and payload go out in a single write so a tick is never split
/// across segments by the framing layer.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> Result<(), FramingError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n as usize <= MAX_MESSAGE_SIZE)
        .ok_or(FramingError::Oversized {
            len: payload.len(),
            max: MAX_MESSAGE_SIZE,
        })?;

    let mut out = Vec::with_capacity(PREFIX_LEN + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}

/// Big-endian cursor over a frame body
///
/// Reads past the end yield `None` and leave the cursor where it was.
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let bytes: [u8; N] = self.data.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(bytes)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_be_bytes)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_be_bytes)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len())?;
        self.pos = end;
        Some(())
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Big-endian encoder for frame bodies
#[derive(Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_share_one_buffer() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        write_frame(&mut tx, b"\x00{\"battleCommand\":\"BATTLE:END\"}").await.unwrap();
        write_frame(&mut tx, &[]).await.unwrap();
        write_frame(&mut tx, &[1, 9]).await.unwrap();
        drop(tx);

        let mut frames = FrameStream::new(rx);
        assert_eq!(frames.next_frame().await.unwrap()[0], 0);
        assert!(frames.next_frame().await.unwrap().is_empty());
        assert_eq!(frames.next_frame().await.unwrap(), &[1, 9]);
        assert!(matches!(frames.next_frame().await, Err(FramingError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_prefix_is_little_endian() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[7; 300]).await.unwrap();
        assert_eq!(&wire[..PREFIX_LEN], &[0x2C, 0x01, 0, 0]);
        assert_eq!(wire.len(), PREFIX_LEN + 300);
    }

    #[tokio::test]
    async fn test_oversized_frames_rejected_both_ways() {
        let mut wire = Vec::new();
        let result = write_frame(&mut wire, &vec![0u8; MAX_MESSAGE_SIZE + 1]).await;
        assert!(matches!(result, Err(FramingError::Oversized { .. })));
        assert!(wire.is_empty());

        wire.extend_from_slice(&17u32.to_le_bytes());
        wire.extend_from_slice(&[0; 17]);
        let mut frames = FrameStream::with_limit(wire.as_slice(), 16);
        assert!(matches!(
            frames.next_frame().await,
            Err(FramingError::Oversized { len: 17, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_mid_frame() {
        let mut wire = 10u32.to_le_bytes().to_vec();
        wire.extend_from_slice(&[1, 2, 3]);

        let mut frames = FrameStream::new(wire.as_slice());
        assert!(matches!(frames.next_frame().await, Err(FramingError::ConnectionClosed)));
    }

    #[test]
    fn test_payload_integers_are_big_endian() {
        let mut w = PayloadWriter::default();
        w.u8(7).i32(-1200).u32(1500);
        let body = w.finish();
        assert_eq!(&body[1..5], &(-1200i32).to_be_bytes());

        let mut r = PayloadReader::new(&body);
        assert_eq!(r.u8(), Some(7));
        assert_eq!(r.i32(), Some(-1200));
        assert_eq!(r.u32(), Some(1500));
        assert_eq!(r.position(), body.len());
    }

    #[test]
    fn test_short_read_keeps_position() {
        let mut r = PayloadReader::new(&[1, 2, 3]);
        assert!(r.skip(2).is_some());
        assert!(r.u32().is_none());
        assert!(r.skip(5).is_none());
        assert_eq!(r.position(), 2);
        assert_eq!(r.u8(), Some(3));
        assert!(r.u8().is_none());
    }
}
