//! Frame transport.
//!
//! A frame is a varint length followed by exactly that many bytes. Headers
//! travel as frames; the body that follows a header is written raw, its
//! length carried by the header itself.
//!
//! All helpers loop over partial reads and writes. Transient errors
//! (`Interrupted`, `WouldBlock`) are retried, anything else aborts the
//! operation and is returned unchanged.

use std::io;

use bytes::Bytes;
use crc32fast::Hasher;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::ProtocolError;
use crate::varint::{self, MAX_VARINT_LEN64};

/// Maximum size of a received frame (16 MiB).
pub const MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

/// Chunk size used when draining unwanted bytes.
const DISCARD_CHUNK: usize = 8 * 1024;

/// Growth step when reading a body of peer-declared length.
const BODY_CHUNK: usize = 64 * 1024;

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Write all of `data`, retrying short writes and transient errors.
///
/// # Errors
///
/// Returns the first non-transient error, or `WriteZero` if the stream
/// stops accepting bytes.
pub async fn write_full<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    while written < data.len() {
        match writer.write(&data[written..]).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "stream closed while writing",
                ))
            }
            Ok(n) => written += n,
            Err(e) if is_transient(&e) => {
                trace!(error = %e, written, "Retrying transient write error");
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Fill all of `buf`, retrying short reads and transient errors.
///
/// # Errors
///
/// Returns the first non-transient error, or `UnexpectedEof` if the stream
/// ends before `buf` is full.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if is_transient(&e) => {
                trace!(error = %e, filled, "Retrying transient read error");
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Consume and drop exactly `len` bytes.
///
/// # Errors
///
/// Returns an error if the stream fails or ends early.
pub async fn discard<R>(reader: &mut R, len: u64) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; DISCARD_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(DISCARD_CHUNK as u64) as usize;
        read_full(reader, &mut scratch[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Read exactly `len` bytes into a new buffer.
///
/// The buffer grows a chunk at a time as bytes arrive, so a peer that
/// declares a huge length but sends little costs little memory.
///
/// # Errors
///
/// Returns an error if the stream fails or ends early.
pub async fn read_body<R>(reader: &mut R, len: u64) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::with_capacity(len.min(BODY_CHUNK as u64) as usize);
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(BODY_CHUNK as u64) as usize;
        let start = body.len();
        body.resize(start + n, 0);
        read_full(reader, &mut body[start..]).await?;
        remaining -= n as u64;
    }
    Ok(body)
}

/// Write `payload` as one frame.
///
/// An empty payload is legal and writes a single zero length byte.
///
/// # Errors
///
/// Returns an error if the stream fails.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut prefix = [0u8; MAX_VARINT_LEN64];
    let n = varint::encode_uvarint(payload.len() as u64, &mut prefix);
    write_full(writer, &prefix[..n]).await?;
    if !payload.is_empty() {
        write_full(writer, payload).await?;
    }
    Ok(())
}

/// Read one frame.
///
/// A zero length frame yields an empty buffer, not an error.
///
/// # Errors
///
/// Returns an error if the stream fails, the length prefix is malformed, or
/// the declared length exceeds [`MAX_FRAME_SIZE`].
pub async fn recv_frame<R>(reader: &mut R) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_uvarint(reader).await?;
    if len == 0 {
        return Ok(Bytes::new());
    }
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len as usize];
    read_full(reader, &mut data).await?;
    trace!(len, "Received frame");
    Ok(Bytes::from(data))
}

async fn read_uvarint<R>(reader: &mut R) -> Result<u64, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut value = 0u64;
    let mut byte = [0u8; 1];
    for index in 0..MAX_VARINT_LEN64 {
        read_full(reader, &mut byte).await?;
        if varint::accumulate(&mut value, index, byte[0])? {
            return Ok(value);
        }
    }
    Err(ProtocolError::Decode("varint overflows u64"))
}

/// CRC32 (IEEE) of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that hands out one byte per call and fails every other call
    /// with `Interrupted`.
    struct Stuttering {
        data: Vec<u8>,
        pos: usize,
        interrupt: bool,
    }

    impl AsyncRead for Stuttering {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Poll::Ready(Err(io::ErrorKind::Interrupted.into()));
            }
            if self.pos < self.data.len() {
                let byte = self.data[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that accepts one byte per call and fails every other call with
    /// `Interrupted`.
    #[derive(Default)]
    struct Trickle {
        data: Vec<u8>,
        interrupt: bool,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Poll::Ready(Err(io::ErrorKind::Interrupted.into()));
            }
            self.data.push(buf[0]);
            Poll::Ready(Ok(1))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let mut wire = Vec::new();
        send_frame(&mut wire, b"hello").await.unwrap();
        send_frame(&mut wire, b"").await.unwrap();
        send_frame(&mut wire, &[7u8; 300]).await.unwrap();

        assert_eq!(&wire[..6], &[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(wire[6], 0x00);
        assert_eq!(&wire[7..9], &[0xac, 0x02]);

        let mut reader = &wire[..];
        assert_eq!(&recv_frame(&mut reader).await.unwrap()[..], b"hello");
        assert!(recv_frame(&mut reader).await.unwrap().is_empty());
        assert_eq!(recv_frame(&mut reader).await.unwrap().len(), 300);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_partial_io_is_retried() {
        let mut writer = Trickle::default();
        send_frame(&mut writer, b"partial").await.unwrap();

        let mut reader = Stuttering {
            data: writer.data,
            pos: 0,
            interrupt: false,
        };
        let frame = recv_frame(&mut reader).await.unwrap();
        assert_eq!(&frame[..], b"partial");
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let wire = [0x05, b'h', b'e'];
        let mut reader = &wire[..];
        match recv_frame(&mut reader).await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected UnexpectedEof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let mut wire = Vec::new();
        varint::put_uvarint(&mut wire, MAX_FRAME_SIZE + 1);
        let mut reader = &wire[..];
        assert!(matches!(
            recv_frame(&mut reader).await,
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_stops_at_boundary() {
        let mut wire = vec![1u8; 20_000];
        send_frame(&mut wire, b"next").await.unwrap();

        let mut reader = &wire[..];
        discard(&mut reader, 20_000).await.unwrap();
        assert_eq!(&recv_frame(&mut reader).await.unwrap()[..], b"next");
    }

    #[tokio::test]
    async fn test_read_body_spans_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(BODY_CHUNK * 2 + 17).collect();
        let mut wire = data.clone();
        wire.extend_from_slice(b"tail");

        let mut reader = &wire[..];
        let body = read_body(&mut reader, data.len() as u64).await.unwrap();
        assert_eq!(body, data);
        assert_eq!(reader, &b"tail"[..]);
    }

    #[tokio::test]
    async fn test_read_body_declared_larger_than_stream() {
        let wire = [1u8; 100];
        let mut reader = &wire[..];
        match read_body(&mut reader, u64::from(u32::MAX)).await {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            Ok(body) => panic!("Expected UnexpectedEof, got {} bytes", body.len()),
        }
    }

    #[test]
    fn test_checksum_ieee() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"123456789"), 0xcbf4_3926);
    }
}
