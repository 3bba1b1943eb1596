//! Client codec over a byte stream.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tern_protocol::{
    checksum, discard, read_body, recv_frame, send_frame, write_full, CompressType, Compressor,
    Header, ProtocolError, RequestHeader, ResponseHeader,
};
use tokio::io::{
    split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::CodecError;
use crate::lifecycle::Lifecycle;
use crate::pool::HeaderPool;
use crate::serializer::{MsgPackSerializer, Serializer};
use crate::traits::{ClientCodec, Request, Response};
use crate::verify_checksum;

/// Read side of the stream plus the header most recently read from it.
struct ResponseReader<R> {
    stream: BufReader<R>,
    header: ResponseHeader,
    /// The next body step drains instead of decoding.
    skip_body: bool,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    /// Read the body described by the current header and verify it.
    async fn take_body(&mut self) -> Result<(CompressType, Vec<u8>), CodecError> {
        let compress_type = self.header.compress_type;
        let expected = self.header.checksum;
        let len = u64::from(self.header.response_len);
        self.consume();

        let body = read_body(&mut self.stream, len).await?;
        verify_checksum(expected, &body)?;
        Ok((compress_type, body))
    }

    /// Drop the body described by the current header.
    async fn drain(&mut self) -> Result<(), CodecError> {
        let len = u64::from(self.header.response_len);
        self.consume();
        discard(&mut self.stream, len).await?;
        Ok(())
    }

    // A body can only be read once; afterwards the body step is a no-op.
    fn consume(&mut self) {
        self.header.reset();
        self.skip_body = true;
    }
}

/// Removes a pending entry unless the request made it onto the wire.
struct Registration<'a> {
    pending: &'a DashMap<u64, String>,
    seq: u64,
    sent: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.sent {
            self.pending.remove(&self.seq);
        }
    }
}

/// Client codec writing requests to and reading responses from one stream.
///
/// Requests are tagged with the caller's sequence number, which travels on
/// the wire as the request ID and comes back in the matching response.
///
/// Dropping a request or response future part way through a frame closes
/// the codec, as does [`close`](ClientCodec::close), which also wakes any
/// operation blocked on the peer.
pub struct StreamClientCodec<IO, Z = MsgPackSerializer> {
    reader: Mutex<ResponseReader<ReadHalf<IO>>>,
    writer: Mutex<BufWriter<WriteHalf<IO>>>,
    compress_type: CompressType,
    serializer: Z,
    /// Wire ID -> method, for requests still awaiting a response.
    pending: DashMap<u64, String>,
    headers: HeaderPool<RequestHeader>,
    lifecycle: Lifecycle,
    shut_down: AtomicBool,
}

impl<IO> StreamClientCodec<IO, MsgPackSerializer>
where
    IO: AsyncRead + AsyncWrite + Send,
{
    /// Create a codec that compresses request bodies with `compress_type`
    /// and encodes them as MessagePack.
    pub fn new(io: IO, compress_type: CompressType) -> Self {
        Self::with_serializer(io, compress_type, MsgPackSerializer)
    }
}

impl<IO, Z> StreamClientCodec<IO, Z>
where
    IO: AsyncRead + AsyncWrite + Send,
    Z: Serializer,
{
    /// Create a codec with an explicit serializer.
    ///
    /// An unregistered `compress_type` is accepted here; every
    /// [`write_request`](ClientCodec::write_request) will then fail.
    pub fn with_serializer(io: IO, compress_type: CompressType, serializer: Z) -> Self {
        let (read_half, write_half) = split(io);
        debug!(
            compress = %compress_type,
            serializer = serializer.name(),
            "Creating client codec"
        );
        Self {
            reader: Mutex::new(ResponseReader {
                stream: BufReader::new(read_half),
                header: ResponseHeader::default(),
                skip_body: true,
            }),
            writer: Mutex::new(BufWriter::new(write_half)),
            compress_type,
            serializer,
            pending: DashMap::new(),
            headers: HeaderPool::new(),
            lifecycle: Lifecycle::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Compression applied to outgoing requests.
    #[must_use]
    pub fn compress_type(&self) -> CompressType {
        self.compress_type
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Whether the codec was closed, explicitly or by abandoned I/O.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    async fn send_request<T>(&self, request: &Request, body: &T) -> Result<(), CodecError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let compressor = Compressor::lookup(self.compress_type)?;
        let payload = self.serializer.marshal(body)?;
        let body = compressor.compress(&payload)?;
        let request_len =
            u32::try_from(body.len()).map_err(|_| ProtocolError::BodyTooLarge(body.len()))?;

        let header = {
            let mut header = self.headers.acquire();
            header.compress_type = self.compress_type;
            header.method.push_str(&request.method);
            header.id = request.seq;
            header.request_len = request_len;
            header.checksum = checksum(&body);
            header.marshal()
        };

        // One lock for header and body keeps concurrent calls from interleaving.
        let mut writer = self.writer.lock().await;
        let in_flight = self.lifecycle.in_flight();
        let sent: Result<(), CodecError> = async {
            send_frame(&mut *writer, &header).await?;
            write_full(&mut *writer, &body).await?;
            writer.flush().await?;
            Ok(())
        }
        .await;
        // A failed write leaves a partial frame behind; only success disarms.
        if sent.is_ok() {
            in_flight.done();
        }
        sent?;

        trace!(
            seq = request.seq,
            method = %request.method,
            len = request_len,
            "Sent request"
        );
        Ok(())
    }
}

#[async_trait]
impl<IO, Z> ClientCodec for StreamClientCodec<IO, Z>
where
    IO: AsyncRead + AsyncWrite + Send,
    Z: Serializer,
{
    async fn write_request<T>(&self, request: &Request, body: &T) -> Result<(), CodecError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.lifecycle
            .abortable(async {
                self.pending.insert(request.seq, request.method.clone());
                let mut registration = Registration {
                    pending: &self.pending,
                    seq: request.seq,
                    sent: false,
                };

                if let Err(e) = self.send_request(request, body).await {
                    debug!(seq = request.seq, error = %e, "Request not sent");
                    return Err(e);
                }
                registration.sent = true;
                Ok(())
            })
            .await
    }

    async fn read_response_header(&self) -> Result<Response, CodecError> {
        self.lifecycle
            .abortable(async {
                let mut reader = self.reader.lock().await;
                let reader = &mut *reader;
                reader.header.reset();
                reader.skip_body = true;

                let in_flight = self.lifecycle.in_flight();
                let frame = recv_frame(&mut reader.stream).await;
                in_flight.done();
                reader.header.unmarshal(&frame?)?;

                let id = reader.header.id;
                let Some((_, method)) = self.pending.remove(&id) else {
                    warn!(id, "Response for unknown request");
                    return Err(CodecError::InvalidSequence(id));
                };

                let error = reader
                    .header
                    .has_error()
                    .then(|| reader.header.error.clone());
                reader.skip_body = error.is_some();

                trace!(seq = id, method = %method, failed = error.is_some(), "Read response header");
                Ok(Response {
                    method,
                    seq: id,
                    error,
                })
            })
            .await
    }

    async fn read_response_body<T>(&self) -> Result<Option<T>, CodecError>
    where
        T: DeserializeOwned + Send,
    {
        self.lifecycle
            .abortable(async {
                let mut reader = self.reader.lock().await;
                let in_flight = self.lifecycle.in_flight();
                if reader.skip_body {
                    let drained = reader.drain().await;
                    in_flight.done();
                    return drained.map(|()| None);
                }

                let taken = reader.take_body().await;
                in_flight.done();
                let (compress_type, body) = taken?;
                let payload = Compressor::lookup(compress_type)?.decompress(&body)?;
                Ok(Some(self.serializer.unmarshal(&payload)?))
            })
            .await
    }

    async fn discard_response_body(&self) -> Result<(), CodecError> {
        self.lifecycle
            .abortable(async {
                let mut reader = self.reader.lock().await;
                let in_flight = self.lifecycle.in_flight();
                let drained = reader.drain().await;
                in_flight.done();
                drained
            })
            .await
    }

    async fn close(&self) -> Result<(), CodecError> {
        self.lifecycle.close();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Operations woken by the close release the writer promptly. Buffered
        // bytes of an abandoned frame are dropped, not flushed.
        let mut writer = self.writer.lock().await;
        writer.get_mut().shutdown().await?;
        debug!(pending = self.pending.len(), "Client codec closed");
        Ok(())
    }
}
