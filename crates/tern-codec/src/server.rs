//! Server codec over a byte stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

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
use tracing::{debug, trace};

use crate::error::CodecError;
use crate::lifecycle::Lifecycle;
use crate::pool::HeaderPool;
use crate::serializer::{MsgPackSerializer, Serializer};
use crate::traits::{Request, Response, ServerCodec};
use crate::verify_checksum;

/// What the server must remember to answer a request.
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    /// ID the client put on the wire.
    id: u64,
    /// Compression the client chose; the response uses the same.
    compress_type: CompressType,
}

struct RequestReader<R> {
    stream: BufReader<R>,
    header: RequestHeader,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    async fn take_body(&mut self) -> Result<(CompressType, Vec<u8>), CodecError> {
        let compress_type = self.header.compress_type;
        let expected = self.header.checksum;
        let len = u64::from(self.header.request_len);
        self.header.reset();

        let body = read_body(&mut self.stream, len).await?;
        verify_checksum(expected, &body)?;
        Ok((compress_type, body))
    }

    async fn drain(&mut self) -> Result<(), CodecError> {
        let len = u64::from(self.header.request_len);
        self.header.reset();
        discard(&mut self.stream, len).await?;
        Ok(())
    }
}

/// Server codec reading requests from and writing responses to one stream.
///
/// Each request header read is assigned a local sequence number, starting
/// at 1. The client's own request ID is kept aside and echoed back in the
/// response, so clients never see server sequence numbers.
///
/// Like the client codec, abandoning a frame part way closes the codec and
/// [`close`](ServerCodec::close) wakes blocked operations.
pub struct StreamServerCodec<IO, Z = MsgPackSerializer> {
    reader: Mutex<RequestReader<ReadHalf<IO>>>,
    writer: Mutex<BufWriter<WriteHalf<IO>>>,
    serializer: Z,
    seq: AtomicU64,
    /// Local sequence -> request awaiting a response.
    pending: DashMap<u64, PendingRequest>,
    headers: HeaderPool<ResponseHeader>,
    lifecycle: Lifecycle,
    shut_down: AtomicBool,
}

impl<IO> StreamServerCodec<IO, MsgPackSerializer>
where
    IO: AsyncRead + AsyncWrite + Send,
{
    /// Create a codec that decodes bodies as MessagePack.
    pub fn new(io: IO) -> Self {
        Self::with_serializer(io, MsgPackSerializer)
    }
}

impl<IO, Z> StreamServerCodec<IO, Z>
where
    IO: AsyncRead + AsyncWrite + Send,
    Z: Serializer,
{
    /// Create a codec with an explicit serializer.
    pub fn with_serializer(io: IO, serializer: Z) -> Self {
        let (read_half, write_half) = split(io);
        Self {
            reader: Mutex::new(RequestReader {
                stream: BufReader::new(read_half),
                header: RequestHeader::default(),
            }),
            writer: Mutex::new(BufWriter::new(write_half)),
            serializer,
            seq: AtomicU64::new(0),
            pending: DashMap::new(),
            headers: HeaderPool::new(),
            lifecycle: Lifecycle::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of requests read but not yet answered.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Whether the codec was closed, explicitly or by abandoned I/O.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }
}

#[async_trait]
impl<IO, Z> ServerCodec for StreamServerCodec<IO, Z>
where
    IO: AsyncRead + AsyncWrite + Send,
    Z: Serializer,
{
    async fn read_request_header(&self) -> Result<Request, CodecError> {
        self.lifecycle
            .abortable(async {
                let mut reader = self.reader.lock().await;
                let reader = &mut *reader;
                reader.header.reset();

                let in_flight = self.lifecycle.in_flight();
                let frame = recv_frame(&mut reader.stream).await;
                in_flight.done();
                reader.header.unmarshal(&frame?)?;

                let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
                self.pending.insert(
                    seq,
                    PendingRequest {
                        id: reader.header.id,
                        compress_type: reader.header.compress_type,
                    },
                );

                trace!(
                    seq,
                    id = reader.header.id,
                    method = %reader.header.method,
                    compress = %reader.header.compress_type,
                    "Read request header"
                );
                Ok(Request {
                    method: reader.header.method.clone(),
                    seq,
                })
            })
            .await
    }

    async fn read_request_body<T>(&self) -> Result<T, CodecError>
    where
        T: DeserializeOwned + Send,
    {
        self.lifecycle
            .abortable(async {
                let mut reader = self.reader.lock().await;
                let in_flight = self.lifecycle.in_flight();
                let taken = reader.take_body().await;
                in_flight.done();
                drop(reader);

                let (compress_type, body) = taken?;
                let payload = Compressor::lookup(compress_type)?.decompress(&body)?;
                Ok(self.serializer.unmarshal(&payload)?)
            })
            .await
    }

    async fn discard_request_body(&self) -> Result<(), CodecError> {
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

    async fn write_response<T>(&self, response: &Response, body: Option<&T>) -> Result<(), CodecError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.lifecycle
            .abortable(self.send_response(response, body))
            .await
    }

    async fn close(&self) -> Result<(), CodecError> {
        self.lifecycle.close();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.get_mut().shutdown().await?;
        debug!(unanswered = self.pending.len(), "Server codec closed");
        Ok(())
    }
}

impl<IO, Z> StreamServerCodec<IO, Z>
where
    IO: AsyncRead + AsyncWrite + Send,
    Z: Serializer,
{
    async fn send_response<T>(&self, response: &Response, body: Option<&T>) -> Result<(), CodecError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let Some((seq, pending)) = self.pending.remove(&response.seq) else {
            return Err(CodecError::InvalidSequence(response.seq));
        };
        // The call is answered from here on, even if answering fails.
        let compressor = Compressor::lookup(pending.compress_type)?;

        // Failed calls carry no body.
        let payload = match (&response.error, body) {
            (None, Some(body)) => match self.serializer.marshal(body) {
                Ok(payload) => payload,
                Err(e) => {
                    // Nothing was written; the caller may still send an error.
                    self.pending.insert(seq, pending);
                    return Err(e.into());
                }
            },
            _ => Vec::new(),
        };
        let body = compressor.compress(&payload)?;
        let response_len =
            u32::try_from(body.len()).map_err(|_| ProtocolError::BodyTooLarge(body.len()))?;

        let header = {
            let mut header = self.headers.acquire();
            header.compress_type = pending.compress_type;
            header.id = pending.id;
            if let Some(error) = &response.error {
                header.error.push_str(error);
            }
            header.response_len = response_len;
            header.checksum = checksum(&body);
            header.marshal()
        };

        let mut writer = self.writer.lock().await;
        let in_flight = self.lifecycle.in_flight();
        let sent: Result<(), CodecError> = async {
            send_frame(&mut *writer, &header).await?;
            write_full(&mut *writer, &body).await?;
            writer.flush().await?;
            Ok(())
        }
        .await;
        if sent.is_ok() {
            in_flight.done();
        }
        sent?;

        trace!(
            seq = response.seq,
            id = pending.id,
            len = response_len,
            failed = response.error.is_some(),
            "Sent response"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StreamClientCodec;
    use crate::serializer::JsonSerializer;
    use crate::traits::ClientCodec;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Args {
        a: i32,
        b: i32,
    }

    fn server() -> (StreamServerCodec<DuplexStream>, DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        (StreamServerCodec::new(local), remote)
    }

    /// Write a request the way a client would, with a chosen checksum.
    async fn send_raw_request(remote: &mut DuplexStream, header: &RequestHeader, body: &[u8]) {
        send_frame(remote, &header.marshal()).await.unwrap();
        write_full(remote, body).await.unwrap();
    }

    async fn read_raw_response(remote: &mut DuplexStream) -> (ResponseHeader, Vec<u8>) {
        let frame = recv_frame(remote).await.unwrap();
        let mut header = ResponseHeader::default();
        header.unmarshal(&frame).unwrap();
        let mut body = vec![0u8; header.response_len as usize];
        remote.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    #[tokio::test]
    async fn test_add_roundtrip_each_compressor() {
        for compressor in Compressor::ALL {
            let (client_io, server_io) = duplex(64 * 1024);
            let client = StreamClientCodec::new(client_io, compressor.compress_type());
            let server = StreamServerCodec::new(server_io);

            client
                .write_request(&Request::new("Arith.Add", 12455), &Args { a: 1, b: 2 })
                .await
                .unwrap();

            let request = server.read_request_header().await.unwrap();
            assert_eq!(request.method, "Arith.Add");
            assert_eq!(request.seq, 1);
            let args: Args = server.read_request_body().await.unwrap();
            assert_eq!(args, Args { a: 1, b: 2 });

            let sum = args.a + args.b;
            server
                .write_response(&Response::ok(&request), Some(&sum))
                .await
                .unwrap();

            let response = client.read_response_header().await.unwrap();
            assert_eq!(response.seq, 12455, "{}", compressor.name());
            assert_eq!(response.method, "Arith.Add");
            assert_eq!(response.error, None);
            assert_eq!(client.read_response_body::<i32>().await.unwrap(), Some(3));
        }
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let (client_io, server_io) = duplex(64 * 1024);
        let client =
            StreamClientCodec::with_serializer(client_io, CompressType::ZLIB, JsonSerializer);
        let server = StreamServerCodec::with_serializer(server_io, JsonSerializer);

        client
            .write_request(&Request::new("Echo.Say", 1), "hello")
            .await
            .unwrap();
        let request = server.read_request_header().await.unwrap();
        let text: String = server.read_request_body().await.unwrap();
        server
            .write_response(&Response::ok(&request), Some(text.as_str()))
            .await
            .unwrap();

        client.read_response_header().await.unwrap();
        assert_eq!(
            client.read_response_body::<String>().await.unwrap().as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn test_sequences_are_local_and_ids_echoed() {
        let (server, mut remote) = server();
        for id in [500, 7] {
            let body = MsgPackSerializer.marshal(&Args { a: 0, b: 0 }).unwrap();
            let header = RequestHeader {
                method: "Arith.Add".to_string(),
                id,
                request_len: body.len() as u32,
                ..RequestHeader::default()
            };
            send_raw_request(&mut remote, &header, &body).await;
        }

        let first = server.read_request_header().await.unwrap();
        server.discard_request_body().await.unwrap();
        let second = server.read_request_header().await.unwrap();
        server.discard_request_body().await.unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(server.pending_requests(), 2);

        // Answer out of order.
        server
            .write_response(&Response::ok(&second), Some(&0i32))
            .await
            .unwrap();
        server
            .write_response(&Response::ok(&first), Some(&0i32))
            .await
            .unwrap();
        assert_eq!(read_raw_response(&mut remote).await.0.id, 7);
        assert_eq!(read_raw_response(&mut remote).await.0.id, 500);
        assert_eq!(server.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_response_uses_request_compressor() {
        let (server, mut remote) = server();
        let body = Compressor::Snappy
            .compress(&MsgPackSerializer.marshal(&Args { a: 2, b: 3 }).unwrap())
            .unwrap();
        let header = RequestHeader {
            compress_type: CompressType::SNAPPY,
            method: "Arith.Mul".to_string(),
            id: 1,
            request_len: body.len() as u32,
            checksum: checksum(&body),
        };
        send_raw_request(&mut remote, &header, &body).await;

        let request = server.read_request_header().await.unwrap();
        let args: Args = server.read_request_body().await.unwrap();
        server
            .write_response(&Response::ok(&request), Some(&(args.a * args.b)))
            .await
            .unwrap();

        let (header, body) = read_raw_response(&mut remote).await;
        assert_eq!(header.compress_type, CompressType::SNAPPY);
        assert_eq!(header.checksum, checksum(&body));
        let product: i32 = MsgPackSerializer
            .unmarshal(&Compressor::Snappy.decompress(&body).unwrap())
            .unwrap();
        assert_eq!(product, 6);
    }

    #[tokio::test]
    async fn test_flipped_byte_is_checksum_mismatch() {
        let (server, mut remote) = server();
        let mut body = MsgPackSerializer.marshal(&Args { a: 1, b: 2 }).unwrap();
        let header = RequestHeader {
            method: "Arith.Add".to_string(),
            id: 1,
            request_len: body.len() as u32,
            checksum: checksum(&body),
            ..RequestHeader::default()
        };
        body[1] ^= 0x80;
        send_raw_request(&mut remote, &header, &body).await;

        server.read_request_header().await.unwrap();
        match server.read_request_body::<Args>().await {
            Err(CodecError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, header.checksum);
                assert_eq!(actual, checksum(&body));
            }
            other => panic!("Expected ChecksumMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_checksum_skips_verification() {
        let (server, mut remote) = server();
        let body = MsgPackSerializer.marshal(&Args { a: 4, b: 5 }).unwrap();
        let header = RequestHeader {
            method: "Arith.Add".to_string(),
            id: 1,
            request_len: body.len() as u32,
            checksum: 0,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, &body).await;

        server.read_request_header().await.unwrap();
        let args: Args = server.read_request_body().await.unwrap();
        assert_eq!(args, Args { a: 4, b: 5 });
    }

    #[tokio::test]
    async fn test_unknown_request_compressor() {
        let (server, mut remote) = server();
        let body = b"opaque".to_vec();
        let header = RequestHeader {
            compress_type: CompressType(99),
            method: "Arith.Add".to_string(),
            id: 1,
            request_len: body.len() as u32,
            checksum: checksum(&body),
        };
        send_raw_request(&mut remote, &header, &body).await;

        let request = server.read_request_header().await.unwrap();
        assert!(matches!(
            server.read_request_body::<Args>().await,
            Err(CodecError::Protocol(ProtocolError::UnknownCompressor(CompressType(99))))
        ));
        assert!(matches!(
            server
                .write_response(&Response::failed(&request, "unsupported"), None::<&()>)
                .await,
            Err(CodecError::Protocol(ProtocolError::UnknownCompressor(CompressType(99))))
        ));
        // The call is settled even though no reply could be encoded.
        assert_eq!(server.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_discard_keeps_stream_aligned() {
        let (server, mut remote) = server();
        let big = vec![0x5au8; 20_000];
        let header = RequestHeader {
            method: "Blob.Put".to_string(),
            id: 1,
            request_len: big.len() as u32,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, &big).await;

        let body = MsgPackSerializer.marshal(&Args { a: 1, b: 1 }).unwrap();
        let header = RequestHeader {
            method: "Arith.Add".to_string(),
            id: 2,
            request_len: body.len() as u32,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, &body).await;

        assert_eq!(server.read_request_header().await.unwrap().method, "Blob.Put");
        server.discard_request_body().await.unwrap();
        assert_eq!(server.read_request_header().await.unwrap().method, "Arith.Add");
        let args: Args = server.read_request_body().await.unwrap();
        assert_eq!(args, Args { a: 1, b: 1 });
    }

    #[tokio::test]
    async fn test_unknown_sequence_rejected() {
        let (server, _remote) = server();
        let response = Response {
            method: "Arith.Add".to_string(),
            seq: 41,
            error: None,
        };
        assert!(matches!(
            server.write_response(&response, Some(&1i32)).await,
            Err(CodecError::InvalidSequence(41))
        ));
    }

    #[tokio::test]
    async fn test_error_response_has_no_payload() {
        let (server, mut remote) = server();
        let header = RequestHeader {
            method: "Arith.Div".to_string(),
            id: 3,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, &[]).await;

        let request = server.read_request_header().await.unwrap();
        server.discard_request_body().await.unwrap();
        server
            .write_response(&Response::failed(&request, "divide by zero"), Some(&0i32))
            .await
            .unwrap();

        let (header, body) = read_raw_response(&mut remote).await;
        assert_eq!(header.id, 3);
        assert_eq!(header.error, "divide by zero");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_interleave() {
        let (client_io, server_io) = duplex(1024);
        let client = Arc::new(StreamClientCodec::new(client_io, CompressType::GZIP));
        let server = StreamServerCodec::new(server_io);

        let writers: Vec<_> = (0..16u64)
            .map(|seq| {
                let client = Arc::clone(&client);
                tokio::spawn(async move {
                    let args = Args {
                        a: seq as i32,
                        b: seq as i32,
                    };
                    client
                        .write_request(&Request::new(format!("Call.{}", seq), seq), &args)
                        .await
                        .unwrap();
                })
            })
            .collect();

        for _ in 0..16 {
            let request = server.read_request_header().await.unwrap();
            let args: Args = server.read_request_body().await.unwrap();
            assert_eq!(request.method, format!("Call.{}", args.a));
            assert_eq!(args.a, args.b);
        }
        for writer in writers {
            writer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_then_peer_sees_eof() {
        let (server, mut remote) = server();
        server.close().await.unwrap();
        assert!(matches!(
            server.read_request_header().await,
            Err(CodecError::Closed)
        ));
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_serializer_failure_keeps_call_pending() {
        use std::collections::HashMap;

        let (local, mut remote) = duplex(64 * 1024);
        let server = StreamServerCodec::with_serializer(local, JsonSerializer);
        let header = RequestHeader {
            method: "Map.Get".to_string(),
            id: 9,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, &[]).await;
        let request = server.read_request_header().await.unwrap();
        server.discard_request_body().await.unwrap();

        // JSON object keys must be strings.
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);
        assert!(matches!(
            server.write_response(&Response::ok(&request), Some(&bad)).await,
            Err(CodecError::Serializer(_))
        ));
        assert_eq!(server.pending_requests(), 1);

        server
            .write_response::<()>(&Response::failed(&request, "invalid reply"), None)
            .await
            .unwrap();
        assert_eq!(server.pending_requests(), 0);
        assert_eq!(read_raw_response(&mut remote).await.0.id, 9);
    }

    #[tokio::test]
    async fn test_cancelled_response_closes_codec() {
        let (local, mut remote) = duplex(256);
        let server = StreamServerCodec::new(local);
        let header = RequestHeader {
            method: "Blob.Get".to_string(),
            id: 1,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, &[]).await;
        let request = server.read_request_header().await.unwrap();
        server.discard_request_body().await.unwrap();

        let blob = vec![7u8; 64 * 1024];
        let cancelled = timeout(
            Duration::from_millis(50),
            server.write_response(&Response::ok(&request), Some(&blob)),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(server.is_closed());
        assert!(matches!(
            server.read_request_header().await,
            Err(CodecError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_interrupts_blocked_read() {
        let (local, _remote) = duplex(256);
        let server = Arc::new(StreamServerCodec::new(local));
        let reader = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.read_request_header().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        timeout(Duration::from_secs(2), server.close())
            .await
            .unwrap()
            .unwrap();
        let result = timeout(Duration::from_secs(2), reader).await.unwrap().unwrap();
        assert!(matches!(result, Err(CodecError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_declared_body_fails_at_eof() {
        let (server, mut remote) = server();
        let header = RequestHeader {
            method: "Blob.Put".to_string(),
            id: 1,
            request_len: u32::MAX,
            ..RequestHeader::default()
        };
        send_raw_request(&mut remote, &header, b"short").await;
        drop(remote);

        server.read_request_header().await.unwrap();
        match server.read_request_body::<Vec<u8>>().await {
            Err(CodecError::Protocol(ProtocolError::Io(e))) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("Expected UnexpectedEof, got {:?}", other),
        }
    }
}
