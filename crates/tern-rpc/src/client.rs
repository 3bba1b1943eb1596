//! Calling side of the dispatcher.
//!
//! A [`Client`] owns a codec and a background reader task. Each call
//! registers a typed completion slot under its sequence number, writes the
//! request, and waits. The reader task matches each response header to its
//! slot and lets the slot decode the body into the type the caller asked
//! for.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tern_codec::{ClientCodec, CodecError, Request, SerializerKind, StreamClientCodec};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::options::Options;

/// A client over TCP with runtime-selected serialization.
pub type TcpClient = Client<StreamClientCodec<TcpStream, SerializerKind>>;

/// A call waiting for its response.
#[async_trait]
trait PendingCall<C>: Send + Sync {
    /// Consume the response body and hand the result to the caller.
    ///
    /// Returns an error only if the stream can no longer be read.
    async fn complete(self: Box<Self>, codec: &C, error: Option<String>) -> Result<(), CodecError>;

    /// Fail the call without a response.
    fn abort(self: Box<Self>);
}

struct Slot<R> {
    tx: oneshot::Sender<Result<R, RpcError>>,
}

#[async_trait]
impl<C, R> PendingCall<C> for Slot<R>
where
    C: ClientCodec + 'static,
    R: DeserializeOwned + Send + 'static,
{
    async fn complete(self: Box<Self>, codec: &C, error: Option<String>) -> Result<(), CodecError> {
        let result = match codec.read_response_body::<R>().await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(RpcError::Remote(error.unwrap_or_default())),
            Err(e) if e.is_fatal() => {
                let _ = self.tx.send(Err(RpcError::Shutdown));
                return Err(e);
            }
            Err(e) => Err(RpcError::Codec(e)),
        };
        // The caller may have given up; nothing to do then.
        let _ = self.tx.send(result);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        let _ = self.tx.send(Err(RpcError::Shutdown));
    }
}

type Pending<C> = DashMap<u64, Box<dyn PendingCall<C>>>;

/// Removes a call's slot when the caller stops waiting for it.
struct Registered<'a, C> {
    pending: &'a Pending<C>,
    seq: u64,
}

impl<C> Drop for Registered<'_, C> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

/// Shared between the client handle and its reader task.
struct Shared<C> {
    codec: C,
    pending: Pending<C>,
    shutdown: AtomicBool,
}

impl<C> Shared<C> {
    /// Stop accepting calls and fail every call still waiting.
    fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let seqs: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for seq in seqs {
            if let Some((_, slot)) = self.pending.remove(&seq) {
                slot.abort();
            }
        }
    }
}

/// Issues calls over one codec.
pub struct Client<C: ClientCodec + 'static> {
    shared: Arc<Shared<C>>,
    next_seq: AtomicU64,
    reader: JoinHandle<()>,
}

impl<C: ClientCodec + 'static> Client<C> {
    /// Start a client over `codec`.
    ///
    /// Spawns the reader task, so this must run inside a Tokio runtime.
    pub fn new(codec: C) -> Self {
        let shared = Arc::new(Shared {
            codec,
            pending: DashMap::new(),
            shutdown: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared)));
        Self {
            shared,
            next_seq: AtomicU64::new(0),
            reader,
        }
    }

    /// Call `method` with `args` and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] if the handler failed,
    /// [`RpcError::Shutdown`] if the connection ended first, and
    /// [`RpcError::Codec`] if the call could not be sent or its reply could
    /// not be decoded as `R`.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(seq, Box::new(Slot::<R> { tx }));
        // Unregisters the call however it ends, including a dropped future.
        let _registered = Registered {
            pending: &self.shared.pending,
            seq,
        };

        // Checked after registering so a concurrent shutdown cannot miss us.
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }

        let request = Request::new(method, seq);
        self.shared.codec.write_request(&request, args).await?;

        rx.await.map_err(|_| RpcError::Shutdown)?
    }

    /// Number of calls waiting for a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether the client has stopped accepting calls.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Close the connection. Waiting and later calls fail with
    /// [`RpcError::Shutdown`].
    ///
    /// # Errors
    ///
    /// Returns an error if the codec fails to shut the stream down.
    pub async fn close(&self) -> Result<(), RpcError> {
        self.reader.abort();
        self.shared.shut_down();
        self.shared.codec.close().await?;
        Ok(())
    }
}

impl TcpClient {
    /// Dial `addr` and start a client with the given codec options.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Io`] if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs, options: Options) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(
            peer = ?stream.peer_addr().ok(),
            compress = %options.compress_type,
            serializer = %options.serializer,
            "Connected"
        );
        Ok(Self::new(StreamClientCodec::with_serializer(
            stream,
            options.compress_type,
            options.serializer,
        )))
    }
}

impl<C: ClientCodec + 'static> Drop for Client<C> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<C: ClientCodec + 'static>(shared: Arc<Shared<C>>) {
    let reason = loop {
        let response = match shared.codec.read_response_header().await {
            Ok(response) => response,
            Err(CodecError::InvalidSequence(seq)) => {
                warn!(seq, "Dropping response for unknown call");
                if let Err(e) = shared.codec.discard_response_body().await {
                    break e;
                }
                continue;
            }
            Err(e) => break e,
        };

        let Some((_, slot)) = shared.pending.remove(&response.seq) else {
            warn!(seq = response.seq, method = %response.method, "No caller waiting for response");
            if let Err(e) = shared.codec.discard_response_body().await {
                break e;
            }
            continue;
        };

        if let Err(e) = slot.complete(&shared.codec, response.error).await {
            break e;
        }
    };

    if reason.is_disconnect() {
        debug!("Client connection closed");
    } else {
        warn!(error = %reason, "Client reader stopped");
    }
    shared.shut_down();
}
