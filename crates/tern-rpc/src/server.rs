//! Serving side of the dispatcher.
//!
//! Handlers are registered by method name and run as independent tasks, so
//! a slow call never holds up the requests behind it. The per-connection
//! loop only reads: header, then body, then hands the call off.

use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tern_codec::{CodecError, Request, Response, SerializerKind, ServerCodec, StreamServerCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, trace, warn};

use crate::options::Options;

/// A server over TCP with runtime-selected serialization.
pub type TcpServer = Server<StreamServerCodec<TcpStream, SerializerKind>>;

/// Handler output once the request body has been read.
type CallFuture = BoxFuture<'static, Result<(), CodecError>>;

/// A registered method, erased over its argument and reply types.
#[async_trait]
trait Method<C>: Send + Sync {
    /// Read the request body and return the work that answers it.
    ///
    /// Only errors that leave the stream unusable are returned; a body that
    /// fails to decode turns into an error reply.
    async fn prepare(&self, codec: Arc<C>, request: Request) -> Result<CallFuture, CodecError>;
}

struct Handler<F, A, R> {
    f: F,
    _types: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<C, F, Fut, A, R> Method<C> for Handler<F, A, R>
where
    C: ServerCodec + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, String>> + Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
{
    async fn prepare(&self, codec: Arc<C>, request: Request) -> Result<CallFuture, CodecError> {
        let args: A = match codec.read_request_body().await {
            Ok(args) => args,
            Err(e) if !e.is_fatal() => {
                debug!(method = %request.method, error = %e, "Rejecting undecodable arguments");
                let response = Response::failed(&request, format!("invalid arguments: {}", e));
                return Ok(async move { codec.write_response::<()>(&response, None).await }.boxed());
            }
            Err(e) => return Err(e),
        };

        let call = (self.f)(args);
        Ok(async move {
            let result = call.await;
            respond(&*codec, &request, result).await
        }
        .boxed())
    }
}

/// Write the reply for `request`.
async fn respond<C, R>(codec: &C, request: &Request, result: Result<R, String>) -> Result<(), CodecError>
where
    C: ServerCodec,
    R: Serialize + Sync,
{
    let reply = match result {
        Ok(reply) => reply,
        Err(error) => {
            return codec
                .write_response::<()>(&Response::failed(request, error), None)
                .await
        }
    };

    match codec.write_response(&Response::ok(request), Some(&reply)).await {
        // The reply would not encode; the call is still pending, so fail it.
        Err(CodecError::Serializer(e)) => {
            let response = Response::failed(request, format!("invalid reply: {}", e));
            codec.write_response::<()>(&response, None).await
        }
        other => other,
    }
}

/// Routes requests to registered handlers.
pub struct Server<C> {
    methods: DashMap<String, Arc<dyn Method<C>>>,
}

impl<C: ServerCodec + 'static> Server<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    /// Register `handler` under `method`, replacing any earlier handler.
    ///
    /// The handler receives the decoded request body. An `Err` is sent back
    /// to the caller as an application error.
    pub fn register<A, R, F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + Sync + 'static,
    {
        let method = method.into();
        debug!(method = %method, "Registering method");
        self.methods.insert(
            method,
            Arc::new(Handler {
                f: handler,
                _types: PhantomData,
            }),
        );
    }

    /// Names of all registered methods.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Serve calls from one connection until it ends.
    ///
    /// Returns once the peer disconnects or the stream breaks, after every
    /// call already read has been answered. The codec is closed on return.
    pub async fn serve_conn(&self, codec: C) {
        let codec = Arc::new(codec);
        // Each in-flight call holds a sender; recv() returns once all are gone.
        let (in_flight, mut drained) = mpsc::channel::<()>(1);

        let reason = loop {
            let request = match codec.read_request_header().await {
                Ok(request) => request,
                Err(e) => break e,
            };
            trace!(seq = request.seq, method = %request.method, "Dispatching");

            let method = self
                .methods
                .get(&request.method)
                .map(|entry| Arc::clone(entry.value()));
            let Some(method) = method else {
                warn!(method = %request.method, "Unknown method");
                if let Err(e) = codec.discard_request_body().await {
                    break e;
                }
                let response =
                    Response::failed(&request, format!("unknown method: {}", request.method));
                if let Err(e) = codec.write_response::<()>(&response, None).await {
                    break e;
                }
                continue;
            };

            let call = match method.prepare(Arc::clone(&codec), request).await {
                Ok(call) => call,
                Err(e) => break e,
            };
            let guard = in_flight.clone();
            tokio::spawn(async move {
                if let Err(e) = call.await {
                    warn!(error = %e, "Failed to send response");
                }
                drop(guard);
            });
        };

        drop(in_flight);
        let _ = drained.recv().await;

        if reason.is_disconnect() {
            debug!("Connection closed by peer");
        } else {
            warn!(error = %reason, "Closing connection");
        }
        if let Err(e) = codec.close().await {
            debug!(error = %e, "Error closing codec");
        }
    }
}

impl<C: ServerCodec + 'static> Default for Server<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes the accept loop of [`TcpServer::serve_until`].
pub trait ConnectionHook: Send + Sync + 'static {
    /// Held for as long as the accepted connection is served.
    type Guard: Send + 'static;

    /// A connection was accepted and is about to be served.
    fn accepted(&self, peer: SocketAddr) -> Self::Guard;

    /// A connection was dropped at the connection limit.
    fn rejected(&self, _peer: SocketAddr) {}
}

impl ConnectionHook for () {
    type Guard = ();

    fn accepted(&self, _peer: SocketAddr) {}
}

impl TcpServer {
    /// Accept connections on `listener` forever, serving each on its own
    /// task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, options: Options) {
        self.serve_until(listener, options, (), std::future::pending())
            .await;
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// Only the serializer and connection limit of `options` are used;
    /// replies follow the compression of each request. Connections over
    /// the limit are closed right after accept. Connections already being
    /// served keep running after shutdown.
    pub async fn serve_until<H, S>(
        self: Arc<Self>,
        listener: TcpListener,
        options: Options,
        hook: H,
        shutdown: S,
    ) where
        H: ConnectionHook,
        S: Future<Output = ()>,
    {
        let slots = options
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));
        tokio::pin!(shutdown);
        info!(
            addr = ?listener.local_addr().ok(),
            limit = ?options.max_connections,
            "Serving"
        );

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
                () = &mut shutdown => {
                    info!("Stopped accepting connections");
                    return;
                }
            };

            let permit = match &slots {
                Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(%peer, "Connection limit reached, rejecting");
                        hook.rejected(peer);
                        continue;
                    }
                },
                None => None,
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let guard = hook.accepted(peer);
            let server = Arc::clone(&self);
            let serializer = options.serializer;
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                debug!(%peer, "Connection opened");
                server
                    .serve_conn(StreamServerCodec::with_serializer(stream, serializer))
                    .await;
                debug!(%peer, "Connection closed");
            });
        }
    }
}
