//! Codec abstraction traits.
//!
//! An RPC dispatcher drives a codec through these traits without knowing
//! how calls are framed on the wire. Each call is split into a header step
//! and a body step, so the dispatcher can decide what type to decode a body
//! into (or whether to skip it) after seeing the header.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// A call as seen by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Call target, e.g. `Arith.Add`.
    pub method: String,
    /// Sequence number. Chosen by the caller on the client side, assigned by
    /// the codec on the server side.
    pub seq: u64,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, seq: u64) -> Self {
        Self {
            method: method.into(),
            seq,
        }
    }
}

/// The outcome of a call as seen by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Method of the request this answers.
    pub method: String,
    /// Sequence of the request this answers.
    pub seq: u64,
    /// Application error reported by the handler.
    pub error: Option<String>,
}

impl Response {
    /// A successful response to `request`.
    #[must_use]
    pub fn ok(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            seq: request.seq,
            error: None,
        }
    }

    /// A failed response to `request`.
    #[must_use]
    pub fn failed(request: &Request, error: impl Into<String>) -> Self {
        Self {
            method: request.method.clone(),
            seq: request.seq,
            error: Some(error.into()),
        }
    }

    /// Whether the handler reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Client half of a codec.
///
/// All methods take `&self`; writes from concurrent callers are serialized
/// internally, and reads are expected to come from a single reader task.
#[async_trait]
pub trait ClientCodec: Send + Sync {
    /// Send one request.
    ///
    /// The request is registered as pending before any byte is written, so a
    /// response can never arrive for an unknown call. On failure the pending
    /// entry is removed again.
    async fn write_request<T>(&self, request: &Request, body: &T) -> Result<(), CodecError>
    where
        T: Serialize + Sync + ?Sized;

    /// Read the next response header and match it to its pending request.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSequence`] if no request is pending for
    /// the response's ID. The header is retained, so a following
    /// [`discard_response_body`](Self::discard_response_body) keeps the stream
    /// aligned.
    async fn read_response_header(&self) -> Result<Response, CodecError>;

    /// Read the body that follows the last response header.
    ///
    /// Returns `None` when the header carried an application error. The body
    /// bytes are drained in that case.
    async fn read_response_body<T>(&self) -> Result<Option<T>, CodecError>
    where
        T: DeserializeOwned + Send;

    /// Drain the body that follows the last response header.
    async fn discard_response_body(&self) -> Result<(), CodecError>;

    /// Close the stream. Later operations fail with [`CodecError::Closed`].
    async fn close(&self) -> Result<(), CodecError>;
}

/// Server half of a codec.
#[async_trait]
pub trait ServerCodec: Send + Sync {
    /// Read the next request header and assign it a local sequence number.
    async fn read_request_header(&self) -> Result<Request, CodecError>;

    /// Read and decode the body that follows the last request header.
    async fn read_request_body<T>(&self) -> Result<T, CodecError>
    where
        T: DeserializeOwned + Send;

    /// Drain the body that follows the last request header.
    async fn discard_request_body(&self) -> Result<(), CodecError>;

    /// Send the response for a request read from this codec.
    ///
    /// The body is omitted when `response` carries an error or `body` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSequence`] if `response.seq` is not
    /// awaiting a reply.
    async fn write_response<T>(&self, response: &Response, body: Option<&T>) -> Result<(), CodecError>
    where
        T: Serialize + Sync + ?Sized;

    /// Close the stream. Later operations fail with [`CodecError::Closed`].
    async fn close(&self) -> Result<(), CodecError>;
}
