//! Dispatcher errors.

use tern_codec::CodecError;
use thiserror::Error;

/// Errors returned to callers and by the accept loop.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The codec failed while sending the call or decoding its reply.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The handler reported an application error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The connection ended before a reply arrived.
    #[error("Client is shut down")]
    Shutdown,

    /// Dialing or accepting a connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// The application error text, if the handler reported one.
    #[must_use]
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::Remote(message) => Some(message),
            _ => None,
        }
    }
}
