//! Codec errors.

use std::io;

use thiserror::Error;
use tern_protocol::ProtocolError;

use crate::serializer::SerializerError;

/// Errors returned by client and server codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Framing, header decoding, compression or transport failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A body did not hash to the checksum its header carried.
    #[error("Checksum mismatch: header {expected:#010x}, body {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum from the header.
        expected: u32,
        /// Checksum of the bytes received.
        actual: u32,
    },

    /// A response or reply named a sequence with no pending entry.
    #[error("No pending call for sequence {0}")]
    InvalidSequence(u64),

    /// The body could not be encoded or decoded.
    #[error("Serializer error: {0}")]
    Serializer(#[from] SerializerError),

    /// The codec was closed.
    #[error("Codec closed")]
    Closed,
}

impl CodecError {
    /// Returns true if the stream can no longer be trusted and should be
    /// closed.
    ///
    /// Serializer failures happen after the body was fully consumed, so the
    /// stream is still positioned at the next header. Everything else leaves
    /// the stream broken or out of step.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CodecError::Serializer(_))
    }

    /// Returns true if the peer went away or the codec was closed.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            CodecError::Closed => true,
            CodecError::Protocol(ProtocolError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        CodecError::Protocol(ProtocolError::Io(e))
    }
}
