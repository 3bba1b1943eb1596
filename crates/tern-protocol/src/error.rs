//! Protocol errors.

use thiserror::Error;

use crate::compressor::CompressType;
use crate::frame::MAX_FRAME_SIZE;

/// Errors that can occur while moving frames and headers over a stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying stream failed or was closed mid-frame.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// A header, varint or string could not be decoded.
    #[error("Decode error: {0}")]
    Decode(&'static str),

    /// A frame declared a length above the accepted maximum.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(u64),

    /// No compressor is registered for this code.
    #[error("Unknown compressor: {0}")]
    UnknownCompressor(CompressType),

    /// A body is too large for the 32-bit length field.
    #[error("Body size {0} does not fit in a u32 length field")]
    BodyTooLarge(usize),

    /// A compressor name from configuration did not match any plugin.
    #[error("Unknown compressor name: {0}")]
    UnknownCompressorName(String),

    /// A registered compressor failed to transform the payload.
    #[error("{compress_type} compression failed: {source}")]
    Compression {
        /// Compressor that failed.
        compress_type: CompressType,
        /// Error reported by the compression backend.
        #[source]
        source: std::io::Error,
    },
}

impl ProtocolError {
    /// Returns true if the error came from the transport rather than from
    /// the bytes it carried.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
