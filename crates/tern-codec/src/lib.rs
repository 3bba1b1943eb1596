//! # tern-codec
//!
//! Client and server codecs that bind an RPC dispatcher to a byte stream.
//!
//! A codec owns one duplex stream and speaks the tern wire format over it:
//!
//! - **Client codec** - writes requests, reads responses, tracks which wire
//!   IDs are still awaiting an answer
//! - **Server codec** - reads requests, assigns each a local sequence number,
//!   writes responses with the compression the caller chose
//! - **Serializer** - pluggable body encoding (MessagePack by default)
//! - **Header pool** - recycles header values across calls
//!
//! ## Call flow
//!
//! ```text
//! client                                server
//!   write_request ── header + body ──▶ read_request_header
//!                                      read_request_body
//!   read_response_header ◀── header ── write_response
//!   read_response_body   ◀── body ───
//! ```
//!
//! Headers and bodies of one call are never interleaved with another call's
//! bytes, so any number of tasks may share a codec.

pub mod client;
pub mod error;
mod lifecycle;
pub mod pool;
pub mod serializer;
pub mod server;
pub mod traits;

pub use client::StreamClientCodec;
pub use error::CodecError;
pub use pool::{HeaderPool, Pooled};
pub use serializer::{
    JsonSerializer, MsgPackSerializer, Serializer, SerializerError, SerializerKind,
};
pub use server::StreamServerCodec;
pub use traits::{ClientCodec, Request, Response, ServerCodec};

use tern_protocol::checksum;

/// Check `body` against the checksum carried in its header.
///
/// A zero checksum means the sender skipped integrity protection.
pub(crate) fn verify_checksum(expected: u32, body: &[u8]) -> Result<(), CodecError> {
    if expected == 0 {
        return Ok(());
    }
    let actual = checksum(body);
    if actual != expected {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
