//! # tern-protocol
//!
//! Wire protocol definitions for the Tern RPC codec.
//!
//! This crate defines the byte-exact contract between independently built
//! clients and servers: varint length-prefixed frames, the request and
//! response headers that describe each call body, and the registry of
//! compression plugins a body may be encoded with.
//!
//! ## Wire layout
//!
//! ```text
//! frame   := uvarint(len) bytes[len]
//! request := frame(RequestHeader)  body[RequestHeader.request_len]
//! reply   := frame(ResponseHeader) body[ResponseHeader.response_len]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tern_protocol::{CompressType, RequestHeader};
//!
//! let header = RequestHeader {
//!     compress_type: CompressType::RAW,
//!     method: "Arith.Add".to_string(),
//!     id: 7,
//!     request_len: 12,
//!     checksum: 0,
//! };
//!
//! let encoded = header.marshal();
//! let mut decoded = RequestHeader::default();
//! decoded.unmarshal(&encoded).unwrap();
//! assert_eq!(header, decoded);
//! ```

pub mod compressor;
pub mod error;
pub mod frame;
pub mod header;
pub mod varint;

pub use compressor::{Compress, CompressType, Compressor};
pub use error::ProtocolError;
pub use frame::{
    checksum, discard, read_body, read_full, recv_frame, send_frame, write_full, MAX_FRAME_SIZE,
};
pub use header::{Header, RequestHeader, ResponseHeader};
