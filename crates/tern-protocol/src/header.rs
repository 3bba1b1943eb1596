//! Request and response headers.
//!
//! Each header is sent as one frame ahead of the body it describes. Fields
//! are laid out in a fixed order:
//!
//! ```text
//! RequestHeader:  u16le compress_type | string method | uvarint id
//!                 | uvarint request_len | u32le checksum
//! ResponseHeader: u16le compress_type | uvarint id | string error
//!                 | uvarint response_len | u32le checksum
//! ```
//!
//! Strings are a varint byte length followed by UTF-8 bytes. A checksum of
//! zero means the sender did not ask for verification.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::compressor::CompressType;
use crate::error::ProtocolError;
use crate::varint::{self, MAX_VARINT_LEN64};

/// Headers that can be pooled and reused across calls.
pub trait Header: Default + Send + 'static {
    /// Return every field to its zero value.
    fn reset(&mut self);
}

/// Metadata sent ahead of every request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    /// Compression applied to the body.
    pub compress_type: CompressType,
    /// Call target.
    pub method: String,
    /// Caller-chosen sequence number.
    pub id: u64,
    /// Exact length of the compressed body.
    pub request_len: u32,
    /// CRC32 of the compressed body, or 0 to skip verification.
    pub checksum: u32,
}

impl RequestHeader {
    /// Upper bound on the encoded size of this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        2 + varint::uvarint_len(self.method.len() as u64)
            + self.method.len()
            + MAX_VARINT_LEN64
            + 5
            + 4
    }

    /// Encode into a new buffer.
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.marshal_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoding to `buf`.
    pub fn marshal_into(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.compress_type.code());
        put_string(buf, &self.method);
        varint::put_uvarint(buf, self.id);
        varint::put_uvarint(buf, u64::from(self.request_len));
        buf.put_u32_le(self.checksum);
    }

    /// Decode `data` into `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if `data` is empty, truncated or
    /// malformed. The header is left at its zero value in that case.
    pub fn unmarshal(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        match Self::decode(&mut &data[..]) {
            Ok(header) => {
                *self = header;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        Ok(RequestHeader {
            compress_type: get_compress_type(buf)?,
            method: get_string(buf)?,
            id: varint::get_uvarint(buf)?,
            request_len: get_len(buf)?,
            checksum: get_u32_le(buf)?,
        })
    }
}

impl Header for RequestHeader {
    fn reset(&mut self) {
        self.compress_type = CompressType::default();
        self.method.clear();
        self.id = 0;
        self.request_len = 0;
        self.checksum = 0;
    }
}

/// Metadata sent ahead of every response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Compression applied to the body.
    pub compress_type: CompressType,
    /// Wire ID of the request this answers.
    pub id: u64,
    /// Application error; empty on success.
    pub error: String,
    /// Exact length of the compressed body.
    pub response_len: u32,
    /// CRC32 of the compressed body, or 0 to skip verification.
    pub checksum: u32,
}

impl ResponseHeader {
    /// Upper bound on the encoded size of this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        2 + MAX_VARINT_LEN64
            + varint::uvarint_len(self.error.len() as u64)
            + self.error.len()
            + 5
            + 4
    }

    /// Encode into a new buffer.
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.marshal_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoding to `buf`.
    pub fn marshal_into(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.compress_type.code());
        varint::put_uvarint(buf, self.id);
        put_string(buf, &self.error);
        varint::put_uvarint(buf, u64::from(self.response_len));
        buf.put_u32_le(self.checksum);
    }

    /// Decode `data` into `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if `data` is empty, truncated or
    /// malformed. The header is left at its zero value in that case.
    pub fn unmarshal(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        match Self::decode(&mut &data[..]) {
            Ok(header) => {
                *self = header;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        Ok(ResponseHeader {
            compress_type: get_compress_type(buf)?,
            id: varint::get_uvarint(buf)?,
            error: get_string(buf)?,
            response_len: get_len(buf)?,
            checksum: get_u32_le(buf)?,
        })
    }

    /// Whether the call failed on the remote side.
    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

impl Header for ResponseHeader {
    fn reset(&mut self) {
        self.compress_type = CompressType::default();
        self.id = 0;
        self.error.clear();
        self.response_len = 0;
        self.checksum = 0;
    }
}

fn put_string(buf: &mut impl BufMut, s: &str) {
    varint::put_uvarint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn get_compress_type(buf: &mut &[u8]) -> Result<CompressType, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Decode("truncated compress type"));
    }
    Ok(CompressType(buf.get_u16_le()))
}

fn get_u32_le(buf: &mut &[u8]) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Decode("truncated checksum"));
    }
    Ok(buf.get_u32_le())
}

fn get_len(buf: &mut &[u8]) -> Result<u32, ProtocolError> {
    let len = varint::get_uvarint(buf)?;
    u32::try_from(len).map_err(|_| ProtocolError::Decode("body length overflows u32"))
}

fn get_string(buf: &mut &[u8]) -> Result<String, ProtocolError> {
    let len = varint::get_uvarint(buf)?;
    if len > buf.remaining() as u64 {
        return Err(ProtocolError::Decode("string length exceeds buffer"));
    }
    let slice: &[u8] = *buf;
    let (bytes, rest) = slice.split_at(len as usize);
    *buf = rest;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Decode("string is not UTF-8"))
}
