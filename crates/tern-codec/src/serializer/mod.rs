//! Body serialization.
//!
//! Codecs turn typed bodies into bytes through a [`Serializer`] before
//! compression, and back after decompression. Two encodings ship with the
//! crate; [`SerializerKind`] selects between them at runtime.

mod json;
mod msgpack;

pub use json::JsonSerializer;
pub use msgpack::MsgPackSerializer;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Boxed error from a serialization backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Serialization errors.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// A value could not be encoded.
    #[error("Marshal failed: {0}")]
    Marshal(#[source] BoxError),

    /// Bytes could not be decoded into the requested type.
    #[error("Unmarshal failed: {0}")]
    Unmarshal(#[source] BoxError),

    /// A serializer name from configuration did not match any encoding.
    #[error("Unknown serializer: {0}")]
    Unknown(String),
}

/// Converts call bodies to and from bytes.
pub trait Serializer: Send + Sync + 'static {
    /// Name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Encode `value`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Marshal`] if the value cannot be encoded.
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError>;

    /// Decode `data` into a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Unmarshal`] if `data` is not a valid `T`.
    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, SerializerError>;
}

/// Runtime choice of serializer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerializerKind {
    #[default]
    MsgPack,
    Json,
}

impl Serializer for SerializerKind {
    fn name(&self) -> &'static str {
        match self {
            SerializerKind::MsgPack => MsgPackSerializer.name(),
            SerializerKind::Json => JsonSerializer.name(),
        }
    }

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        match self {
            SerializerKind::MsgPack => MsgPackSerializer.marshal(value),
            SerializerKind::Json => JsonSerializer.marshal(value),
        }
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, SerializerError> {
        match self {
            SerializerKind::MsgPack => MsgPackSerializer.unmarshal(data),
            SerializerKind::Json => JsonSerializer.unmarshal(data),
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SerializerKind {
    type Err = SerializerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(SerializerKind::MsgPack),
            "json" => Ok(SerializerKind::Json),
            _ => Err(SerializerError::Unknown(s.to_string())),
        }
    }
}
