//! JSON bodies.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Serializer, SerializerError};

/// JSON encoding, for peers that cannot speak MessagePack.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(value).map_err(|e| SerializerError::Marshal(Box::new(e)))
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, SerializerError> {
        serde_json::from_slice(data).map_err(|e| SerializerError::Unmarshal(Box::new(e)))
    }
}
