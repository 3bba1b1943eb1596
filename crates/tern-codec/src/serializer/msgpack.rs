//! MessagePack bodies.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Serializer, SerializerError};

/// MessagePack encoding with named struct fields.
///
/// Named fields keep bodies readable by peers that decode into maps rather
/// than positional arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        rmp_serde::to_vec_named(value).map_err(|e| SerializerError::Marshal(Box::new(e)))
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, SerializerError> {
        rmp_serde::from_slice(data).map_err(|e| SerializerError::Unmarshal(Box::new(e)))
    }
}
