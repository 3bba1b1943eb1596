//! Connection options.

use tern_codec::SerializerKind;
use tern_protocol::CompressType;

/// Codec settings for a connection.
///
/// Servers ignore `compress_type`; they answer each call with the
/// compression its request arrived in. Clients ignore `max_connections`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Compression applied to outgoing request bodies.
    pub compress_type: CompressType,
    /// Body encoding.
    pub serializer: SerializerKind,
    /// Most connections a server serves at once. `None` means no limit.
    pub max_connections: Option<usize>,
}

impl Options {
    #[must_use]
    pub fn with_compress_type(mut self, compress_type: CompressType) -> Self {
        self.compress_type = compress_type;
        self
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }
}
