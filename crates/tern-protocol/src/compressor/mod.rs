//! Compression registry.
//!
//! Bodies are compressed by one of a fixed set of stateless plugins, named on
//! the wire by a 16-bit code:
//!
//! | Code | Plugin   |
//! |------|----------|
//! | 0    | Raw      |
//! | 1    | Gzip     |
//! | 2    | Snappy   |
//! | 3    | Zlib     |
//!
//! Any other code can appear in a header but has no plugin, and resolving it
//! is an error in both directions. Nothing falls back to Raw.

mod gzip;
mod raw;
mod snappy;
mod zlib;

pub use gzip::GzipCompressor;
pub use raw::RawCompressor;
pub use snappy::SnappyCompressor;
pub use zlib::ZlibCompressor;

use std::fmt;
use std::io;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Compression code carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CompressType(pub u16);

impl CompressType {
    pub const RAW: CompressType = CompressType(0);
    pub const GZIP: CompressType = CompressType(1);
    pub const SNAPPY: CompressType = CompressType(2);
    pub const ZLIB: CompressType = CompressType(3);

    /// Raw wire code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Whether a plugin is registered for this code.
    #[must_use]
    pub fn is_registered(self) -> bool {
        Compressor::lookup(self).is_ok()
    }
}

impl From<u16> for CompressType {
    fn from(code: u16) -> Self {
        CompressType(code)
    }
}

impl From<CompressType> for u16 {
    fn from(ct: CompressType) -> u16 {
        ct.0
    }
}

impl fmt::Display for CompressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Compressor::lookup(*self) {
            Ok(compressor) => f.write_str(compressor.name()),
            Err(_) => write!(f, "compress-type({})", self.0),
        }
    }
}

impl FromStr for CompressType {
    type Err = ProtocolError;

    /// Parses a plugin name (`raw`, `gzip`, `snappy`, `zlib`) or a numeric
    /// code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(CompressType::RAW),
            "gzip" => Ok(CompressType::GZIP),
            "snappy" => Ok(CompressType::SNAPPY),
            "zlib" => Ok(CompressType::ZLIB),
            other => other
                .parse::<u16>()
                .map(CompressType)
                .map_err(|_| ProtocolError::UnknownCompressorName(s.to_string())),
        }
    }
}

/// Byte transform applied to call bodies.
///
/// Implementations hold no state, so a single instance may serve any number
/// of concurrent calls.
pub trait Compress: Send + Sync {
    /// Compress `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn zip(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Decompress `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not a valid stream for this plugin.
    fn unzip(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// The registered compression plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compressor {
    Raw,
    Gzip,
    Snappy,
    Zlib,
}

impl Compressor {
    /// All registered plugins, in code order.
    pub const ALL: [Compressor; 4] = [
        Compressor::Raw,
        Compressor::Gzip,
        Compressor::Snappy,
        Compressor::Zlib,
    ];

    /// Resolve the plugin registered for `compress_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownCompressor`] for unregistered codes.
    pub fn lookup(compress_type: CompressType) -> Result<Self, ProtocolError> {
        match compress_type {
            CompressType::RAW => Ok(Compressor::Raw),
            CompressType::GZIP => Ok(Compressor::Gzip),
            CompressType::SNAPPY => Ok(Compressor::Snappy),
            CompressType::ZLIB => Ok(Compressor::Zlib),
            other => Err(ProtocolError::UnknownCompressor(other)),
        }
    }

    /// Wire code of this plugin.
    #[must_use]
    pub fn compress_type(self) -> CompressType {
        match self {
            Compressor::Raw => CompressType::RAW,
            Compressor::Gzip => CompressType::GZIP,
            Compressor::Snappy => CompressType::SNAPPY,
            Compressor::Zlib => CompressType::ZLIB,
        }
    }

    /// Compress `data`, tagging any backend failure with this plugin.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Compression`] if the backend fails.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.zip(data).map_err(|source| ProtocolError::Compression {
            compress_type: self.compress_type(),
            source,
        })
    }

    /// Decompress `data`, tagging any backend failure with this plugin.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Compression`] if `data` is not a valid stream.
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.unzip(data).map_err(|source| ProtocolError::Compression {
            compress_type: self.compress_type(),
            source,
        })
    }

    /// Human-readable plugin name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Compressor::Raw => "raw",
            Compressor::Gzip => "gzip",
            Compressor::Snappy => "snappy",
            Compressor::Zlib => "zlib",
        }
    }
}

impl TryFrom<CompressType> for Compressor {
    type Error = ProtocolError;

    fn try_from(compress_type: CompressType) -> Result<Self, Self::Error> {
        Compressor::lookup(compress_type)
    }
}

impl From<Compressor> for CompressType {
    fn from(compressor: Compressor) -> CompressType {
        compressor.compress_type()
    }
}

impl Compress for Compressor {
    fn zip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Compressor::Raw => RawCompressor.zip(data),
            Compressor::Gzip => GzipCompressor.zip(data),
            Compressor::Snappy => SnappyCompressor.zip(data),
            Compressor::Zlib => ZlibCompressor.zip(data),
        }
    }

    fn unzip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Compressor::Raw => RawCompressor.unzip(data),
            Compressor::Gzip => GzipCompressor.unzip(data),
            Compressor::Snappy => SnappyCompressor.unzip(data),
            Compressor::Zlib => ZlibCompressor.unzip(data),
        }
    }
}

/// Compress `data` with the plugin registered for `compress_type`.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownCompressor`] for unregistered codes and
/// [`ProtocolError::Compression`] if the plugin fails.
pub fn zip(compress_type: CompressType, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Compressor::lookup(compress_type)?.compress(data)
}

/// Decompress `data` with the plugin registered for `compress_type`.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownCompressor`] for unregistered codes and
/// [`ProtocolError::Compression`] if `data` is not a valid stream.
pub fn unzip(compress_type: CompressType, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Compressor::lookup(compress_type)?.decompress(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"a".to_vec(),
            b"Hello, world!".to_vec(),
            b"abcabcabcabcabcabcabcabcabcabcabcabc".repeat(100),
            (0..=255u8).cycle().take(70_000).collect(),
        ]
    }

    #[test]
    fn test_registered_roundtrip() {
        for compressor in Compressor::ALL {
            for payload in payloads() {
                let zipped = zip(compressor.compress_type(), &payload).unwrap();
                let unzipped = unzip(compressor.compress_type(), &zipped).unwrap();
                assert_eq!(unzipped, payload, "{} roundtrip", compressor.name());
            }
        }
    }

    #[test]
    fn test_raw_is_identity() {
        let data = b"unchanged".to_vec();
        assert_eq!(zip(CompressType::RAW, &data).unwrap(), data);
        assert_eq!(unzip(CompressType::RAW, &data).unwrap(), data);
    }

    #[test]
    fn test_compression_shrinks_repetitive_data() {
        let data = b"0123456789".repeat(1000);
        for ct in [CompressType::GZIP, CompressType::SNAPPY, CompressType::ZLIB] {
            assert!(zip(ct, &data).unwrap().len() < data.len(), "{}", ct);
        }
    }

    #[test]
    fn test_unknown_code_fails_both_ways() {
        let unknown = CompressType(99);
        assert!(!unknown.is_registered());
        assert!(matches!(
            zip(unknown, b"data"),
            Err(ProtocolError::UnknownCompressor(CompressType(99)))
        ));
        assert!(matches!(
            unzip(unknown, b"data"),
            Err(ProtocolError::UnknownCompressor(CompressType(99)))
        ));
    }

    #[test]
    fn test_corrupt_stream_is_compression_error() {
        for ct in [CompressType::GZIP, CompressType::SNAPPY, CompressType::ZLIB] {
            match unzip(ct, b"definitely not compressed") {
                Err(ProtocolError::Compression { compress_type, .. }) => {
                    assert_eq!(compress_type, ct)
                }
                other => panic!("Expected Compression error for {}, got {:?}", ct, other),
            }
        }
    }

    #[test]
    fn test_unfinished_flate_streams_decode() {
        use flate2::write::{GzEncoder, ZlibEncoder};
        use flate2::Compression;
        use std::io::Write;

        let data = b"sync flushed, never finished".repeat(20);

        let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
        gzip.write_all(&data).unwrap();
        gzip.flush().unwrap();
        assert_eq!(unzip(CompressType::GZIP, gzip.get_ref()).unwrap(), data);

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&data).unwrap();
        zlib.flush().unwrap();
        assert_eq!(unzip(CompressType::ZLIB, zlib.get_ref()).unwrap(), data);
    }

    #[test]
    fn test_truncated_flate_header_is_error() {
        assert!(unzip(CompressType::GZIP, &[0x1f]).is_err());
        assert!(unzip(CompressType::ZLIB, &[0x78]).is_err());
    }

    #[test]
    fn test_lookup_matches_codes() {
        for compressor in Compressor::ALL {
            assert_eq!(
                Compressor::try_from(compressor.compress_type()).unwrap(),
                compressor
            );
        }
        assert_eq!(CompressType::GZIP.code(), 1);
        assert_eq!(CompressType::ZLIB.code(), 3);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("gzip".parse::<CompressType>().unwrap(), CompressType::GZIP);
        assert_eq!("Snappy".parse::<CompressType>().unwrap(), CompressType::SNAPPY);
        assert_eq!("raw".parse::<CompressType>().unwrap(), CompressType::RAW);
        assert_eq!("99".parse::<CompressType>().unwrap(), CompressType(99));
        assert!("brotli".parse::<CompressType>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(CompressType::ZLIB.to_string(), "zlib");
        assert_eq!(CompressType(42).to_string(), "compress-type(42)");
    }
}
