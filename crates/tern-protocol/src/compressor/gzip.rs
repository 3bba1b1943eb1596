//! Gzip (RFC 1952) plugin.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::Compress;

/// Gzip member streams via `flate2`.
///
/// Decoding also accepts a sync-flushed member that was never finished,
/// which is what some peers put on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor;

impl Compress for GzipCompressor {
    fn zip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 2 + 32),
            Compression::default(),
        );
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn unzip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        match decoder.read_to_end(&mut out) {
            Ok(_) => Ok(out),
            // Sync-flushed member without trailer; the header parsed, so
            // everything flushed so far is in `out`.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && decoder.header().is_some() => {
                Ok(out)
            }
            Err(e) => Err(e),
        }
    }
}
