//! Zlib (RFC 1950) plugin.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::Compress;

/// Zlib streams via `flate2`.
///
/// Decoding also accepts a sync-flushed stream that was never finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibCompressor;

impl Compress for ZlibCompressor {
    fn zip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2 + 16),
            Compression::default(),
        );
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn unzip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        match decoder.read_to_end(&mut out) {
            Ok(_) => Ok(out),
            // Sync-flushed stream without final block and Adler-32 trailer.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && has_zlib_header(data) => {
                Ok(out)
            }
            Err(e) => Err(e),
        }
    }
}

/// Deflate method, and a header check that divides by 31.
fn has_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => {
            (cmf & 0x0f) == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}
