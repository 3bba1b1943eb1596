//! Snappy plugin.
//!
//! Uses the framed stream format (stream identifier, then checksummed
//! chunks), not raw snappy blocks.

use std::io::{self, Read, Write};

use snap::read::FrameDecoder;
use snap::write::FrameEncoder;

use super::Compress;

/// Framed snappy streams via `snap`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCompressor;

impl Compress for SnappyCompressor {
    fn zip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = FrameEncoder::new(Vec::with_capacity(data.len() / 2 + 32));
        encoder.write_all(data)?;
        encoder
            .into_inner()
            .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))
    }

    fn unzip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = FrameDecoder::new(data);
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}
