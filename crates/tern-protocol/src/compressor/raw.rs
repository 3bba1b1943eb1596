//! Identity plugin.

use std::io;

use super::Compress;

/// Passes bodies through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCompressor;

impl Compress for RawCompressor {
    fn zip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn unzip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}
