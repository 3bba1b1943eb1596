//! Unsigned LEB128 varints.
//!
//! Seven payload bits per byte, least significant group first, high bit set
//! on every byte except the last. A `u64` takes at most ten bytes, and the
//! tenth byte may only carry the single remaining bit.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Maximum encoded length of a 64-bit varint.
pub const MAX_VARINT_LEN64: usize = 10;

/// Number of bytes `value` occupies once encoded.
#[must_use]
pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Encode `value` into `out`, returning the number of bytes written.
pub fn encode_uvarint(mut value: u64, out: &mut [u8; MAX_VARINT_LEN64]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        out[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    out[i] = value as u8;
    i + 1
}

/// Append `value` to `buf`.
pub fn put_uvarint(buf: &mut impl BufMut, value: u64) {
    let mut scratch = [0u8; MAX_VARINT_LEN64];
    let n = encode_uvarint(value, &mut scratch);
    buf.put_slice(&scratch[..n]);
}

/// Fold the `index`-th byte of a varint into `value`.
///
/// Returns `Ok(true)` once the terminating byte has been consumed.
///
/// # Errors
///
/// Returns a decode error if the varint does not fit in 64 bits.
pub fn accumulate(value: &mut u64, index: usize, byte: u8) -> Result<bool, ProtocolError> {
    if index >= MAX_VARINT_LEN64 {
        return Err(ProtocolError::Decode("varint overflows u64"));
    }
    let shift = 7 * index as u32;
    if byte < 0x80 {
        if index == MAX_VARINT_LEN64 - 1 && byte > 1 {
            return Err(ProtocolError::Decode("varint overflows u64"));
        }
        *value |= u64::from(byte) << shift;
        return Ok(true);
    }
    *value |= u64::from(byte & 0x7f) << shift;
    Ok(false)
}

/// Read a varint from the front of `buf`, advancing past it.
///
/// # Errors
///
/// Returns a decode error if the buffer ends before the varint does or the
/// value overflows 64 bits.
pub fn get_uvarint(buf: &mut impl Buf) -> Result<u64, ProtocolError> {
    let mut value = 0u64;
    let mut index = 0;
    loop {
        if !buf.has_remaining() {
            return Err(ProtocolError::Decode("truncated varint"));
        }
        if accumulate(&mut value, index, buf.get_u8())? {
            return Ok(value);
        }
        index += 1;
    }
}
