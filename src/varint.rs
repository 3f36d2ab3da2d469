//! LEB128 variable-length integer encoding used for counts and offsets.
//!
//! Each byte carries 7 value bits, least significant group first. The high
//! bit is set when another byte follows, so zero encodes as a single `0x00`.

use crate::error::{IndexError, Result};

/// Longest possible encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode `value` into `buf`, returning the number of bytes written.
#[inline]
pub fn encode(mut value: u64, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    while value > 0x7F {
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    buf.len() - start
}

/// Encode `value` into a fresh buffer.
pub fn encode_to_vec(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    encode(value, &mut buf);
    buf
}

/// Number of bytes `encode` produces for `value`.
#[inline]
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a value from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
#[inline]
pub fn decode(buf: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        let payload = (byte & 0x7F) as u64;
        if shift == 63 && payload > 1 {
            return Err(IndexError::VarintOverflow);
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err(IndexError::VarintOverflow);
        }
    }

    Err(IndexError::TruncatedVarint)
}
