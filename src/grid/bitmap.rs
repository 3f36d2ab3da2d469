//! Packed cell bitmap with a rank directory.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8` (least significant bit
//! first). `rank(i)` answers "how many set bits precede bit `i`", which is
//! the slot of a set cell in the offset table. The directory stores one
//! running total per 64-byte block, so a rank costs one lookup plus at most
//! 64 byte popcounts.

const BLOCK_BYTES: usize = 64;

/// Bytes needed to hold `bit_len` bits
pub fn byte_len(bit_len: u64) -> usize {
    bit_len.div_ceil(8) as usize
}

/// Set bit `i` in a raw bitmap buffer.
pub fn set_bit(bytes: &mut [u8], i: u64) {
    bytes[(i / 8) as usize] |= 1 << (i % 8);
}

/// Set bits `start..end` in a raw bitmap buffer.
pub fn set_range(bytes: &mut [u8], start: u64, end: u64) {
    let mut i = start;
    while i < end && i % 8 != 0 {
        set_bit(bytes, i);
        i += 1;
    }
    let full_end = i + (end.max(i) - i) / 8 * 8;
    if full_end > i {
        bytes[(i / 8) as usize..(full_end / 8) as usize].fill(0xFF);
        i = full_end;
    }
    while i < end {
        set_bit(bytes, i);
        i += 1;
    }
}

/// Immutable bitmap with constant-time-ish rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    bit_len: u64,
    block_ranks: Vec<u64>,
    ones: u64,
}

impl Bitmap {
    /// Wrap raw bytes holding `bit_len` bits.
    ///
    /// Returns `None` if the buffer size does not match `bit_len` or if any
    /// padding bit past `bit_len` is set.
    pub fn from_bytes(bytes: Vec<u8>, bit_len: u64) -> Option<Self> {
        if bytes.len() != byte_len(bit_len) {
            return None;
        }

        let tail_bits = (bit_len % 8) as u32;
        if tail_bits != 0 {
            let last = *bytes.last()?;
            if last >> tail_bits != 0 {
                return None;
            }
        }

        let mut block_ranks = Vec::with_capacity(bytes.len() / BLOCK_BYTES + 1);
        let mut ones = 0u64;
        for block in bytes.chunks(BLOCK_BYTES) {
            block_ranks.push(ones);
            ones += count_ones(block);
        }

        Some(Self {
            bytes,
            bit_len,
            block_ranks,
            ones,
        })
    }

    /// All-zero bitmap
    pub fn zeroed(bit_len: u64) -> Self {
        Self {
            bytes: vec![0; byte_len(bit_len)],
            bit_len,
            block_ranks: vec![0; byte_len(bit_len) / BLOCK_BYTES + 1],
            ones: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.bit_len
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    /// Number of set bits
    pub fn count_ones(&self) -> u64 {
        self.ones
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bit `i`; false past the end
    pub fn get(&self, i: u64) -> bool {
        if i >= self.bit_len {
            return false;
        }
        self.bytes[(i / 8) as usize] & (1 << (i % 8)) != 0
    }

    /// Number of set bits strictly before `i`
    pub fn rank(&self, i: u64) -> u64 {
        let i = i.min(self.bit_len);
        let byte = (i / 8) as usize;
        let block = byte / BLOCK_BYTES;

        let mut rank = self.block_ranks.get(block).copied().unwrap_or(self.ones);
        rank += count_ones(&self.bytes[block * BLOCK_BYTES..byte]);

        let bit = (i % 8) as u32;
        if bit != 0 {
            let mask = (1u8 << bit) - 1;
            rank += (self.bytes[byte] & mask).count_ones() as u64;
        }
        rank
    }

    /// Positions of all set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = u64> + '_ {
        self.bytes.iter().enumerate().flat_map(|(byte_idx, &byte)| {
            (0..8u64)
                .filter(move |bit| byte & (1 << bit) != 0)
                .map(move |bit| byte_idx as u64 * 8 + bit)
        })
    }
}

fn count_ones(bytes: &[u8]) -> u64 {
    bytes.iter().map(|b| b.count_ones() as u64).sum()
}
