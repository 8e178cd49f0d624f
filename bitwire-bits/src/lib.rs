//! # bitwire-bits
//!
//! Bit-level storage for the bitwire codec.
//!
//! This crate provides:
//! - `BitBuffer`, an exact-length bit sequence with integer and byte conversions
//! - `transfer_bits` for moving bits between pools in either bit order
//! - `FieldBits`, a decode working buffer that pulls more bits on demand

pub mod buffer;
pub mod error;
pub mod pool;

pub use buffer::BitBuffer;
pub use error::BitError;
pub use pool::{transfer_bits, BitSource, FieldBits};

/// Bits per byte on the wire.
pub const BITS_PER_BYTE: usize = 8;

/// Number of bits needed to distinguish `n` states (`ceil(log2(n))`).
///
/// Zero and one states both need zero bits.
pub fn ceil_log2(n: u128) -> usize {
    if n <= 1 {
        0
    } else {
        (128 - (n - 1).leading_zeros()) as usize
    }
}

/// Rounds a bit count up to whole bytes.
pub fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(BITS_PER_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
        assert_eq!(ceil_log2(256), 8);
        assert_eq!(ceil_log2(257), 9);
        assert_eq!(ceil_log2(1u128 << 64), 64);
    }

    #[test]
    fn test_bytes_for_bits() {
        assert_eq!(bytes_for_bits(0), 0);
        assert_eq!(bytes_for_bits(1), 1);
        assert_eq!(bytes_for_bits(8), 1);
        assert_eq!(bytes_for_bits(9), 2);
    }
}
