//! Ordered, resizable bit sequences.
//!
//! Bit 0 is the least significant bit. Encoders append fields at the most
//! significant end and decoders consume from the least significant end, so
//! the first field written is the first field read.
//!
//! ```text
//! index:   5 4 3 2 1 0
//! bits:    0 1 1 | 1 0 1
//!          field2  field1
//! ```

use crate::error::BitError;
use std::fmt;
use std::iter;
use std::ops::{Index, ShlAssign, ShrAssign};
use std::str::FromStr;

/// An ordered sequence of bits whose length is always the exact number of
/// meaningful bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuffer {
    bits: Vec<bool>,
}

impl BitBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self { bits: Vec::new() }
    }

    /// Creates a buffer of `len` zero bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// Packs `value` into exactly `width` bits.
    ///
    /// Fails if `value` needs more than `width` bits. Widths above 64 are
    /// zero-extended.
    pub fn from_u64(value: u64, width: usize) -> Result<Self, BitError> {
        if width < 64 && value >> width != 0 {
            return Err(BitError::Overflow { value, width });
        }
        let bits = (0..width).map(|i| i < 64 && (value >> i) & 1 == 1).collect();
        Ok(Self { bits })
    }

    /// Reads the whole buffer as an unsigned integer.
    pub fn to_u64(&self) -> Result<u64, BitError> {
        let mut value = 0u64;
        for (i, bit) in self.bits.iter().enumerate() {
            if *bit {
                if i >= 64 {
                    return Err(BitError::TooWide {
                        len: self.bits.len(),
                    });
                }
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    /// Unpacks bytes; bit `j` of byte `k` becomes bit `8k + j`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let bits = bytes
            .iter()
            .flat_map(|byte| (0..8).map(move |j| (byte >> j) & 1 == 1))
            .collect();
        Self { bits }
    }

    /// Packs into bytes, zero-padding the final byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (j, bit)| byte | ((*bit as u8) << j))
            })
            .collect()
    }

    /// Number of bits in the buffer.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns the bit at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    /// Sets the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, bit: bool) {
        self.bits[index] = bit;
    }

    /// Appends a bit at the most significant end.
    pub fn push_back(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Inserts a bit at the least significant end.
    pub fn push_front(&mut self, bit: bool) {
        self.bits.insert(0, bit);
    }

    /// Removes and returns the least significant bit.
    pub fn pop_front(&mut self) -> Option<bool> {
        if self.bits.is_empty() {
            None
        } else {
            Some(self.bits.remove(0))
        }
    }

    /// Removes and returns the most significant bit.
    pub fn pop_back(&mut self) -> Option<bool> {
        self.bits.pop()
    }

    /// Truncates the most significant bits or zero-extends to `len`.
    pub fn resize(&mut self, len: usize) {
        self.bits.resize(len, false);
    }

    /// Concatenates `other` above the current most significant bit.
    pub fn append(&mut self, other: &BitBuffer) {
        self.bits.extend_from_slice(&other.bits);
    }

    /// Removes the `count` least significant bits and returns them as a new
    /// buffer.
    pub fn take_front(&mut self, count: usize) -> Result<BitBuffer, BitError> {
        self.check_available(count)?;
        Ok(Self {
            bits: self.bits.drain(..count).collect(),
        })
    }

    /// Removes the `count` most significant bits and returns them as a new
    /// buffer (still ordered least significant first).
    pub fn take_back(&mut self, count: usize) -> Result<BitBuffer, BitError> {
        self.check_available(count)?;
        let start = self.bits.len() - count;
        Ok(Self {
            bits: self.bits.drain(start..).collect(),
        })
    }

    /// Inserts `other` below the current least significant bit.
    pub fn prepend(&mut self, other: &BitBuffer) {
        self.bits.splice(0..0, other.bits.iter().copied());
    }

    /// Returns true if every bit is zero (including the empty buffer).
    pub fn is_all_zero(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Iterates from the least significant bit upward.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    fn check_available(&self, count: usize) -> Result<(), BitError> {
        if count > self.bits.len() {
            return Err(BitError::Underflow {
                requested: count,
                available: self.bits.len(),
            });
        }
        Ok(())
    }
}

/// Shifts toward the most significant end (multiply by 2^n), keeping the size.
impl ShlAssign<usize> for BitBuffer {
    fn shl_assign(&mut self, n: usize) {
        let len = self.bits.len();
        if n >= len {
            self.bits.iter_mut().for_each(|b| *b = false);
            return;
        }
        self.bits.truncate(len - n);
        self.bits.splice(0..0, iter::repeat(false).take(n));
    }
}

/// Shifts toward the least significant end (divide by 2^n), keeping the size.
impl ShrAssign<usize> for BitBuffer {
    fn shr_assign(&mut self, n: usize) {
        let len = self.bits.len();
        if n >= len {
            self.bits.iter_mut().for_each(|b| *b = false);
            return;
        }
        self.bits.drain(..n);
        self.bits.extend(iter::repeat(false).take(n));
    }
}

impl Index<usize> for BitBuffer {
    type Output = bool;

    fn index(&self, index: usize) -> &bool {
        &self.bits[index]
    }
}

impl FromIterator<bool> for BitBuffer {
    /// Collects bits least significant first.
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self {
            bits: iter.into_iter().collect(),
        }
    }
}

/// Formats most significant bit first, so `5` in three bits prints `101`.
impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits.iter().rev() {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Parses a most-significant-first string of `0`/`1` digits.
impl FromStr for BitBuffer {
    type Err = BitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .rev()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(BitError::InvalidDigit(other)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> BitBuffer {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_u64_and_display() {
        let b = BitBuffer::from_u64(5, 3).unwrap();
        assert_eq!(b.len(), 3);
        assert_eq!(b.to_string(), "101");
        assert_eq!(b.to_u64().unwrap(), 5);

        let b = BitBuffer::from_u64(6, 4).unwrap();
        assert_eq!(b.to_string(), "0110");
    }

    #[test]
    fn test_from_u64_overflow() {
        let result = BitBuffer::from_u64(8, 3);
        assert_eq!(result, Err(BitError::Overflow { value: 8, width: 3 }));

        // zero width only holds zero
        assert!(BitBuffer::from_u64(0, 0).unwrap().is_empty());
        assert!(BitBuffer::from_u64(1, 0).is_err());

        // full width never overflows
        let b = BitBuffer::from_u64(u64::MAX, 64).unwrap();
        assert_eq!(b.to_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn test_to_u64_too_wide() {
        let mut b = BitBuffer::zeros(70);
        assert_eq!(b.to_u64().unwrap(), 0);
        b.set(68, true);
        assert_eq!(b.to_u64(), Err(BitError::TooWide { len: 70 }));
    }

    #[test]
    fn test_push_and_pop() {
        let mut b = bits("10");
        b.push_front(true);
        assert_eq!(b.to_string(), "101");
        b.push_back(true);
        assert_eq!(b.to_string(), "1101");

        assert_eq!(b.pop_front(), Some(true));
        assert_eq!(b.to_string(), "110");
        assert_eq!(b.pop_back(), Some(true));
        assert_eq!(b.to_string(), "10");

        let mut empty = BitBuffer::new();
        assert_eq!(empty.pop_front(), None);
        assert_eq!(empty.pop_back(), None);
    }

    #[test]
    fn test_shifts_keep_size() {
        let mut b = bits("0011");
        b <<= 1;
        assert_eq!(b.to_string(), "0110");
        b <<= 2;
        assert_eq!(b.to_string(), "1000");
        b >>= 3;
        assert_eq!(b.to_string(), "0001");
        b <<= 10;
        assert_eq!(b.to_string(), "0000");
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn test_resize() {
        let mut b = bits("1101");
        b.resize(2);
        assert_eq!(b.to_string(), "01");
        b.resize(5);
        assert_eq!(b.to_string(), "00001");
    }

    #[test]
    fn test_append_and_prepend() {
        let mut low = bits("01");
        low.append(&bits("110"));
        assert_eq!(low.to_string(), "11001");

        let mut high = bits("11");
        high.prepend(&bits("000"));
        assert_eq!(high.to_string(), "11000");
    }

    #[test]
    fn test_take_front_and_back() {
        let mut b = bits("110010");
        let front = b.take_front(2).unwrap();
        assert_eq!(front.to_string(), "10");
        assert_eq!(b.to_string(), "1100");

        let back = b.take_back(3).unwrap();
        assert_eq!(back.to_string(), "110");
        assert_eq!(b.to_string(), "0");

        assert_eq!(
            b.take_front(2),
            Err(BitError::Underflow {
                requested: 2,
                available: 1
            })
        );
    }

    #[test]
    fn test_bytes_layout() {
        let b = BitBuffer::from_bytes(&[0x01, 0x80]);
        assert_eq!(b.len(), 16);
        assert!(b[0]);
        assert!(b[15]);
        assert_eq!(b.count_ones(), 2);
        assert_eq!(b.to_bytes(), vec![0x01, 0x80]);

        // partial final byte is zero padded
        let b = bits("101");
        assert_eq!(b.to_bytes(), vec![0x05]);
        assert!(BitBuffer::new().to_bytes().is_empty());
    }

    #[test]
    fn test_parse_invalid_digit() {
        assert_eq!("10x".parse::<BitBuffer>(), Err(BitError::InvalidDigit('x')));
    }

    #[test]
    fn test_all_zero() {
        assert!(BitBuffer::new().is_all_zero());
        assert!(BitBuffer::zeros(9).is_all_zero());
        assert!(!bits("0100").is_all_zero());
    }
}
