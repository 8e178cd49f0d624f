//! Moving bits between pools during decode.
//!
//! A field decoder starts with the minimum number of bits its codec needs.
//! Variable-length codecs read a prefix from those bits and then pull the
//! rest of their payload from the upstream pool on demand. Pools chain: a
//! nested message's field buffers draw from the message's own buffer, which
//! in turn draws from the top-level input.

use crate::buffer::BitBuffer;
use crate::error::BitError;
use tracing::trace;

/// Moves `count` bits from `input` into `out`.
///
/// With `lsb_first` the lowest `count` bits of `input` are appended above
/// the current contents of `out` and `input` shrinks from the bottom.
/// Otherwise `out` is shifted up by `count` and the highest `count` bits of
/// `input` fill the opened low positions.
pub fn transfer_bits(
    out: &mut BitBuffer,
    input: &mut BitBuffer,
    count: usize,
    lsb_first: bool,
) -> Result<(), BitError> {
    if lsb_first {
        let low = input.take_front(count)?;
        out.append(&low);
    } else {
        let high = input.take_back(count)?;
        out.prepend(&high);
    }
    Ok(())
}

/// Anything a decoder can pull further bits from.
pub trait BitSource {
    /// Appends the next `count` bits in stream order to the top of `out`.
    fn pull_into(&mut self, out: &mut BitBuffer, count: usize) -> Result<(), BitError>;

    /// Number of bits still obtainable from this source.
    fn remaining(&self) -> usize;
}

impl BitSource for BitBuffer {
    fn pull_into(&mut self, out: &mut BitBuffer, count: usize) -> Result<(), BitError> {
        transfer_bits(out, self, count, true)
    }

    fn remaining(&self) -> usize {
        self.len()
    }
}

/// A field's working buffer chained to the pool it was cut from.
pub struct FieldBits<'a> {
    working: BitBuffer,
    source: &'a mut dyn BitSource,
}

impl<'a> FieldBits<'a> {
    /// Creates an empty working buffer over `source`.
    pub fn new(source: &'a mut dyn BitSource) -> Self {
        Self {
            working: BitBuffer::new(),
            source,
        }
    }

    /// Pulls `count` more bits from upstream into the working buffer.
    pub fn get_more_bits(&mut self, count: usize) -> Result<(), BitError> {
        if count > 0 {
            trace!(count, "pulling bits from upstream pool");
        }
        self.source.pull_into(&mut self.working, count)
    }

    /// Consumes the next `count` bits, pulling from upstream when the working
    /// buffer runs short.
    pub fn take(&mut self, count: usize) -> Result<BitBuffer, BitError> {
        let held = self.working.len();
        if count > held {
            self.get_more_bits(count - held)?;
        }
        self.working.take_front(count)
    }

    /// Bits currently held in the working buffer.
    pub fn bits(&self) -> &BitBuffer {
        &self.working
    }

    pub fn bits_mut(&mut self) -> &mut BitBuffer {
        &mut self.working
    }

    /// Releases the working buffer, dropping the link upstream.
    pub fn into_bits(self) -> BitBuffer {
        self.working
    }
}

impl BitSource for FieldBits<'_> {
    fn pull_into(&mut self, out: &mut BitBuffer, count: usize) -> Result<(), BitError> {
        let held = self.working.len();
        if count > held {
            self.source.pull_into(&mut self.working, count - held)?;
        }
        transfer_bits(out, &mut self.working, count, true)
    }

    fn remaining(&self) -> usize {
        self.working.len() + self.source.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bits(s: &str) -> BitBuffer {
        s.parse().unwrap()
    }

    #[test]
    fn test_transfer_lsb_first() {
        let mut input = bits("110101");
        let mut out = bits("1");
        transfer_bits(&mut out, &mut input, 3, true).unwrap();
        assert_eq!(out.to_string(), "1011");
        assert_eq!(input.to_string(), "110");
    }

    #[test]
    fn test_transfer_msb_first() {
        let mut input = bits("110101");
        let mut out = bits("1");
        transfer_bits(&mut out, &mut input, 2, false).unwrap();
        assert_eq!(out.to_string(), "111");
        assert_eq!(input.to_string(), "0101");
    }

    #[test]
    fn test_transfer_underflow() {
        let mut input = bits("10");
        let mut out = BitBuffer::new();
        let err = transfer_bits(&mut out, &mut input, 5, true).unwrap_err();
        assert_eq!(
            err,
            BitError::Underflow {
                requested: 5,
                available: 2
            }
        );
        // nothing moved
        assert_eq!(input.to_string(), "10");
        assert!(out.is_empty());
    }

    #[test]
    fn test_field_bits_pull_on_demand() {
        // prefix "11" (3) followed by three payload bits "010"
        let mut pool = bits("01011");
        let mut field = FieldBits::new(&mut pool);
        field.get_more_bits(2).unwrap();
        let len = field.bits().to_u64().unwrap() as usize;
        assert_eq!(len, 3);
        field.bits_mut().take_front(2).unwrap();

        let payload = field.take(len).unwrap();
        assert_eq!(payload.to_string(), "010");
        assert!(field.bits().is_empty());
        assert_eq!(field.remaining(), 0);
    }

    #[test]
    fn test_chained_field_bits() {
        let mut pool = bits("11100101");
        let mut message = FieldBits::new(&mut pool);
        message.get_more_bits(3).unwrap();

        {
            // child wants more than the parent preloaded
            let mut child = FieldBits::new(&mut message);
            let first = child.take(5).unwrap();
            assert_eq!(first.to_string(), "00101");
        }

        let rest = message.take(3).unwrap();
        assert_eq!(rest.to_string(), "111");
        assert_eq!(message.remaining(), 0);
    }

    #[test]
    fn test_field_bits_short_input() {
        let mut pool = bits("1");
        let mut field = FieldBits::new(&mut pool);
        assert!(field.take(4).unwrap_err().is_malformed_input());
    }

    proptest! {
        #[test]
        fn prop_u64_round_trip(value in any::<u64>(), extra in 0usize..8) {
            let width = 64 - value.leading_zeros() as usize + extra;
            let buffer = BitBuffer::from_u64(value, width).unwrap();
            prop_assert_eq!(buffer.len(), width);
            prop_assert_eq!(buffer.to_u64().unwrap(), value);
        }

        #[test]
        fn prop_lsb_transfer_preserves_stream(
            stream in proptest::collection::vec(any::<bool>(), 0..128),
            split in 0usize..128,
        ) {
            let split = split.min(stream.len());
            let mut input: BitBuffer = stream.iter().copied().collect();
            let mut out = BitBuffer::new();
            transfer_bits(&mut out, &mut input, split, true).unwrap();
            let rejoined: Vec<bool> = out.iter().chain(input.iter()).collect();
            prop_assert_eq!(rejoined, stream);
        }
    }
}
