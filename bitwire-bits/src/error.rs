//! Bit buffer error types.

use thiserror::Error;

/// Errors raised by bit buffer conversions and bit pool transfers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitError {
    #[error("value {value} does not fit in {width} bits")]
    Overflow { value: u64, width: usize },

    #[error("buffer of {len} bits holds a value wider than 64 bits")]
    TooWide { len: usize },

    #[error("not enough bits: requested {requested}, only {available} available")]
    Underflow { requested: usize, available: usize },

    #[error("invalid bit digit: {0:?}")]
    InvalidDigit(char),
}

impl BitError {
    /// Returns whether this error was caused by truncated or corrupt input
    /// rather than by a caller passing an unrepresentable value.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, BitError::Underflow { .. } | BitError::TooWide { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_error_display() {
        let err = BitError::Overflow { value: 8, width: 3 };
        assert_eq!(err.to_string(), "value 8 does not fit in 3 bits");

        let err = BitError::Underflow {
            requested: 10,
            available: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("4"));

        let err = BitError::InvalidDigit('x');
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_malformed_classification() {
        assert!(BitError::Underflow {
            requested: 1,
            available: 0
        }
        .is_malformed_input());
        assert!(BitError::TooWide { len: 70 }.is_malformed_input());
        assert!(!BitError::Overflow { value: 1, width: 0 }.is_malformed_input());
    }
}
