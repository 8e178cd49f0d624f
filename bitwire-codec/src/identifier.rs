//! Message identifiers prefixed to the head.
//!
//! Ids up to 127 take one byte, larger ids up to 32767 take two. The lowest
//! bit of the first byte says which:
//!
//! ```text
//! 0 <= id < 128:     [0 | id(7)]
//! 128 <= id < 32768: [1 | id(15)]
//! ```

use crate::context::Traversal;
use crate::error::CodecError;
use crate::field::FieldCodec;
use bitwire_bits::{BitBuffer, FieldBits, BITS_PER_BYTE};
use bitwire_schema::{FieldKind, Value};

/// Largest id that fits the one-byte form.
pub const MAX_SHORT_ID: u32 = 127;

/// Largest id the codec can represent.
pub const MAX_ID: u32 = 32767;

const SHORT_BITS: usize = BITS_PER_BYTE;
const LONG_BITS: usize = 2 * BITS_PER_BYTE;

/// Variable-length identifier codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentifierCodec;

impl IdentifierCodec {
    /// Bits taken by `id`.
    pub fn id_size(id: u32) -> usize {
        if id <= MAX_SHORT_ID {
            SHORT_BITS
        } else {
            LONG_BITS
        }
    }

    pub fn encode_id(id: u32) -> Result<BitBuffer, CodecError> {
        if id > MAX_ID {
            return Err(CodecError::OutOfRange {
                field: "id".to_string(),
                value: id.to_string(),
            });
        }
        let long = id > MAX_SHORT_ID;
        let raw = (u64::from(id) << 1) | u64::from(long);
        Ok(BitBuffer::from_u64(raw, Self::id_size(id))?)
    }

    /// Reads an id, pulling the second byte only when the flag bit asks for
    /// it.
    pub fn decode_id(bits: &mut FieldBits<'_>) -> Result<u32, CodecError> {
        let mut raw = bits.take(SHORT_BITS)?;
        if raw.get(0) == Some(true) {
            let high = bits.take(LONG_BITS - SHORT_BITS)?;
            raw.append(&high);
        }
        Ok((raw.to_u64()? >> 1) as u32)
    }

    /// Reads the id at the start of `bytes` without consuming anything.
    pub fn peek_id(bytes: &[u8]) -> Result<u32, CodecError> {
        let take = bytes.len().min(LONG_BITS / BITS_PER_BYTE);
        let mut pool = BitBuffer::from_bytes(&bytes[..take]);
        let mut bits = FieldBits::new(&mut pool);
        Self::decode_id(&mut bits)
    }
}

impl FieldCodec for IdentifierCodec {
    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let id = wire
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), "id", wire.kind_name()))?;
        Self::encode_id(id).map_err(|_| CodecError::OutOfRange {
            field: ctx.field_path(),
            value: id.to_string(),
        })
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        _ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        Ok(Some(Value::UInt(u64::from(Self::decode_id(bits)?))))
    }

    fn size(&self, wire: &Value, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        let id = wire.as_u64().unwrap_or(u64::MAX);
        Ok(u32::try_from(id).map(Self::id_size).unwrap_or(LONG_BITS))
    }

    fn min_size(&self, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(SHORT_BITS)
    }

    fn max_size(&self, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(LONG_BITS)
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        ctx.require(
            matches!(field.kind, FieldKind::UInt32 | FieldKind::UInt64),
            "id codec needs an unsigned integer field",
        )?;
        ctx.require(ctx.use_required(), "id codec needs a required field")
    }
}
