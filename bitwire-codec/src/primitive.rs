//! Codecs of the non-numeric scalar kinds.

use crate::context::Traversal;
use crate::error::CodecError;
use crate::field::FieldCodec;
use bitwire_bits::{ceil_log2, BitBuffer, FieldBits, BITS_PER_BYTE};
use bitwire_schema::{FieldKind, Value};
use chrono::DateTime;
use tracing::warn;

/// Booleans: one bit when required, otherwise two with 0 meaning absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoolCodec;

impl BoolCodec {
    fn width(ctx: &Traversal<'_, '_>) -> usize {
        if ctx.use_required() {
            1
        } else {
            2
        }
    }
}

impl FieldCodec for BoolCodec {
    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let value = wire
            .as_bool()
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), "bool", wire.kind_name()))?;
        let offset = if ctx.use_required() { 0 } else { 1 };
        Ok(BitBuffer::from_u64(u64::from(value) + offset, Self::width(ctx))?)
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        let raw = bits.take(Self::width(ctx))?.to_u64()?;
        if ctx.use_required() {
            return Ok(Some(Value::Bool(raw == 1)));
        }
        match raw {
            0 => Ok(None),
            1 => Ok(Some(Value::Bool(false))),
            2 => Ok(Some(Value::Bool(true))),
            other => Err(CodecError::malformed(format!("bool slot holds {other}"))),
        }
    }

    fn size(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::width(ctx))
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::width(ctx))
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::width(ctx))
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        ctx.require(field.kind == FieldKind::Bool, "bool codec on a non-bool field")
    }
}

fn max_length(ctx: &Traversal<'_, '_>) -> Result<usize, CodecError> {
    let field = ctx.current_field()?;
    match field.options.max_length {
        Some(len) => Ok(len as usize),
        None => Err(CodecError::validation(
            format!("field '{}'", ctx.field_path()),
            "missing max_length",
        )),
    }
}

/// Longest prefix of `s` of at most `max` bytes that ends on a character
/// boundary.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Strings as a length prefix followed by the UTF-8 bytes.
///
/// Strings longer than `max_length` bytes are truncated. A zero length
/// decodes as an absent value.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl StringCodec {
    fn prefix_width(max_length: usize) -> usize {
        ceil_log2(max_length as u128 + 1)
    }

    fn payload<'v>(wire: &'v Value, ctx: &Traversal<'_, '_>) -> Result<&'v str, CodecError> {
        let s = wire
            .as_str()
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), "string", wire.kind_name()))?;
        let max = max_length(ctx)?;
        let kept = truncate_utf8(s, max);
        if kept.len() < s.len() {
            warn!(
                field = %ctx.field_path(),
                length = s.len(),
                max_length = max,
                "string truncated to max_length"
            );
        }
        Ok(kept)
    }
}

impl FieldCodec for StringCodec {
    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let payload = Self::payload(wire, ctx)?;
        let prefix = Self::prefix_width(max_length(ctx)?);
        let mut bits = BitBuffer::from_u64(payload.len() as u64, prefix)?;
        bits.append(&BitBuffer::from_bytes(payload.as_bytes()));
        Ok(bits)
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        let max = max_length(ctx)?;
        let len = bits.take(Self::prefix_width(max))?.to_u64()? as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > max {
            return Err(CodecError::malformed(format!(
                "string length {len} exceeds max_length {max}"
            )));
        }
        let bytes = bits.take(len * BITS_PER_BYTE)?.to_bytes();
        String::from_utf8(bytes)
            .map(|s| Some(Value::String(s)))
            .map_err(|e| CodecError::malformed(format!("string is not UTF-8: {e}")))
    }

    fn size(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        let payload = Self::payload(wire, ctx)?;
        Ok(Self::prefix_width(max_length(ctx)?) + payload.len() * BITS_PER_BYTE)
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::prefix_width(max_length(ctx)?))
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        let max = max_length(ctx)?;
        Ok(Self::prefix_width(max) + max * BITS_PER_BYTE)
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        ctx.require(field.kind == FieldKind::String, "string codec on a non-string field")?;
        ctx.require(field.options.max_length.is_some(), "missing max_length")
    }
}

/// Byte strings as exactly `max_length` bytes, zero padded. Optional fields
/// lead with a presence bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl BytesCodec {
    fn presence_bits(ctx: &Traversal<'_, '_>) -> usize {
        if ctx.use_required() {
            0
        } else {
            1
        }
    }
}

impl FieldCodec for BytesCodec {
    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let bytes = wire
            .as_bytes()
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), "bytes", wire.kind_name()))?;
        let max = max_length(ctx)?;
        if bytes.len() > max {
            if ctx.strict() {
                return Err(CodecError::OutOfRange {
                    field: ctx.field_path(),
                    value: format!("{} bytes (max_length {max})", bytes.len()),
                });
            }
            warn!(field = %ctx.field_path(), length = bytes.len(), max_length = max, "bytes truncated");
        }

        let mut padded = bytes[..bytes.len().min(max)].to_vec();
        padded.resize(max, 0);
        let mut bits = BitBuffer::from_bytes(&padded);
        if !ctx.use_required() {
            bits.push_front(true);
        }
        Ok(bits)
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        if !ctx.use_required() && bits.take(1)?.is_all_zero() {
            return Ok(None);
        }
        let payload = bits.take(max_length(ctx)? * BITS_PER_BYTE)?;
        Ok(Some(Value::Bytes(payload.to_bytes())))
    }

    fn size(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        self.max_size(ctx)
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        if ctx.use_required() {
            self.max_size(ctx)
        } else {
            Ok(1)
        }
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::presence_bits(ctx) + max_length(ctx)? * BITS_PER_BYTE)
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        ctx.require(field.kind == FieldKind::Bytes, "bytes codec on a non-bytes field")?;
        ctx.require(
            field.options.max_length.is_some_and(|len| len >= 1),
            "max_length must be at least 1",
        )
    }
}

/// A field that is never transmitted and always decodes to its
/// `static_value`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticCodec;

impl StaticCodec {
    /// Parses the field's literal according to its kind.
    pub fn literal(ctx: &Traversal<'_, '_>) -> Result<Value, CodecError> {
        let field = ctx.current_field()?;
        let invalid = |reason: String| CodecError::validation(format!("field '{}'", ctx.field_path()), reason);
        let text = field
            .options
            .static_value
            .as_deref()
            .ok_or_else(|| invalid("missing static_value".to_string()))?;
        let unparsable = || invalid(format!("static_value '{text}' is not a valid {}", field.kind));

        let value = match field.kind {
            FieldKind::Double | FieldKind::Float => {
                Value::Double(text.trim().parse().map_err(|_| unparsable())?)
            }
            FieldKind::Int32 => {
                let v: i32 = text.trim().parse().map_err(|_| unparsable())?;
                Value::Int(i64::from(v))
            }
            FieldKind::Int64 => Value::Int(text.trim().parse().map_err(|_| unparsable())?),
            FieldKind::UInt32 => {
                let v: u32 = text.trim().parse().map_err(|_| unparsable())?;
                Value::UInt(u64::from(v))
            }
            FieldKind::UInt64 => Value::UInt(text.trim().parse().map_err(|_| unparsable())?),
            FieldKind::Bool => match text.trim() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(unparsable()),
            },
            FieldKind::String => Value::String(text.to_string()),
            FieldKind::Bytes => Value::Bytes(text.as_bytes().to_vec()),
            FieldKind::Enum => {
                let name = field.type_name.as_deref().unwrap_or_default();
                let enumeration = ctx.schema().enumeration(name).ok_or_else(unparsable)?;
                let by_number = text.trim().parse().ok().and_then(|n| enumeration.by_number(n));
                let entry = enumeration
                    .by_name(text.trim())
                    .or(by_number)
                    .ok_or_else(unparsable)?;
                Value::Enum(entry.number)
            }
            FieldKind::Timestamp => {
                let t = DateTime::parse_from_rfc3339(text.trim()).map_err(|_| unparsable())?;
                Value::Time(t.with_timezone(&chrono::Utc))
            }
            FieldKind::Message => {
                return Err(invalid("message fields cannot be static".to_string()));
            }
        };
        Ok(value)
    }
}

impl FieldCodec for StaticCodec {
    fn encode(&self, _wire: &Value, _ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        Ok(BitBuffer::new())
    }

    fn encode_absent(&self, _ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        Ok(BitBuffer::new())
    }

    fn decode(
        &self,
        _bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        Self::literal(ctx).map(Some)
    }

    fn size(&self, _wire: &Value, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(0)
    }

    fn size_absent(&self, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(0)
    }

    fn min_size(&self, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(0)
    }

    fn max_size(&self, _ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(0)
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        Self::literal(ctx).map(|_| ())
    }

    fn info(&self, ctx: &mut Traversal<'_, '_>) -> Result<String, CodecError> {
        Ok(format!("0 bits (static {})", Self::literal(ctx)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate_utf8("abc", 5), "abc");
        assert_eq!(truncate_utf8("abcdef", 4), "abcd");
        // 'é' is two bytes; never split it
        assert_eq!(truncate_utf8("aé", 2), "a");
        assert_eq!(truncate_utf8("", 0), "");
    }

    #[test]
    fn test_string_prefix_width() {
        assert_eq!(StringCodec::prefix_width(255), 8);
        assert_eq!(StringCodec::prefix_width(16), 5);
        assert_eq!(StringCodec::prefix_width(1), 1);
    }
}
