//! Enumerations as bounded integers.

use crate::context::Traversal;
use crate::error::CodecError;
use crate::field::FieldCodec;
use crate::numeric::NumericSpec;
use bitwire_bits::{BitBuffer, FieldBits};
use bitwire_schema::{EnumDescriptor, FieldKind, Value};
use std::borrow::Cow;

/// Encodes an enumerator by its declaration index (packed) or by its
/// declared number over `[min_number, max_number]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnumCodec;

impl EnumCodec {
    fn descriptor<'s>(ctx: &Traversal<'s, '_>) -> Result<&'s EnumDescriptor, CodecError> {
        let field = ctx.current_field()?;
        let name = field.type_name.as_deref().unwrap_or_default();
        ctx.schema().enumeration(name).ok_or_else(|| {
            CodecError::validation(format!("field '{}'", ctx.field_path()), format!("unknown enum '{name}'"))
        })
    }

    fn packed(ctx: &Traversal<'_, '_>) -> Result<bool, CodecError> {
        Ok(ctx.current_field()?.options.packed_enum)
    }

    fn spec(ctx: &Traversal<'_, '_>) -> Result<NumericSpec, CodecError> {
        let enumeration = Self::descriptor(ctx)?;
        let (min, max) = if Self::packed(ctx)? {
            (0.0, enumeration.values.len().saturating_sub(1) as f64)
        } else {
            (
                f64::from(enumeration.min_number().unwrap_or(0)),
                f64::from(enumeration.max_number().unwrap_or(0)),
            )
        };
        Ok(NumericSpec::new(min, max, 1.0, ctx.use_required()))
    }
}

impl FieldCodec for EnumCodec {
    fn pre_encode<'v>(
        &self,
        value: &'v Value,
        ctx: &Traversal<'_, '_>,
    ) -> Result<Cow<'v, Value>, CodecError> {
        let number = match value {
            Value::Enum(n) => *n,
            Value::Int(n) => i32::try_from(*n).map_err(|_| CodecError::InvalidValue {
                field: ctx.field_path(),
                reason: format!("{n} is not an enumerator number"),
            })?,
            other => return Err(CodecError::mismatch(&ctx.field_path(), "enum", other.kind_name())),
        };
        let enumeration = Self::descriptor(ctx)?;
        let unknown = || CodecError::InvalidValue {
            field: ctx.field_path(),
            reason: format!("{number} is not a value of {}", enumeration.name),
        };
        let wire = if Self::packed(ctx)? {
            enumeration.index_of(number).ok_or_else(unknown)? as i64
        } else {
            enumeration.by_number(number).ok_or_else(unknown)?.number as i64
        };
        Ok(Cow::Owned(Value::Int(wire)))
    }

    fn post_decode(&self, wire: Value, ctx: &Traversal<'_, '_>) -> Result<Value, CodecError> {
        let raw = wire
            .as_i64()
            .ok_or_else(|| CodecError::malformed("enum slot is not an integer"))?;
        let enumeration = Self::descriptor(ctx)?;
        let entry = if Self::packed(ctx)? {
            usize::try_from(raw).ok().and_then(|i| enumeration.value_at(i))
        } else {
            i32::try_from(raw).ok().and_then(|n| enumeration.by_number(n))
        };
        entry
            .map(|e| Value::Enum(e.number))
            .ok_or_else(|| CodecError::malformed(format!("{raw} is not a value of {}", enumeration.name)))
    }

    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let raw = wire
            .as_f64()
            .ok_or_else(|| CodecError::mismatch(&ctx.field_path(), "enum", wire.kind_name()))?;
        Self::spec(ctx)?.encode(raw, ctx.strict(), &ctx.field_path())
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        Ok(Self::spec(ctx)?.decode(bits)?.map(|raw| Value::Int(raw as i64)))
    }

    fn size(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::spec(ctx)?.width())
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::spec(ctx)?.width())
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(Self::spec(ctx)?.width())
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let field = ctx.current_field()?;
        ctx.require(field.kind == FieldKind::Enum, "enum codec on a non-enum field")?;
        let enumeration = Self::descriptor(ctx)?;
        ctx.require(!enumeration.values.is_empty(), "enum has no values")
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Part;
    use crate::error::{CodecError, ErrorKind};
    use crate::Codec;
    use bitwire_bits::BitBuffer;
    use bitwire_schema::{Message, SchemaSet, Value};
    use serde_json::json;

    fn codec() -> Codec {
        let schema = SchemaSet::from_json(&json!({
            "enums": [
                {"name": "Health", "values": [
                    {"name": "OK", "number": 0},
                    {"name": "LOW_BATTERY", "number": 3},
                    {"name": "ABORT", "number": 7}
                ]}
            ],
            "messages": [
                {"name": "Report", "fields": [
                    {"name": "packed", "type": "enum", "type_name": "Health"},
                    {"name": "sparse", "type": "enum", "type_name": "Health",
                     "options": {"packed_enum": false}}
                ]}
            ]
        }))
        .unwrap();
        Codec::new(schema)
    }

    #[test]
    fn test_packed_and_numbered_widths() {
        let codec = codec();
        let msg = Message::new("Report")
            .with("packed", Value::Enum(7))
            .with("sparse", Value::Enum(3));
        let bits = codec.encode_bits(&msg, Part::Body).unwrap();
        // packed: index 2 + null slot; sparse: number 3 + null slot over [0, 7]
        assert_eq!(bits.to_string(), "010011");
        assert_eq!(codec.decode_bits("Report", &bits, Part::Body).unwrap(), msg);
    }

    #[test]
    fn test_integer_values_name_enumerators() {
        let codec = codec();
        let msg = Message::new("Report").with("packed", 3i64);
        let bits = codec.encode_bits(&msg, Part::Body).unwrap();
        let decoded = codec.decode_bits("Report", &bits, Part::Body).unwrap();
        assert_eq!(decoded.get("packed"), Some(&Value::Enum(3)));
    }

    #[test]
    fn test_unknown_enumerator() {
        let codec = codec();
        let err = codec
            .encode_bits(&Message::new("Report").with("packed", Value::Enum(5)), Part::Body)
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { .. }));

        let err = codec
            .encode_bits(&Message::new("Report").with("packed", "OK"), Part::Body)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_undeclared_number_on_the_wire() {
        let codec = codec();
        // packed absent, sparse slot 6 = number 5, which Health lacks
        let bits: BitBuffer = "011000".parse().unwrap();
        let err = codec.decode_bits("Report", &bits, Part::Body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}
