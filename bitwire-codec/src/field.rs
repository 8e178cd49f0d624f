//! The field codec contract and the per-field encode/decode driver.

use crate::context::Traversal;
use crate::error::CodecError;
use bitwire_bits::{BitBuffer, BitSource, FieldBits};
use bitwire_schema::{FieldDescriptor, Message, Value};
use std::borrow::Cow;
use tracing::{trace, warn};

/// Encodes and decodes the values of one field kind.
///
/// Codecs see the field they serve through the [`Traversal`]: its
/// descriptor, whether it is required, the current message values and the
/// clock. Every method receives the traversal positioned on the field.
pub trait FieldCodec: Send + Sync {
    /// Maps a field value to the value put on the wire.
    fn pre_encode<'v>(
        &self,
        value: &'v Value,
        _ctx: &Traversal<'_, '_>,
    ) -> Result<Cow<'v, Value>, CodecError> {
        Ok(Cow::Borrowed(value))
    }

    /// Maps a wire value back to a field value.
    fn post_decode(&self, wire: Value, _ctx: &Traversal<'_, '_>) -> Result<Value, CodecError> {
        Ok(wire)
    }

    /// Encodes a present value.
    fn encode(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError>;

    /// Encodes an unset value. Required fields have nothing to encode.
    fn encode_absent(&self, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        if ctx.use_required() {
            return Err(CodecError::MissingRequired {
                field: ctx.field_path(),
            });
        }
        Ok(BitBuffer::zeros(self.min_size(ctx)?))
    }

    /// Decodes one value. `bits` is preloaded with `min_size` bits; the codec
    /// pulls any further bits it needs. `None` means the value is absent.
    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError>;

    /// Encoded size of a present value, in bits.
    fn size(&self, wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(self.encode(wire, ctx)?.len())
    }

    /// Encoded size of an unset value, in bits.
    fn size_absent(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        Ok(self.encode_absent(ctx)?.len())
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError>;

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError>;

    /// Checks the field's options. Called once when a message is loaded.
    fn validate(&self, _ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// One-line summary of the field's wire footprint.
    fn info(&self, ctx: &mut Traversal<'_, '_>) -> Result<String, CodecError> {
        let min = self.min_size(ctx)?;
        let max = self.max_size(ctx)?;
        Ok(if min == max {
            format!("{min} bit(s)")
        } else {
            format!("{min}-{max} bits")
        })
    }
}

impl<'s, 'm> Traversal<'s, 'm> {
    /// Encodes `field` of `message`, repeated fields as `max_repeat` slots.
    pub fn encode_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
        message: &'m Message,
    ) -> Result<BitBuffer, CodecError> {
        let mut frame = self.enter_field(field)?;
        let bits = if field.is_repeated() {
            let values = frame.repeated_values(field, message)?;
            let mut out = BitBuffer::new();
            for slot in 0..field.max_repeat() as usize {
                let bits = match values.get(slot) {
                    Some(value) => frame.encode_value(codec, value)?,
                    None => codec.encode_absent(&mut frame)?,
                };
                out.append(&bits);
            }
            out
        } else {
            match message.get(&field.name) {
                Some(value) => frame.encode_value(codec, value)?,
                None => codec.encode_absent(&mut frame)?,
            }
        };
        trace!(field = %frame.field_path(), bits = bits.len(), "encoded field");
        Ok(bits)
    }

    /// Encoded size of `field` of `message`, in bits.
    pub fn size_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
        message: &'m Message,
    ) -> Result<usize, CodecError> {
        let mut frame = self.enter_field(field)?;
        if field.is_repeated() {
            let values = frame.repeated_values(field, message)?;
            let mut total = 0;
            for slot in 0..field.max_repeat() as usize {
                total += match values.get(slot) {
                    Some(value) => frame.size_value(codec, value)?,
                    None => codec.size_absent(&mut frame)?,
                };
            }
            Ok(total)
        } else {
            match message.get(&field.name) {
                Some(value) => frame.size_value(codec, value),
                None => codec.size_absent(&mut frame),
            }
        }
    }

    /// Decodes `field` into the message being filled.
    pub fn decode_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
        source: &mut dyn BitSource,
    ) -> Result<(), CodecError> {
        let mut frame = self.enter_field(field)?;
        if field.is_repeated() {
            let mut values = Vec::new();
            for _ in 0..field.max_repeat() {
                if let Some(value) = frame.decode_value(codec, source)? {
                    values.push(value);
                }
            }
            trace!(field = %frame.field_path(), count = values.len(), "decoded repeated field");
            if !values.is_empty() {
                if let Some(message) = frame.decoding_message_mut() {
                    message.set_repeated(field.name.as_str(), values);
                }
            }
        } else if let Some(value) = frame.decode_value(codec, source)? {
            trace!(field = %frame.field_path(), %value, "decoded field");
            if let Some(message) = frame.decoding_message_mut() {
                message.set(field.name.as_str(), value);
            }
        }
        Ok(())
    }

    /// Minimum encoded size of `field`, in bits.
    pub fn min_size_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
    ) -> Result<usize, CodecError> {
        if self.undecided(field) {
            let required = codec.min_size(&mut *self.enter_field_assuming(field, true)?)?;
            let optional = codec.min_size(&mut *self.enter_field_assuming(field, false)?)?;
            return Ok(required.min(optional));
        }
        let mut frame = self.enter_field(field)?;
        let one = codec.min_size(&mut frame)?;
        Ok(slots(field) * one)
    }

    /// Maximum encoded size of `field`, in bits.
    pub fn max_size_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
    ) -> Result<usize, CodecError> {
        if self.undecided(field) {
            let required = codec.max_size(&mut *self.enter_field_assuming(field, true)?)?;
            let optional = codec.max_size(&mut *self.enter_field_assuming(field, false)?)?;
            return Ok(required.max(optional));
        }
        let mut frame = self.enter_field(field)?;
        let one = codec.max_size(&mut frame)?;
        Ok(slots(field) * one)
    }

    /// True when `field`'s required/optional decision depends on values that
    /// this pass does not have.
    fn undecided(&self, field: &FieldDescriptor) -> bool {
        self.is_schema_only()
            && field.conditions().required_if.is_some()
            && !field.is_required()
            && !field.is_repeated()
            && !field.in_oneof()
    }

    /// Validates `field` and its codec.
    pub fn validate_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
    ) -> Result<(), CodecError> {
        let mut frame = self.enter_field(field)?;
        if field.is_repeated() {
            frame.require(field.max_repeat() >= 1, "repeated fields need max_repeat >= 1")?;
        }
        codec.validate(&mut frame)
    }

    /// Summary line of `field`.
    pub fn info_field(
        &mut self,
        codec: &dyn FieldCodec,
        field: &'s FieldDescriptor,
    ) -> Result<String, CodecError> {
        let mut frame = self.enter_field(field)?;
        let info = codec.info(&mut frame)?;
        Ok(if field.is_repeated() {
            format!("{} x [{}]", field.max_repeat(), info)
        } else {
            info
        })
    }

    /// Values of a repeated field, cut to `max_repeat` in lenient mode.
    fn repeated_values(
        &self,
        field: &FieldDescriptor,
        message: &'m Message,
    ) -> Result<&'m [Value], CodecError> {
        let values = message.get_repeated(&field.name);
        let max = field.max_repeat() as usize;
        if values.len() <= max {
            return Ok(values);
        }
        if self.strict() {
            return Err(CodecError::OutOfRange {
                field: self.field_path(),
                value: format!("{} elements (max_repeat {})", values.len(), max),
            });
        }
        warn!(
            field = %self.field_path(),
            count = values.len(),
            max_repeat = max,
            "too many repeated values; extra elements dropped"
        );
        Ok(&values[..max])
    }

    fn encode_value(&mut self, codec: &dyn FieldCodec, value: &'m Value) -> Result<BitBuffer, CodecError> {
        if let Some(child) = self.child_message(value)? {
            let mut frame = self.enter_message(child);
            return codec.encode(value, &mut frame);
        }
        let wire = codec.pre_encode(value, self)?;
        codec.encode(&wire, self)
    }

    fn size_value(&mut self, codec: &dyn FieldCodec, value: &'m Value) -> Result<usize, CodecError> {
        if let Some(child) = self.child_message(value)? {
            let mut frame = self.enter_message(child);
            return codec.size(value, &mut frame);
        }
        let wire = codec.pre_encode(value, self)?;
        codec.size(&wire, self)
    }

    /// The nested message held by a message-typed field.
    fn child_message(&self, value: &'m Value) -> Result<Option<&'m Message>, CodecError> {
        if !self.this_field().is_some_and(|f| f.is_message()) {
            return Ok(None);
        }
        match value {
            Value::Message(child) => Ok(Some(child)),
            other => Err(CodecError::mismatch(
                &self.field_path(),
                "message",
                other.kind_name(),
            )),
        }
    }

    fn decode_value(
        &mut self,
        codec: &dyn FieldCodec,
        source: &mut dyn BitSource,
    ) -> Result<Option<Value>, CodecError> {
        let mut bits = FieldBits::new(source);
        let min = codec.min_size(self)?;
        bits.get_more_bits(min)?;
        match codec.decode(&mut bits, self)? {
            Some(wire) => Ok(Some(codec.post_decode(wire, self)?)),
            None => Ok(None),
        }
    }
}

fn slots(field: &FieldDescriptor) -> usize {
    if field.is_repeated() {
        field.max_repeat() as usize
    } else {
        1
    }
}
