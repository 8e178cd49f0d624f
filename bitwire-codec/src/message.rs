//! The default codec of nested and top-level messages.
//!
//! Wire layout of a message, first bit first:
//!
//! ```text
//! [presence bit]  only when the message is an optional field
//! [selector]*     one per one-of group: 0 = none, k = k-th member
//! [field]*        fields in declaration order
//! ```
//!
//! Fields outside the current part, unselected one-of members and fields
//! whose `omit_if` holds take no bits. Repeated fields take `max_repeat`
//! slots.

use crate::context::Traversal;
use crate::dynamic::DynamicConditions;
use crate::error::CodecError;
use crate::field::FieldCodec;
use bitwire_bits::{ceil_log2, BitBuffer, FieldBits};
use bitwire_schema::{FieldDescriptor, Message, MessageDescriptor, Value};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Min,
    Max,
}

/// Codec of message-typed fields and of the outermost message.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMessageCodec;

impl DefaultMessageCodec {
    /// Width of the selector of one-of group `index`.
    pub fn selector_width(desc: &MessageDescriptor, index: usize) -> usize {
        ceil_log2(desc.oneof_members(index).count() as u128 + 1)
    }

    /// Whether the selector of one-of group `index` is transmitted in the
    /// current part. Members of a group always share a part, and the
    /// selector is sent even when some members are omitted.
    fn group_included(ctx: &Traversal<'_, '_>, desc: &MessageDescriptor, index: usize) -> bool {
        desc.oneof_members(index).next().is_some_and(|m| ctx.in_part(m))
    }

    /// Position of the set member of each one-of group.
    fn selected_cases(
        ctx: &Traversal<'_, '_>,
        desc: &MessageDescriptor,
        message: &Message,
    ) -> Result<Vec<Option<usize>>, CodecError> {
        let mut cases = Vec::with_capacity(desc.oneofs.len());
        for (index, group) in desc.oneofs.iter().enumerate() {
            let mut set = desc
                .oneof_members(index)
                .enumerate()
                .filter(|(_, member)| message.has(&member.name))
                .map(|(position, _)| position);
            let selected = set.next();
            if set.next().is_some() {
                return Err(CodecError::InvalidValue {
                    field: format!("{}.{}", ctx.field_path(), group.name),
                    reason: "more than one member of the one-of is set".to_string(),
                });
            }
            cases.push(selected);
        }
        Ok(cases)
    }

    /// Whether `field` takes no bits given the one-of selections and the
    /// current values.
    fn skipped(
        ctx: &Traversal<'_, '_>,
        desc: &MessageDescriptor,
        field: &FieldDescriptor,
        cases: &[Option<usize>],
    ) -> bool {
        if !ctx.check_field(field) {
            return true;
        }
        if let Some(group) = desc.oneof_index(field) {
            let position = desc.oneof_members(group).position(|m| m.name == field.name);
            if cases.get(group).copied().flatten() != position {
                return true;
            }
        }
        !field.is_repeated() && ctx.evaluate_conditions(field).omit
    }

    /// Encodes the current message of an encode pass.
    pub fn encode_message(&self, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        let desc = ctx.this_descriptor();
        let message = ctx
            .encoding_message()
            .ok_or_else(|| CodecError::validation(ctx.field_path(), "no message to encode"))?;
        let cases = Self::selected_cases(ctx, desc, message)?;

        let mut bits = BitBuffer::new();
        for (index, case) in cases.iter().enumerate() {
            if Self::group_included(ctx, desc, index) {
                let selector = case.map_or(0, |position| position as u64 + 1);
                bits.append(&BitBuffer::from_u64(selector, Self::selector_width(desc, index))?);
            }
        }
        for field in &desc.fields {
            if Self::skipped(ctx, desc, field, &cases) {
                continue;
            }
            let codec = ctx.find_codec(field)?;
            bits.append(&ctx.encode_field(codec.as_ref(), field, message)?);
        }

        if !ctx.use_required() {
            bits.push_front(true);
        }
        trace!(message = %desc.name, bits = bits.len(), "encoded message");
        Ok(bits)
    }

    /// Encoded size of the current message of an encode pass, in bits.
    pub fn size_message(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        let desc = ctx.this_descriptor();
        let message = ctx
            .encoding_message()
            .ok_or_else(|| CodecError::validation(ctx.field_path(), "no message to size"))?;
        let cases = Self::selected_cases(ctx, desc, message)?;

        let mut total = usize::from(!ctx.use_required());
        for index in 0..cases.len() {
            if Self::group_included(ctx, desc, index) {
                total += Self::selector_width(desc, index);
            }
        }
        for field in &desc.fields {
            if Self::skipped(ctx, desc, field, &cases) {
                continue;
            }
            let codec = ctx.find_codec(field)?;
            total += ctx.size_field(codec.as_ref(), field, message)?;
        }
        Ok(total)
    }

    /// Size bound of the current message's contents, excluding any presence
    /// bit. Call with values hidden.
    fn content_bound(ctx: &mut Traversal<'_, '_>, bound: Bound) -> Result<usize, CodecError> {
        let desc = ctx.this_descriptor();
        let mut total = 0;

        for index in 0..desc.oneofs.len() {
            if !Self::group_included(ctx, desc, index) {
                continue;
            }
            total += Self::selector_width(desc, index);
            if bound == Bound::Max {
                let mut largest = 0;
                for member in desc.oneof_members(index).filter(|m| !m.options.omit) {
                    let codec = ctx.find_codec(member)?;
                    largest = largest.max(ctx.max_size_field(codec.as_ref(), member)?);
                }
                total += largest;
            }
        }

        for field in &desc.fields {
            if field.in_oneof() || !ctx.check_field(field) {
                continue;
            }
            let codec = ctx.find_codec(field)?;
            total += match bound {
                Bound::Min if !field.is_repeated() && DynamicConditions::of(field).has_omit_if() => 0,
                Bound::Min => ctx.min_size_field(codec.as_ref(), field)?,
                Bound::Max => ctx.max_size_field(codec.as_ref(), field)?,
            };
        }
        Ok(total)
    }

    /// One line per field of the current message, indented by depth.
    fn field_lines(ctx: &mut Traversal<'_, '_>) -> Result<Vec<String>, CodecError> {
        let desc = ctx.this_descriptor();
        let indent = "  ".repeat(ctx.depth() + 1);
        let mut lines = Vec::new();

        for (index, group) in desc.oneofs.iter().enumerate() {
            if Self::group_included(ctx, desc, index) {
                lines.push(format!(
                    "{indent}oneof {} selector {} bit(s)",
                    group.name,
                    Self::selector_width(desc, index)
                ));
            }
        }
        for field in &desc.fields {
            if field.options.omit {
                lines.push(format!("{indent}{} (omitted)", field.name));
                continue;
            }
            if !ctx.check_field(field) {
                continue;
            }
            let codec = ctx.find_codec(field)?;
            let codec_name = ctx.codec_name(field).to_string();
            let summary = ctx.info_field(codec.as_ref(), field)?;
            let mut tags = Vec::new();
            if field.options.in_head {
                tags.push("head".to_string());
            }
            if let Some(group) = &field.oneof {
                tags.push(format!("oneof {group}"));
            }
            let tags = if tags.is_empty() {
                String::new()
            } else {
                format!(" ({})", tags.join(", "))
            };
            lines.push(format!(
                "{indent}{}: {} [{}] {}{}",
                field.name, field.kind, codec_name, summary, tags
            ));
        }
        Ok(lines)
    }
}

impl FieldCodec for DefaultMessageCodec {
    fn encode(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<BitBuffer, CodecError> {
        self.encode_message(ctx)
    }

    fn decode(
        &self,
        bits: &mut FieldBits<'_>,
        ctx: &mut Traversal<'_, '_>,
    ) -> Result<Option<Value>, CodecError> {
        if !ctx.use_required() && bits.take(1)?.is_all_zero() {
            return Ok(None);
        }

        let desc = ctx.this_descriptor();
        let mut frame = ctx.enter_pending(Message::new(desc.name.as_str()));

        let mut cases = vec![None; desc.oneofs.len()];
        for (index, case) in cases.iter_mut().enumerate() {
            if !Self::group_included(&frame, desc, index) {
                continue;
            }
            let selector = bits.take(Self::selector_width(desc, index))?.to_u64()?;
            let members = desc.oneof_members(index).count() as u64;
            if selector > members {
                return Err(CodecError::malformed(format!(
                    "one-of '{}' selector {} with {} members",
                    desc.oneofs[index].name, selector, members
                )));
            }
            *case = selector.checked_sub(1).map(|position| position as usize);
        }

        for field in &desc.fields {
            if Self::skipped(&frame, desc, field, &cases) {
                continue;
            }
            let codec = frame.find_codec(field)?;
            frame.decode_field(codec.as_ref(), field, bits)?;
        }

        let message = frame.finish();
        trace!(message = %desc.name, fields = message.len(), "decoded message");
        Ok(Some(Value::Message(message)))
    }

    fn size(&self, _wire: &Value, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        self.size_message(ctx)
    }

    fn min_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        if !ctx.use_required() {
            return Ok(1);
        }
        ctx.schema_only(|ctx| Self::content_bound(ctx, Bound::Min))
    }

    fn max_size(&self, ctx: &mut Traversal<'_, '_>) -> Result<usize, CodecError> {
        let presence = usize::from(!ctx.use_required());
        let content = ctx.schema_only(|ctx| Self::content_bound(ctx, Bound::Max))?;
        Ok(presence + content)
    }

    fn validate(&self, ctx: &mut Traversal<'_, '_>) -> Result<(), CodecError> {
        let desc = ctx.this_descriptor();
        if let Some(field) = ctx.this_field() {
            ctx.require(field.is_message(), "message codec on a non-message field")?;
        }
        for field in &desc.fields {
            let codec = ctx.find_codec(field)?;
            ctx.validate_field(codec.as_ref(), field)?;
        }
        Ok(())
    }

    fn info(&self, ctx: &mut Traversal<'_, '_>) -> Result<String, CodecError> {
        let min = self.min_size(ctx)?;
        let max = self.max_size(ctx)?;
        let mut out = format!("{min}-{max} bits");
        for line in Self::field_lines(ctx)? {
            out.push('\n');
            out.push_str(&line);
        }
        Ok(out)
    }
}

/// Lines describing every field of the current message, for the outermost
/// message's description.
pub(crate) fn describe_fields(ctx: &mut Traversal<'_, '_>) -> Result<Vec<String>, CodecError> {
    DefaultMessageCodec::field_lines(ctx)
}
