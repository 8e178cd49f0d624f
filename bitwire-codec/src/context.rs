//! Traversal state for one encode, decode or schema pass.
//!
//! A `Traversal` records which message type and field are being processed,
//! the message values in play and the part (head or body) being produced.
//! Frames are pushed through [`FrameGuard`]s that pop exactly what they
//! pushed when dropped, so an error at any depth unwinds the stacks.

use crate::config::CodecConfig;
use crate::dynamic::{DynamicConditions, Evaluated};
use crate::error::CodecError;
use crate::field::FieldCodec;
use crate::registry::CodecRegistry;
use crate::time::Clock;
use bitwire_schema::{Anchor, FieldDescriptor, FieldLookup, Message, MessageDescriptor, SchemaSet, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Which section of an encoded message is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    Head,
    Body,
    /// No section chosen; inclusion follows each field's `in_head` flag.
    Unknown,
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Part::Head => write!(f, "head"),
            Part::Body => write!(f, "body"),
            Part::Unknown => write!(f, "unknown"),
        }
    }
}

/// Shared, read-only collaborators of a traversal.
#[derive(Clone, Copy)]
pub struct CodecEnv<'s> {
    pub schema: &'s SchemaSet,
    pub registry: &'s CodecRegistry,
    pub config: &'s CodecConfig,
    pub clock: &'s dyn Clock,
}

struct FieldFrame<'s> {
    field: &'s FieldDescriptor,
    required: bool,
}

/// A message being filled in during decode.
struct PendingMessage<'s> {
    /// Field of the parent this message will be stored in.
    field: Option<&'s str>,
    message: Message,
}

enum Values<'s, 'm> {
    Encoding(Vec<&'m Message>),
    Decoding {
        stack: Vec<PendingMessage<'s>>,
        initial: Option<Message>,
    },
    SchemaOnly,
}

/// Recursion state of a single codec run.
pub struct Traversal<'s, 'm> {
    env: CodecEnv<'s>,
    target: Part,
    fields: Vec<FieldFrame<'s>>,
    descriptors: Vec<&'s MessageDescriptor>,
    parts: Vec<Part>,
    values: Values<'s, 'm>,
    schema_only: usize,
}

impl<'s, 'm> Traversal<'s, 'm> {
    fn new(env: CodecEnv<'s>, root: &'s MessageDescriptor, target: Part, values: Values<'s, 'm>) -> Self {
        Self {
            env,
            target,
            fields: Vec::new(),
            descriptors: vec![root],
            parts: vec![Part::Unknown],
            values,
            schema_only: 0,
        }
    }

    /// Starts an encode pass over `message`.
    pub fn for_encode(
        env: CodecEnv<'s>,
        root: &'s MessageDescriptor,
        target: Part,
        message: &'m Message,
    ) -> Self {
        Self::new(env, root, target, Values::Encoding(vec![message]))
    }

    /// Starts a decode pass; the outermost message starts out as `initial`.
    pub fn for_decode(
        env: CodecEnv<'s>,
        root: &'s MessageDescriptor,
        target: Part,
        initial: Message,
    ) -> Self {
        let values = Values::Decoding {
            stack: Vec::new(),
            initial: Some(initial),
        };
        Self::new(env, root, target, values)
    }

    /// Starts a pass over the schema alone (sizes, validation, description).
    pub fn for_schema(env: CodecEnv<'s>, root: &'s MessageDescriptor, target: Part) -> Self {
        Self::new(env, root, target, Values::SchemaOnly)
    }

    pub fn env(&self) -> CodecEnv<'s> {
        self.env
    }

    pub fn schema(&self) -> &'s SchemaSet {
        self.env.schema
    }

    pub fn clock(&self) -> &'s dyn Clock {
        self.env.clock
    }

    pub fn strict(&self) -> bool {
        self.env.config.strict
    }

    /// The part this pass produces or consumes.
    pub fn target_part(&self) -> Part {
        self.target
    }

    /// The part fixed for the current message, or `Unknown` at the root.
    pub fn current_part(&self) -> Part {
        self.parts.last().copied().unwrap_or(Part::Unknown)
    }

    pub fn this_field(&self) -> Option<&'s FieldDescriptor> {
        self.fields.last().map(|f| f.field)
    }

    /// The field a codec is serving; an error outside any field.
    pub fn current_field(&self) -> Result<&'s FieldDescriptor, CodecError> {
        self.this_field().ok_or_else(|| {
            CodecError::validation(self.field_path(), "field codec used outside a field")
        })
    }

    /// The message type currently being traversed.
    pub fn this_descriptor(&self) -> &'s MessageDescriptor {
        // the root descriptor is pushed at construction and never popped
        self.descriptors[self.descriptors.len() - 1]
    }

    pub fn root_descriptor(&self) -> &'s MessageDescriptor {
        self.descriptors[0]
    }

    /// True while no field has been entered.
    pub fn is_outermost(&self) -> bool {
        self.fields.is_empty()
    }

    /// Nesting depth in fields.
    pub fn depth(&self) -> usize {
        self.fields.len()
    }

    /// True when no message values are available.
    pub fn is_schema_only(&self) -> bool {
        self.schema_only > 0 || matches!(self.values, Values::SchemaOnly)
    }

    /// Dotted path of the current field from the root message type.
    pub fn field_path(&self) -> String {
        let mut path = self.root_descriptor().name.clone();
        for frame in &self.fields {
            path.push('.');
            path.push_str(&frame.field.name);
        }
        path
    }

    /// Whether the current field is encoded without a null slot.
    ///
    /// The outermost message is always required. Repeated elements and
    /// one-of members never are.
    pub fn use_required(&self) -> bool {
        self.fields.last().map(|f| f.required).unwrap_or(true)
    }

    /// Fails with a configuration error naming the current field.
    pub fn require(&self, condition: bool, reason: impl Into<String>) -> Result<(), CodecError> {
        if condition {
            Ok(())
        } else {
            Err(CodecError::validation(
                format!("field '{}'", self.field_path()),
                reason,
            ))
        }
    }

    /// Whether `field` of the current message is transmitted in the target
    /// part.
    pub fn check_field(&self, field: &FieldDescriptor) -> bool {
        !field.options.omit && self.in_part(field)
    }

    /// Whether `field` of the current message belongs to the target part,
    /// whether or not it is omitted.
    pub fn in_part(&self, field: &FieldDescriptor) -> bool {
        match (self.target, self.current_part()) {
            (Part::Unknown, _) => true,
            (target, Part::Unknown) => field.options.in_head == (target == Part::Head),
            (target, current) => current == target,
        }
    }

    /// Re-evaluates `field`'s dynamic conditions against the current values.
    pub fn evaluate_conditions(&self, field: &FieldDescriptor) -> Evaluated {
        if self.is_schema_only() {
            return Evaluated::default();
        }
        DynamicConditions::of(field).regenerate(self)
    }

    /// Name of the codec serving `field` of the current message.
    pub fn codec_name<'a>(&'a self, field: &'a FieldDescriptor) -> &'a str {
        field
            .options
            .codec
            .as_deref()
            .or(self.this_descriptor().options.codec.as_deref())
            .unwrap_or(&self.env.config.default_codec)
    }

    /// Looks up the codec for `field` of the current message.
    pub fn find_codec(&self, field: &FieldDescriptor) -> Result<Arc<dyn FieldCodec>, CodecError> {
        let message_codec = self.this_descriptor().options.codec.as_deref();
        self.env
            .registry
            .find(field, message_codec, &self.env.config.default_codec)
    }

    /// Runs `f` with message values hidden, as for size bounds.
    pub fn schema_only<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.schema_only += 1;
        let out = f(self);
        self.schema_only -= 1;
        out
    }

    /// Enters `field` of the current message.
    ///
    /// Pushes the field, and for nested messages the field's message type and
    /// part. The required/optional decision is made here, against the
    /// containing message.
    pub fn enter_field(
        &mut self,
        field: &'s FieldDescriptor,
    ) -> Result<FrameGuard<'_, 's, 'm>, CodecError> {
        let required = self.decide_required(field);
        self.push_field(field, required)
    }

    /// Enters `field` with the required/optional decision fixed by the
    /// caller, for size bounds over both outcomes of `required_if`.
    pub fn enter_field_assuming(
        &mut self,
        field: &'s FieldDescriptor,
        required: bool,
    ) -> Result<FrameGuard<'_, 's, 'm>, CodecError> {
        self.push_field(field, required)
    }

    fn push_field(
        &mut self,
        field: &'s FieldDescriptor,
        required: bool,
    ) -> Result<FrameGuard<'_, 's, 'm>, CodecError> {
        let child = if field.is_message() {
            let name = field.type_name.as_deref().unwrap_or_default();
            let desc = self
                .env
                .schema
                .message(name)
                .ok_or_else(|| CodecError::UnknownMessage {
                    name: name.to_string(),
                })?;
            let part = match self.current_part() {
                Part::Unknown if field.options.in_head => Part::Head,
                Part::Unknown => Part::Body,
                known => known,
            };
            Some((desc, part))
        } else {
            None
        };

        self.fields.push(FieldFrame { field, required });
        let mut pushed = Pushed {
            field: true,
            ..Pushed::default()
        };
        if let Some((desc, part)) = child {
            self.descriptors.push(desc);
            self.parts.push(part);
            pushed.descriptor = true;
            pushed.part = true;
        }
        Ok(FrameGuard { ctx: self, pushed })
    }

    fn decide_required(&self, field: &FieldDescriptor) -> bool {
        if field.is_repeated() || field.in_oneof() {
            return false;
        }
        if field.is_required() {
            return true;
        }
        !self.is_schema_only() && self.evaluate_conditions(field).required
    }

    /// Makes `message` the current message of an encode pass.
    pub fn enter_message(&mut self, message: &'m Message) -> FrameGuard<'_, 's, 'm> {
        let mut pushed = Pushed::default();
        if let Values::Encoding(stack) = &mut self.values {
            stack.push(message);
            pushed.message = true;
        }
        FrameGuard { ctx: self, pushed }
    }

    /// The message being encoded at this level.
    pub fn encoding_message(&self) -> Option<&'m Message> {
        match &self.values {
            Values::Encoding(stack) => stack.last().copied(),
            _ => None,
        }
    }

    /// Starts filling a message during decode. The outermost message starts
    /// from the pass's initial message, nested ones from `fresh`.
    pub fn enter_pending(&mut self, fresh: Message) -> FrameGuard<'_, 's, 'm> {
        let field = self.this_field().map(|f| f.name.as_str());
        let outermost = self.is_outermost();
        let mut pushed = Pushed::default();
        if let Values::Decoding { stack, initial } = &mut self.values {
            let message = match initial.take() {
                Some(start) if outermost => start,
                other => {
                    *initial = other;
                    fresh
                }
            };
            stack.push(PendingMessage { field, message });
            pushed.pending = true;
        }
        FrameGuard { ctx: self, pushed }
    }

    /// The message being filled at this level of a decode pass.
    pub fn decoding_message_mut(&mut self) -> Option<&mut Message> {
        match &mut self.values {
            Values::Decoding { stack, .. } => stack.last_mut().map(|p| &mut p.message),
            _ => None,
        }
    }

    /// The message the current field belongs to, in either direction.
    pub fn this_message(&self) -> Option<&Message> {
        match &self.values {
            Values::Encoding(stack) => stack.last().copied(),
            Values::Decoding { stack, .. } => stack.last().map(|p| &p.message),
            Values::SchemaOnly => None,
        }
    }

    fn pop_pending(&mut self) -> Option<Message> {
        match &mut self.values {
            Values::Decoding { stack, .. } => stack.pop().map(|p| p.message),
            _ => None,
        }
    }

    fn lookup_root(&self, path: &str) -> Option<&Value> {
        match &self.values {
            Values::Encoding(stack) => stack.first()?.lookup(path),
            Values::Decoding { stack, .. } => lookup_pending(stack, path),
            Values::SchemaOnly => None,
        }
    }
}

/// Resolves a root path through the chain of partially decoded messages.
fn lookup_pending<'a>(stack: &'a [PendingMessage<'_>], path: &str) -> Option<&'a Value> {
    let top = stack.first()?;
    let Some((head, rest)) = path.split_once('.') else {
        return top.message.get(path);
    };
    if let Some(value) = top.message.get(head) {
        return value.as_message()?.lookup(rest);
    }
    match stack.get(1) {
        Some(next) if next.field == Some(head) => lookup_pending(&stack[1..], rest),
        _ => None,
    }
}

impl FieldLookup for Traversal<'_, '_> {
    fn lookup(&self, anchor: Anchor, path: &str) -> Option<&Value> {
        if self.is_schema_only() {
            return None;
        }
        match anchor {
            Anchor::This => self.this_message()?.lookup(path),
            Anchor::Root => self.lookup_root(path),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Pushed {
    field: bool,
    descriptor: bool,
    part: bool,
    message: bool,
    pending: bool,
}

/// Scope of one pushed frame; pops on drop in reverse push order.
pub struct FrameGuard<'t, 's, 'm> {
    ctx: &'t mut Traversal<'s, 'm>,
    pushed: Pushed,
}

impl FrameGuard<'_, '_, '_> {
    /// Pops the message filled in this frame and returns it.
    pub fn finish(mut self) -> Message {
        if !self.pushed.pending {
            return Message::default();
        }
        self.pushed.pending = false;
        self.ctx.pop_pending().unwrap_or_default()
    }
}

impl<'s, 'm> Deref for FrameGuard<'_, 's, 'm> {
    type Target = Traversal<'s, 'm>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for FrameGuard<'_, '_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for FrameGuard<'_, '_, '_> {
    fn drop(&mut self) {
        if self.pushed.pending {
            self.ctx.pop_pending();
        }
        if self.pushed.message {
            if let Values::Encoding(stack) = &mut self.ctx.values {
                stack.pop();
            }
        }
        if self.pushed.part {
            self.ctx.parts.pop();
        }
        if self.pushed.descriptor {
            self.ctx.descriptors.pop();
        }
        if self.pushed.field {
            self.ctx.fields.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn schema() -> SchemaSet {
        SchemaSet::from_json(&json!({
            "messages": [
                {"name": "Outer", "fields": [
                    {"name": "kind", "type": "int32", "label": "required",
                     "options": {"min": 0, "max": 3, "in_head": true}},
                    {"name": "inner", "type": "message", "type_name": "Inner"},
                    {"name": "flag", "type": "bool",
                     "options": {"dynamic_conditions": {"required_if": "this.kind == 2"}}},
                    {"name": "items", "type": "int32", "label": "repeated",
                     "options": {"min": 0, "max": 3, "max_repeat": 2}},
                    {"name": "hidden", "type": "bool", "options": {"omit": true}}
                ]},
                {"name": "Inner", "fields": [
                    {"name": "x", "type": "int32", "options": {"min": 0, "max": 3}}
                ]}
            ]
        }))
        .unwrap()
    }

    fn with_env<T>(f: impl FnOnce(CodecEnv<'_>, &SchemaSet) -> T) -> T {
        let schema = schema();
        let registry = CodecRegistry::with_defaults();
        let config = CodecConfig::default();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let env = CodecEnv {
            schema: &schema,
            registry: &registry,
            config: &config,
            clock: &clock,
        };
        f(env, &schema)
    }

    #[test]
    fn test_frames_pop_in_reverse() {
        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let mut ctx = Traversal::for_schema(env, outer, Part::Body);
            assert!(ctx.is_outermost());
            assert_eq!(ctx.current_part(), Part::Unknown);

            {
                let frame = ctx.enter_field(outer.field("inner").unwrap()).unwrap();
                assert_eq!(frame.this_descriptor().name, "Inner");
                assert_eq!(frame.current_part(), Part::Body);
                assert_eq!(frame.field_path(), "Outer.inner");
                assert!(!frame.is_outermost());
                assert!(!frame.use_required());
            }

            assert!(ctx.is_outermost());
            assert_eq!(ctx.this_descriptor().name, "Outer");
            assert_eq!(ctx.current_part(), Part::Unknown);
            assert!(ctx.use_required());
        });
    }

    #[test]
    fn test_frames_pop_on_error_path() {
        fn fails(ctx: &mut Traversal<'_, '_>, field: &'static str) -> Result<(), CodecError> {
            let desc = ctx.this_descriptor();
            let frame = ctx.enter_field(desc.field(field).unwrap())?;
            frame.require(false, "always fails")
        }

        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let mut ctx = Traversal::for_schema(env, outer, Part::Body);
            let err = fails(&mut ctx, "inner").unwrap_err();
            assert!(err.to_string().contains("Outer.inner"));
            assert_eq!(ctx.depth(), 0);
            assert_eq!(ctx.this_descriptor().name, "Outer");
        });
    }

    #[test]
    fn test_check_field_parts() {
        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let kind = outer.field("kind").unwrap();
            let inner = outer.field("inner").unwrap();
            let hidden = outer.field("hidden").unwrap();

            let head = Traversal::for_schema(env, outer, Part::Head);
            assert!(head.check_field(kind));
            assert!(!head.check_field(inner));
            assert!(!head.check_field(hidden));

            let body = Traversal::for_schema(env, outer, Part::Body);
            assert!(!body.check_field(kind));
            assert!(body.check_field(inner));

            let whole = Traversal::for_schema(env, outer, Part::Unknown);
            assert!(whole.check_field(kind));
            assert!(whole.check_field(inner));
            assert!(!whole.check_field(hidden));
            // omitted fields still belong to a part
            assert!(whole.in_part(hidden));
            assert!(!head.in_part(inner));
        });
    }

    #[test]
    fn test_required_decisions() {
        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let msg = Message::new("Outer").with("kind", 2i32);
            let mut ctx = Traversal::for_encode(env, outer, Part::Unknown, &msg);

            assert!(ctx.enter_field(outer.field("kind").unwrap()).unwrap().use_required());
            // required_if evaluated against the containing message
            assert!(ctx.enter_field(outer.field("flag").unwrap()).unwrap().use_required());
            assert!(!ctx.enter_field(outer.field("items").unwrap()).unwrap().use_required());

            let other = Message::new("Outer").with("kind", 1i32);
            let mut ctx = Traversal::for_encode(env, outer, Part::Unknown, &other);
            assert!(!ctx.enter_field(outer.field("flag").unwrap()).unwrap().use_required());
        });
    }

    #[test]
    fn test_encode_message_stack() {
        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let inner_msg = Message::new("Inner").with("x", 3i32);
            let msg = Message::new("Outer")
                .with("kind", 1i32)
                .with("inner", inner_msg.clone());
            let mut ctx = Traversal::for_encode(env, outer, Part::Body, &msg);
            assert_eq!(ctx.lookup(Anchor::This, "kind"), Some(&Value::Int(1)));

            let child = msg.get_message("inner").unwrap();
            {
                let mut frame = ctx.enter_field(outer.field("inner").unwrap()).unwrap();
                let frame = frame.enter_message(child);
                assert_eq!(frame.lookup(Anchor::This, "x"), Some(&Value::Int(3)));
                assert_eq!(frame.lookup(Anchor::Root, "kind"), Some(&Value::Int(1)));
                assert_eq!(frame.lookup(Anchor::Root, "inner.x"), Some(&Value::Int(3)));
            }
            assert_eq!(ctx.encoding_message().map(|m| m.type_name()), Some("Outer"));
        });
    }

    #[test]
    fn test_decode_pending_view() {
        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let head = Message::new("Outer").with("kind", 2i32);
            let mut ctx = Traversal::for_decode(env, outer, Part::Body, head);

            let mut root = ctx.enter_pending(Message::new("Outer"));
            // initial message seeds the outermost level
            assert_eq!(root.lookup(Anchor::This, "kind"), Some(&Value::Int(2)));

            {
                let mut field = root.enter_field(outer.field("inner").unwrap()).unwrap();
                let mut inner = field.enter_pending(Message::new("Inner"));
                inner.decoding_message_mut().unwrap().set("x", 1i32);
                // root view sees into the in-progress nested message
                assert_eq!(inner.lookup(Anchor::Root, "inner.x"), Some(&Value::Int(1)));
                let built = inner.finish();
                assert_eq!(built.get("x"), Some(&Value::Int(1)));
            }

            let done = root.finish();
            assert_eq!(done.get("kind"), Some(&Value::Int(2)));
        });
    }

    #[test]
    fn test_schema_only_hides_values() {
        with_env(|env, schema| {
            let outer = schema.message("Outer").unwrap();
            let msg = Message::new("Outer").with("kind", 2i32);
            let mut ctx = Traversal::for_encode(env, outer, Part::Unknown, &msg);
            assert!(!ctx.is_schema_only());
            let seen = ctx.schema_only(|c| (c.is_schema_only(), c.lookup(Anchor::This, "kind").is_some()));
            assert_eq!(seen, (true, false));
            assert!(!ctx.is_schema_only());
        });
    }
}
