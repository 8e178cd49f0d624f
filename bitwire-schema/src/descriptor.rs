//! Schema descriptors.
//!
//! Schemas are plain serde data:
//!
//! ```json
//! {
//!   "enums": [
//!     {"name": "Health", "values": [{"name": "OK", "number": 0}, {"name": "LOW_BATTERY", "number": 3}]}
//!   ],
//!   "messages": [
//!     {
//!       "name": "Status",
//!       "options": {"id": 124, "max_bytes": 32},
//!       "oneofs": [{"name": "payload"}],
//!       "fields": [
//!         {"name": "time", "type": "timestamp", "label": "required", "options": {"in_head": true}},
//!         {"name": "depth", "type": "double", "options": {"min": 0, "max": 100, "precision": 1}},
//!         {"name": "health", "type": "enum", "type_name": "Health"},
//!         {"name": "depth_limit", "type": "int32", "oneof": "payload", "options": {"min": 0, "max": 10}},
//!         {"name": "note", "type": "string", "oneof": "payload", "options": {"max_length": 16}}
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::SchemaError;
use crate::expr::{Anchor, Expr};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKind {
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "bytes")]
    Bytes,
    #[serde(rename = "enum")]
    Enum,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "timestamp")]
    Timestamp,
}

impl FieldKind {
    pub const ALL: [FieldKind; 12] = [
        FieldKind::Double,
        FieldKind::Float,
        FieldKind::Int32,
        FieldKind::Int64,
        FieldKind::UInt32,
        FieldKind::UInt64,
        FieldKind::Bool,
        FieldKind::String,
        FieldKind::Bytes,
        FieldKind::Enum,
        FieldKind::Message,
        FieldKind::Timestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int32 => "int32",
            FieldKind::Int64 => "int64",
            FieldKind::UInt32 => "uint32",
            FieldKind::UInt64 => "uint64",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::Enum => "enum",
            FieldKind::Message => "message",
            FieldKind::Timestamp => "timestamp",
        }
    }

    /// Integer and floating point kinds.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Double
                | FieldKind::Float
                | FieldKind::Int32
                | FieldKind::Int64
                | FieldKind::UInt32
                | FieldKind::UInt64
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Required,
    #[default]
    Optional,
    Repeated,
}

/// Bound and condition expressions evaluated at run time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omit_if: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_if: Option<String>,
}

/// Per-field codec metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    /// Codec name; falls back to the message's codec, then the configured
    /// default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_repeat: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Never put on the wire.
    pub omit: bool,
    /// Encoded in the message head rather than the body.
    pub in_head: bool,
    /// Literal produced by the static codec.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
    /// Pack enumerators by index (true) or by declared number (false).
    pub packed_enum: bool,
    /// Window length of the time codec, in days.
    pub num_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_conditions: Option<DynamicSpec>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            codec: None,
            min: None,
            max: None,
            resolution: None,
            precision: None,
            max_repeat: None,
            max_length: None,
            omit: false,
            in_head: false,
            static_value: None,
            packed_enum: true,
            num_days: 1,
            dynamic_conditions: None,
        }
    }
}

/// Parsed dynamic condition expressions of a field.
#[derive(Debug, Clone, Default)]
pub struct CompiledConditions {
    pub min: Option<Expr>,
    pub max: Option<Expr>,
    pub omit_if: Option<Expr>,
    pub required_if: Option<Expr>,
}

impl CompiledConditions {
    fn compile(spec: Option<&DynamicSpec>) -> Result<Self, SchemaError> {
        let Some(spec) = spec else {
            return Ok(Self::default());
        };
        let parse = |s: &Option<String>| s.as_deref().map(Expr::parse).transpose();
        Ok(Self {
            min: parse(&spec.min)?,
            max: parse(&spec.max)?,
            omit_if: parse(&spec.omit_if)?,
            required_if: parse(&spec.required_if)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.omit_if.is_none()
            && self.required_if.is_none()
    }

    pub fn has_bounds(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn expressions(&self) -> impl Iterator<Item = &Expr> {
        [&self.min, &self.max, &self.omit_if, &self.required_if]
            .into_iter()
            .flatten()
    }
}

/// A named, typed slot of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: FieldKind,

    /// Referenced message or enum type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    #[serde(default)]
    pub label: Label,

    /// Name of the one-of group this field belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oneof: Option<String>,

    #[serde(default)]
    pub options: FieldOptions,

    #[serde(skip)]
    conditions: CompiledConditions,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            type_name: None,
            label: Label::Optional,
            oneof: None,
            options: FieldOptions::default(),
            conditions: CompiledConditions::default(),
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.label == Label::Required
    }

    pub fn is_message(&self) -> bool {
        self.kind == FieldKind::Message
    }

    pub fn in_oneof(&self) -> bool {
        self.oneof.is_some()
    }

    /// Parsed dynamic conditions; empty until the schema is validated.
    pub fn conditions(&self) -> &CompiledConditions {
        &self.conditions
    }

    /// Number of repeated slots on the wire.
    pub fn max_repeat(&self) -> u32 {
        self.options.max_repeat.unwrap_or(0)
    }
}

/// A one-of group; members are the fields naming it, in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneofDescriptor {
    pub name: String,

    #[serde(skip)]
    members: Vec<usize>,
}

impl OneofDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Indices into the owning message's fields.
    pub fn members(&self) -> &[usize] {
        &self.members
    }
}

/// Message-level codec metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    /// Identifier prefixed to the encoded message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Upper bound on the encoded length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u32>,
    /// Codec used by fields that name none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

/// A message type: ordered fields and one-of groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub name: String,

    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oneofs: Vec<OneofDescriptor>,

    #[serde(default)]
    pub options: MessageOptions,

    /// CRC32C of the serialized descriptor, set on validation.
    #[serde(skip)]
    pub checksum: String,
}

impl MessageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            oneofs: Vec::new(),
            options: MessageOptions::default(),
            checksum: String::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Index of the one-of group `field` belongs to.
    pub fn oneof_index(&self, field: &FieldDescriptor) -> Option<usize> {
        let group = field.oneof.as_deref()?;
        self.oneofs.iter().position(|o| o.name == group)
    }

    /// Members of one-of group `index`, in declared order.
    pub fn oneof_members(&self, index: usize) -> impl Iterator<Item = &FieldDescriptor> {
        self.oneofs
            .get(index)
            .map(|o| o.members.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|i| self.fields.get(*i))
    }

    pub fn id(&self) -> Option<u32> {
        self.options.id
    }
}

/// An enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
}

/// An enumeration type; value order is the declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: Vec<EnumValue>,
}

impl EnumDescriptor {
    /// Position of the enumerator with declared `number`.
    pub fn index_of(&self, number: i32) -> Option<usize> {
        self.values.iter().position(|v| v.number == number)
    }

    pub fn value_at(&self, index: usize) -> Option<&EnumValue> {
        self.values.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn by_number(&self, number: i32) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.number == number)
    }

    pub fn min_number(&self) -> Option<i32> {
        self.values.iter().map(|v| v.number).min()
    }

    pub fn max_number(&self) -> Option<i32> {
        self.values.iter().map(|v| v.number).max()
    }
}

/// Raw schema as stored/transmitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSetRaw {
    #[serde(default)]
    pub messages: Vec<MessageDescriptor>,
    #[serde(default)]
    pub enums: Vec<EnumDescriptor>,
}

/// Validated collection of message and enum types.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    messages: BTreeMap<String, MessageDescriptor>,
    enums: BTreeMap<String, EnumDescriptor>,
}

impl SchemaSet {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a schema from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, SchemaError> {
        let raw: SchemaSetRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Parses and validates a schema from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, SchemaError> {
        let raw: SchemaSetRaw = serde_json::from_str(s)?;
        Self::from_raw(raw)
    }

    /// Validates and indexes raw descriptors.
    pub fn from_raw(raw: SchemaSetRaw) -> Result<Self, SchemaError> {
        let mut enums = BTreeMap::new();
        for e in raw.enums {
            validate_enum(&e)?;
            if enums.contains_key(&e.name) {
                return Err(SchemaError::DuplicateName { name: e.name });
            }
            enums.insert(e.name.clone(), e);
        }

        let mut messages = BTreeMap::new();
        for m in raw.messages {
            if messages.contains_key(&m.name) || enums.contains_key(&m.name) {
                return Err(SchemaError::DuplicateName { name: m.name });
            }
            messages.insert(m.name.clone(), m);
        }

        let names: Vec<String> = messages.keys().cloned().collect();
        for name in &names {
            if let Some(mut desc) = messages.remove(name) {
                prepare_message(&mut desc, &messages, &enums, name)?;
                messages.insert(name.clone(), desc);
            }
        }

        let set = Self { messages, enums };
        set.check_acyclic()?;
        debug!(
            messages = set.messages.len(),
            enums = set.enums.len(),
            "validated schema"
        );
        Ok(set)
    }

    /// Returns the raw descriptors, suitable for serialization.
    pub fn to_raw(&self) -> SchemaSetRaw {
        SchemaSetRaw {
            messages: self.messages.values().cloned().collect(),
            enums: self.enums.values().cloned().collect(),
        }
    }

    /// Adds a message type, revalidating the whole set.
    pub fn add_message(&mut self, message: MessageDescriptor) -> Result<(), SchemaError> {
        let mut raw = self.to_raw();
        raw.messages.push(message);
        *self = Self::from_raw(raw)?;
        Ok(())
    }

    /// Adds an enum type, revalidating the whole set.
    pub fn add_enum(&mut self, enumeration: EnumDescriptor) -> Result<(), SchemaError> {
        let mut raw = self.to_raw();
        raw.enums.push(enumeration);
        *self = Self::from_raw(raw)?;
        Ok(())
    }

    pub fn message(&self, name: &str) -> Option<&MessageDescriptor> {
        self.messages.get(name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDescriptor> {
        self.enums.get(name)
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDescriptor> {
        self.messages.values()
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDescriptor> {
        self.enums.values()
    }

    /// Rejects message types that contain themselves, which would have no
    /// finite maximum size.
    fn check_acyclic(&self) -> Result<(), SchemaError> {
        fn visit<'a>(
            set: &'a SchemaSet,
            name: &'a str,
            path: &mut Vec<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> Result<(), SchemaError> {
            if done.contains(name) {
                return Ok(());
            }
            if path.contains(&name) {
                return Err(SchemaError::invalid(format!(
                    "recursive message type: {} -> {}",
                    path.join(" -> "),
                    name
                )));
            }
            path.push(name);
            if let Some(desc) = set.messages.get(name) {
                for field in desc.fields.iter().filter(|f| f.is_message()) {
                    if let Some(child) = field.type_name.as_deref() {
                        visit(set, child, path, done)?;
                    }
                }
            }
            path.pop();
            done.insert(name);
            Ok(())
        }

        let mut done = HashSet::new();
        for name in self.messages.keys() {
            visit(self, name, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }
}

fn validate_enum(e: &EnumDescriptor) -> Result<(), SchemaError> {
    if e.values.is_empty() {
        return Err(SchemaError::invalid(format!(
            "enum '{}' has no values",
            e.name
        )));
    }
    let mut names = HashSet::new();
    let mut numbers = HashSet::new();
    for v in &e.values {
        if !names.insert(v.name.as_str()) || !numbers.insert(v.number) {
            return Err(SchemaError::DuplicateName {
                name: format!("{}.{}", e.name, v.name),
            });
        }
    }
    Ok(())
}

/// Validates one message against the rest of the set, compiles its
/// expressions, indexes its one-of groups and computes its checksum.
fn prepare_message(
    desc: &mut MessageDescriptor,
    messages: &BTreeMap<String, MessageDescriptor>,
    enums: &BTreeMap<String, EnumDescriptor>,
    self_name: &str,
) -> Result<(), SchemaError> {
    let mut field_index: HashMap<String, usize> = HashMap::new();
    for (index, field) in desc.fields.iter().enumerate() {
        if field.name.is_empty() || field.name.contains('.') {
            return Err(SchemaError::invalid(format!(
                "invalid field name '{}' in {}",
                field.name, desc.name
            )));
        }
        if field_index.insert(field.name.clone(), index).is_some() {
            return Err(SchemaError::DuplicateName {
                name: format!("{}.{}", desc.name, field.name),
            });
        }
    }

    let mut group_names = HashSet::new();
    for group in &desc.oneofs {
        if !group_names.insert(group.name.as_str()) {
            return Err(SchemaError::DuplicateName {
                name: format!("{}.{}", desc.name, group.name),
            });
        }
    }

    for group in desc.oneofs.iter_mut() {
        group.members.clear();
    }

    for (index, field) in desc.fields.iter_mut().enumerate() {
        let context = format!("field '{}.{}'", desc.name, field.name);

        match field.kind {
            FieldKind::Message => {
                let name = field.type_name.as_deref().unwrap_or_default();
                if name != self_name && !messages.contains_key(name) {
                    return Err(SchemaError::UnknownType {
                        name: name.to_string(),
                        context,
                    });
                }
            }
            FieldKind::Enum => {
                let name = field.type_name.as_deref().unwrap_or_default();
                if !enums.contains_key(name) {
                    return Err(SchemaError::UnknownType {
                        name: name.to_string(),
                        context,
                    });
                }
            }
            _ => {}
        }

        if let Some(group) = field.oneof.as_deref() {
            let Some(slot) = desc.oneofs.iter_mut().find(|o| o.name == group) else {
                return Err(SchemaError::UnknownType {
                    name: group.to_string(),
                    context,
                });
            };
            if field.label != Label::Optional {
                return Err(SchemaError::invalid(format!(
                    "{} is in one-of '{}' and must be optional",
                    context, group
                )));
            }
            if field.options.in_head {
                return Err(SchemaError::invalid(format!(
                    "{} is in one-of '{}' and cannot be in the head",
                    context, group
                )));
            }
            slot.members.push(index);
        }

        field.conditions = CompiledConditions::compile(field.options.dynamic_conditions.as_ref())?;
        for expr in field.conditions.expressions() {
            for (anchor, path) in expr.references() {
                if anchor != Anchor::This {
                    continue;
                }
                let head = path.split('.').next().unwrap_or_default();
                match field_index.get(head) {
                    None => {
                        return Err(SchemaError::expression(format!(
                            "{} references unknown field 'this.{}'",
                            context, path
                        )));
                    }
                    // decoding sees only the fields before this one
                    Some(&referenced) if referenced >= index => {
                        return Err(SchemaError::expression(format!(
                            "{} references 'this.{}', which is not declared before it",
                            context, path
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    if let Some(empty) = desc.oneofs.iter().find(|o| o.members.is_empty()) {
        return Err(SchemaError::invalid(format!(
            "one-of '{}.{}' has no members",
            desc.name, empty.name
        )));
    }

    let json_bytes = serde_json::to_vec(&*desc)?;
    desc.checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));
    Ok(())
}
