//! Message values.
//!
//! A `Message` holds the values of a message type's fields by name. Unset
//! fields are simply absent from the map. Values are a closed set of
//! variants covering every field kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    #[serde(rename = "uint")]
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Declared enumerator number.
    Enum(i32),
    Time(DateTime<Utc>),
    Message(Message),
}

impl Value {
    /// Short name of the variant, used in type mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Time(_) => "time",
            Value::Message(_) => "message",
        }
    }

    /// Numeric view of integer, floating point and enum values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Double(d) => Some(*d),
            Value::Enum(e) => Some(*e as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Enum(e) => Some(*e as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<i32> {
        match self {
            Value::Enum(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Enum(e) => write!(f, "enum({})", e),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Message(m) => write!(f, "{} {{..{} fields}}", m.type_name(), m.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Value::Message(v)
    }
}

/// Contents of one field slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(Value),
    Repeated(Vec<Value>),
}

/// A concrete instance of a message type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    type_name: String,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

impl Message {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Sets a singular field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .insert(field.into(), FieldValue::Single(value.into()));
    }

    /// Builder form of [`Message::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Replaces all elements of a repeated field.
    pub fn set_repeated(&mut self, field: impl Into<String>, values: Vec<Value>) {
        self.fields
            .insert(field.into(), FieldValue::Repeated(values));
    }

    /// Appends an element to a repeated field.
    pub fn add(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let values = match self.fields.remove(&field) {
            Some(FieldValue::Repeated(mut values)) => {
                values.push(value.into());
                values
            }
            Some(FieldValue::Single(first)) => vec![first, value.into()],
            None => vec![value.into()],
        };
        self.fields.insert(field, FieldValue::Repeated(values));
    }

    /// Returns a singular field's value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field) {
            Some(FieldValue::Single(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a repeated field's elements; empty when unset.
    pub fn get_repeated(&self, field: &str) -> &[Value] {
        match self.fields.get(field) {
            Some(FieldValue::Repeated(values)) => values,
            Some(FieldValue::Single(v)) => std::slice::from_ref(v),
            None => &[],
        }
    }

    pub fn get_message(&self, field: &str) -> Option<&Message> {
        self.get(field).and_then(Value::as_message)
    }

    /// Returns true if a singular field is set or a repeated field has
    /// elements.
    pub fn has(&self, field: &str) -> bool {
        match self.fields.get(field) {
            Some(FieldValue::Single(_)) => true,
            Some(FieldValue::Repeated(values)) => !values.is_empty(),
            None => false,
        }
    }

    pub fn clear(&mut self, field: &str) {
        self.fields.remove(field);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|slot| match slot {
            FieldValue::Single(_) => false,
            FieldValue::Repeated(values) => values.is_empty(),
        })
    }

    /// Number of populated field slots.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Follows a dotted path through nested singular message fields.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.get(head)?;
        match rest {
            None => Some(value),
            Some(rest) => value.as_message()?.lookup(rest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_set_get_clear() {
        let mut msg = Message::new("Status");
        assert!(msg.is_empty());
        assert!(!msg.has("depth"));

        msg.set("depth", 12.5);
        assert!(msg.has("depth"));
        assert_eq!(msg.get("depth"), Some(&Value::Double(12.5)));
        assert!(!msg.is_empty());

        msg.clear("depth");
        assert!(!msg.has("depth"));
        assert!(msg.get("depth").is_none());
    }

    #[test]
    fn test_repeated_fields() {
        let mut msg = Message::new("Track");
        assert!(msg.get_repeated("points").is_empty());

        msg.add("points", 1i32);
        msg.add("points", 2i32);
        assert_eq!(
            msg.get_repeated("points"),
            &[Value::Int(1), Value::Int(2)]
        );
        assert!(msg.has("points"));
        // repeated slots are not singular values
        assert!(msg.get("points").is_none());

        msg.set_repeated("points", Vec::new());
        assert!(!msg.has("points"));
        assert!(msg.is_empty());
    }

    #[test]
    fn test_nested_lookup() {
        let inner = Message::new("Pose").with("x", 3i32);
        let msg = Message::new("Nav").with("pose", inner).with("id", 7u32);

        assert_eq!(msg.lookup("pose.x"), Some(&Value::Int(3)));
        assert_eq!(msg.lookup("id"), Some(&Value::UInt(7)));
        assert!(msg.lookup("pose.y").is_none());
        assert!(msg.lookup("id.x").is_none());
        assert_eq!(msg.get_message("pose").map(|m| m.type_name()), Some("Pose"));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::Int(-3).as_u64(), None);
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Enum(4).as_i64(), Some(4));
        assert_eq!(Value::from("x").as_f64(), None);
        assert_eq!(Value::from(1.5f32), Value::Double(1.5));
    }

    #[test]
    fn test_serde_round_trip() {
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let msg = Message::new("Report")
            .with("when", when)
            .with("name", "auv-1")
            .with("payload", vec![1u8, 2, 3]);

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("a").to_string(), "\"a\"");
        assert_eq!(Value::Bytes(vec![0; 4]).to_string(), "<4 bytes>");
        assert_eq!(Value::Enum(2).to_string(), "enum(2)");
    }
}
