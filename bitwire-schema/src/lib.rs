//! # bitwire-schema
//!
//! Message schemas and values for the bitwire codec.
//!
//! This crate provides:
//! - Message, field, one-of and enum descriptors loaded from serde data
//! - Schema validation and descriptor checksums
//! - The `Message`/`Value` container the codec reads and fills
//! - The dynamic condition expression language

pub mod descriptor;
pub mod error;
pub mod expr;
pub mod value;

pub use descriptor::{
    CompiledConditions, DynamicSpec, EnumDescriptor, EnumValue, FieldDescriptor, FieldKind,
    FieldOptions, Label, MessageDescriptor, MessageOptions, OneofDescriptor, SchemaSet,
    SchemaSetRaw,
};
pub use error::SchemaError;
pub use expr::{Anchor, BinaryOp, Expr, FieldLookup, Operand};
pub use value::{FieldValue, Message, Value};
