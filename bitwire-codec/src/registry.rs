//! Named field codecs, keyed by name and field kind.

use crate::error::CodecError;
use crate::field::FieldCodec;
use crate::config::DEFAULT_CODEC_NAME;
use crate::enumeration::EnumCodec;
use crate::identifier::IdentifierCodec;
use crate::message::DefaultMessageCodec;
use crate::numeric::DefaultNumericCodec;
use crate::primitive::{BoolCodec, BytesCodec, StaticCodec, StringCodec};
use crate::time::TimeCodec;
use bitwire_schema::{FieldDescriptor, FieldKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name of the time-of-window codec.
pub const TIME_CODEC_NAME: &str = "time";

/// Name of the zero-bit codec that decodes to a field's `static_value`.
pub const STATIC_CODEC_NAME: &str = "static";

/// Name of the variable-length identifier codec.
pub const ID_CODEC_NAME: &str = "id";

/// Field codecs available to a [`Codec`](crate::Codec).
#[derive(Default, Clone)]
pub struct CodecRegistry {
    codecs: HashMap<(String, FieldKind), Arc<dyn FieldCodec>>,
}

impl CodecRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.add(DEFAULT_CODEC_NAME, FieldKind::Double, DefaultNumericCodec::<f64>::new());
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Float, DefaultNumericCodec::<f32>::new());
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Int32, DefaultNumericCodec::<i32>::new());
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Int64, DefaultNumericCodec::<i64>::new());
        registry.add(DEFAULT_CODEC_NAME, FieldKind::UInt32, DefaultNumericCodec::<u32>::new());
        registry.add(DEFAULT_CODEC_NAME, FieldKind::UInt64, DefaultNumericCodec::<u64>::new());
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Bool, BoolCodec);
        registry.add(DEFAULT_CODEC_NAME, FieldKind::String, StringCodec);
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Bytes, BytesCodec);
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Enum, EnumCodec);
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Message, DefaultMessageCodec);
        registry.add(DEFAULT_CODEC_NAME, FieldKind::Timestamp, TimeCodec);

        for kind in [FieldKind::Timestamp, FieldKind::Int64, FieldKind::UInt64, FieldKind::Double] {
            registry.add(TIME_CODEC_NAME, kind, TimeCodec);
        }
        for kind in FieldKind::ALL {
            if kind != FieldKind::Message {
                registry.add(STATIC_CODEC_NAME, kind, StaticCodec);
            }
        }
        for kind in [FieldKind::UInt32, FieldKind::UInt64] {
            registry.add(ID_CODEC_NAME, kind, IdentifierCodec);
        }

        registry
    }

    /// Registers `codec` under `name` for fields of `kind`, replacing any
    /// codec already there.
    pub fn add(&mut self, name: impl Into<String>, kind: FieldKind, codec: impl FieldCodec + 'static) {
        self.add_shared(name, kind, Arc::new(codec));
    }

    pub fn add_shared(&mut self, name: impl Into<String>, kind: FieldKind, codec: Arc<dyn FieldCodec>) {
        let name = name.into();
        debug!(codec = %name, %kind, "registered field codec");
        self.codecs.insert((name, kind), codec);
    }

    pub fn get(&self, name: &str, kind: FieldKind) -> Option<Arc<dyn FieldCodec>> {
        self.codecs.get(&(name.to_string(), kind)).cloned()
    }

    pub fn contains(&self, name: &str, kind: FieldKind) -> bool {
        self.codecs.contains_key(&(name.to_string(), kind))
    }

    /// Codec serving `field`: the field's own codec, else its message's,
    /// else `default_name`.
    pub fn find(
        &self,
        field: &FieldDescriptor,
        message_codec: Option<&str>,
        default_name: &str,
    ) -> Result<Arc<dyn FieldCodec>, CodecError> {
        let name = field
            .options
            .codec
            .as_deref()
            .or(message_codec)
            .unwrap_or(default_name);
        self.get(name, field.kind).ok_or_else(|| CodecError::NoCodec {
            field: field.name.clone(),
            codec: format!("{name} ({})", field.kind),
        })
    }

    /// Registered codec names, sorted and deduplicated.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("names", &self.names())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = CodecRegistry::with_defaults();
        for kind in FieldKind::ALL {
            assert!(registry.contains(DEFAULT_CODEC_NAME, kind), "no default codec for {kind}");
        }
        assert!(registry.contains(TIME_CODEC_NAME, FieldKind::Int64));
        assert!(!registry.contains(TIME_CODEC_NAME, FieldKind::Bool));
        assert!(registry.contains(STATIC_CODEC_NAME, FieldKind::String));
        assert!(!registry.contains(STATIC_CODEC_NAME, FieldKind::Message));
        assert_eq!(registry.names(), vec!["default", "id", "static", "time"]);
    }

    #[test]
    fn test_find_precedence() {
        let mut registry = CodecRegistry::with_defaults();
        registry.add("legacy", FieldKind::Bool, BoolCodec);

        let mut field = FieldDescriptor::new("flag", FieldKind::Bool);
        assert!(registry.find(&field, None, "default").is_ok());
        assert!(registry.find(&field, Some("legacy"), "default").is_ok());

        let err = registry.find(&field, Some("absent"), "default").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("absent"));

        // the field's own codec wins over the message's
        field.options.codec = Some("static".to_string());
        assert!(registry.find(&field, Some("absent"), "default").is_ok());
    }

    #[test]
    fn test_empty_registry() {
        let registry = CodecRegistry::new();
        assert!(registry.is_empty());
        let field = FieldDescriptor::new("x", FieldKind::Int32);
        assert!(matches!(
            registry.find(&field, None, "default"),
            Err(CodecError::NoCodec { .. })
        ));
    }
}
