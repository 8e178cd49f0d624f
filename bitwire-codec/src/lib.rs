//! # bitwire-codec
//!
//! Bit-packed encoding of schema-described messages.
//!
//! This crate provides:
//! - The top-level [`Codec`]: load message types, encode, decode, size
//! - Field codecs for numbers, booleans, strings, bytes, enums, times,
//!   static values, ids and nested messages
//! - A registry of named field codecs, extensible at run time
//! - Head/body message parts and dynamic per-field conditions
//!
//! ```no_run
//! use bitwire_codec::Codec;
//! use bitwire_schema::{Message, SchemaSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = SchemaSet::from_json_str(r#"{"messages": [
//!     {"name": "Ping", "options": {"id": 1}, "fields": [
//!         {"name": "seq", "type": "uint32", "label": "required",
//!          "options": {"min": 0, "max": 1023}}
//!     ]}
//! ]}"#)?;
//! let codec = Codec::new(schema);
//! codec.load("Ping")?;
//!
//! let bytes = codec.encode(&Message::new("Ping").with("seq", 42u32))?;
//! let ping = codec.decode(&bytes)?;
//! assert_eq!(ping.get("seq").and_then(|v| v.as_u64()), Some(42));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod dynamic;
pub mod enumeration;
pub mod error;
pub mod field;
pub mod identifier;
pub mod message;
pub mod numeric;
pub mod primitive;
pub mod registry;
pub mod time;

pub use codec::{Codec, LoadedMessage};
pub use config::{CodecConfig, ConfigError, DEFAULT_CODEC_NAME};
pub use context::{CodecEnv, FrameGuard, Part, Traversal};
pub use dynamic::{DynamicConditions, Evaluated};
pub use enumeration::EnumCodec;
pub use error::{CodecError, ErrorKind};
pub use field::FieldCodec;
pub use identifier::{IdentifierCodec, MAX_ID, MAX_SHORT_ID};
pub use message::DefaultMessageCodec;
pub use numeric::{DefaultNumericCodec, NumericSpec, WireNumeric};
pub use primitive::{BoolCodec, BytesCodec, StaticCodec, StringCodec};
pub use registry::{CodecRegistry, ID_CODEC_NAME, STATIC_CODEC_NAME, TIME_CODEC_NAME};
pub use time::{Clock, FixedClock, SystemClock, TimeCodec};
