//! # bitwire
//!
//! Compact, schema-driven encoding of structured messages for links where
//! every bit counts.
//!
//! Fields are packed at the bit level using their declared bounds and
//! resolution, so a required integer in `[0, 7]` costs three bits. The
//! workspace is split into:
//!
//! - [`bits`]: bit buffers and on-demand bit pools
//! - [`schema`]: message descriptors, values and dynamic condition expressions
//! - [`codec`]: field codecs and the top-level [`Codec`]

pub use bitwire_bits as bits;
pub use bitwire_codec as codec;
pub use bitwire_schema as schema;

pub use bitwire_bits::{BitBuffer, BitError};
pub use bitwire_codec::{
    Clock, Codec, CodecConfig, CodecError, ErrorKind, FieldCodec, FixedClock, LoadedMessage, Part,
    SystemClock,
};
pub use bitwire_schema::{Message, SchemaError, SchemaSet, Value};
