//! Top-level codec: loads message types and encodes/decodes whole messages.
//!
//! An encoded message is two byte-aligned parts:
//!
//! ```text
//! +----------------------------+------------------+
//! | id | head fields | padding | body fields |pad |
//! +----------------------------+------------------+
//! ```
//!
//! Bytes are filled from the least significant bit: the first bit on the
//! wire is bit 0 of byte 0.
//!
//! The id is present only when the message type declares one. Head fields
//! are those marked `in_head`; everything else is body. Decoding the body
//! starts from the decoded head, so body conditions can see head values.

use crate::config::CodecConfig;
use crate::context::{CodecEnv, Part, Traversal};
use crate::error::CodecError;
use crate::field::FieldCodec;
use crate::identifier::{IdentifierCodec, MAX_ID};
use crate::message::{describe_fields, DefaultMessageCodec};
use crate::registry::CodecRegistry;
use crate::time::{Clock, SystemClock};
use bitwire_bits::{bytes_for_bits, BitBuffer, FieldBits, BITS_PER_BYTE};
use bitwire_schema::{FieldKind, Message, MessageDescriptor, SchemaSet, Value};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use tracing::{debug, trace};

/// Size bounds and identity of a loaded message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedMessage {
    pub name: String,
    pub id: Option<u32>,
    /// Checksum of the descriptor the bounds were computed from.
    pub checksum: String,
    /// Head field bits, excluding the id.
    pub head_min_bits: usize,
    pub head_max_bits: usize,
    pub body_min_bits: usize,
    pub body_max_bits: usize,
}

impl LoadedMessage {
    pub fn id_bits(&self) -> usize {
        self.id.map_or(0, IdentifierCodec::id_size)
    }

    /// Smallest encoded length in bytes.
    pub fn min_bytes(&self) -> usize {
        bytes_for_bits(self.id_bits() + self.head_min_bits) + bytes_for_bits(self.body_min_bits)
    }

    /// Largest encoded length in bytes.
    pub fn max_bytes(&self) -> usize {
        bytes_for_bits(self.id_bits() + self.head_max_bits) + bytes_for_bits(self.body_max_bits)
    }
}

/// Encodes and decodes messages of a schema.
///
/// Message types are loaded on first use. Decoding by id only recognizes
/// types that are already loaded, so receivers should [`load`](Self::load)
/// every type they expect.
pub struct Codec {
    schema: SchemaSet,
    config: CodecConfig,
    registry: RwLock<CodecRegistry>,
    clock: Arc<dyn Clock>,
    loaded: DashMap<String, Arc<LoadedMessage>>,
    ids: DashMap<u32, String>,
}

impl Codec {
    /// Creates a codec with the default configuration and built-in codecs.
    pub fn new(schema: SchemaSet) -> Self {
        Self::with_config(schema, CodecConfig::default())
    }

    pub fn with_config(schema: SchemaSet, config: CodecConfig) -> Self {
        Self {
            schema,
            config,
            registry: RwLock::new(CodecRegistry::with_defaults()),
            clock: Arc::new(SystemClock),
            loaded: DashMap::new(),
            ids: DashMap::new(),
        }
    }

    /// Replaces the clock time fields are decoded against.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn schema(&self) -> &SchemaSet {
        &self.schema
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Registers a field codec under `name` for fields of `kind`.
    ///
    /// Types loaded earlier keep the bounds computed at load time; call
    /// [`load`](Self::load) again to recompute them.
    pub fn add_codec(&self, name: impl Into<String>, kind: FieldKind, codec: impl FieldCodec + 'static) {
        self.registry.write().add(name, kind, codec);
    }

    pub fn add_shared_codec(&self, name: impl Into<String>, kind: FieldKind, codec: Arc<dyn FieldCodec>) {
        self.registry.write().add_shared(name, kind, codec);
    }

    /// Names of the registered field codecs.
    pub fn codec_names(&self) -> Vec<String> {
        self.registry.read().names().into_iter().map(str::to_string).collect()
    }

    fn env<'s>(&'s self, registry: &'s RwLockReadGuard<'_, CodecRegistry>) -> CodecEnv<'s> {
        CodecEnv {
            schema: &self.schema,
            registry,
            config: &self.config,
            clock: self.clock.as_ref(),
        }
    }

    fn descriptor(&self, name: &str) -> Result<&MessageDescriptor, CodecError> {
        self.schema.message(name).ok_or_else(|| CodecError::UnknownMessage {
            name: name.to_string(),
        })
    }

    /// Validates message type `name` against the registered codecs and
    /// computes its size bounds.
    pub fn load(&self, name: &str) -> Result<Arc<LoadedMessage>, CodecError> {
        let desc = self.descriptor(name)?;
        let registry = self.registry.read();
        let env = self.env(&registry);
        let codec = DefaultMessageCodec;

        codec.validate(&mut Traversal::for_schema(env, desc, Part::Unknown))?;

        let context = format!("message '{name}'");
        if let Some(id) = desc.id() {
            if id > MAX_ID {
                return Err(CodecError::validation(
                    context,
                    format!("id {id} exceeds the largest id {MAX_ID}"),
                ));
            }
        }

        let bounds = |part: Part| -> Result<(usize, usize), CodecError> {
            let mut ctx = Traversal::for_schema(env, desc, part);
            Ok((codec.min_size(&mut ctx)?, codec.max_size(&mut ctx)?))
        };
        let (head_min_bits, head_max_bits) = bounds(Part::Head)?;
        let (body_min_bits, body_max_bits) = bounds(Part::Body)?;

        let loaded = LoadedMessage {
            name: desc.name.clone(),
            id: desc.id(),
            checksum: desc.checksum.clone(),
            head_min_bits,
            head_max_bits,
            body_min_bits,
            body_max_bits,
        };

        if self.config.enforce_max_bytes {
            if let Some(max_bytes) = desc.options.max_bytes {
                if loaded.max_bytes() > max_bytes as usize {
                    return Err(CodecError::validation(
                        context,
                        format!(
                            "encodes to up to {} bytes, more than max_bytes {}",
                            loaded.max_bytes(),
                            max_bytes
                        ),
                    ));
                }
            }
        }

        if let Some(id) = loaded.id {
            if let Some(owner) = self.ids.get(&id) {
                if owner.value() != name {
                    return Err(CodecError::validation(
                        context,
                        format!("id {id} is already used by '{}'", owner.value()),
                    ));
                }
            }
            self.ids.insert(id, name.to_string());
        }

        let loaded = Arc::new(loaded);
        self.loaded.insert(name.to_string(), Arc::clone(&loaded));
        debug!(
            message = %name,
            id = ?loaded.id,
            min_bytes = loaded.min_bytes(),
            max_bytes = loaded.max_bytes(),
            "loaded message type"
        );
        Ok(loaded)
    }

    /// Forgets a loaded message type. Returns whether it was loaded.
    pub fn unload(&self, name: &str) -> bool {
        match self.loaded.remove(name) {
            Some((_, loaded)) => {
                if let Some(id) = loaded.id {
                    self.ids.remove(&id);
                }
                debug!(message = %name, "unloaded message type");
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub fn loaded(&self, name: &str) -> Option<Arc<LoadedMessage>> {
        self.loaded.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of the loaded message types, sorted.
    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    fn ensure_loaded(&self, name: &str) -> Result<Arc<LoadedMessage>, CodecError> {
        match self.loaded(name) {
            Some(loaded) => Ok(loaded),
            None => self.load(name),
        }
    }

    /// Encodes `message` into its head and body bytes.
    pub fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let name = message.type_name();
        let loaded = self.ensure_loaded(name)?;
        let desc = self.descriptor(name)?;
        let registry = self.registry.read();
        let env = self.env(&registry);

        let mut head = match loaded.id {
            Some(id) => IdentifierCodec::encode_id(id)?,
            None => BitBuffer::new(),
        };
        head.append(&encode_part(env, desc, message, Part::Head)?);
        let body = encode_part(env, desc, message, Part::Body)?;

        let mut out = BytesMut::with_capacity(bytes_for_bits(head.len()) + bytes_for_bits(body.len()));
        out.put_slice(&head.to_bytes());
        out.put_slice(&body.to_bytes());
        trace!(
            message = %name,
            head_bits = head.len(),
            body_bits = body.len(),
            bytes = out.len(),
            "encoded"
        );
        Ok(out.freeze())
    }

    /// Encodes one part of `message` without id or padding. With
    /// [`Part::Unknown`] the whole message is encoded in one pass.
    pub fn encode_bits(&self, message: &Message, part: Part) -> Result<BitBuffer, CodecError> {
        self.ensure_loaded(message.type_name())?;
        let desc = self.descriptor(message.type_name())?;
        let registry = self.registry.read();
        encode_part(self.env(&registry), desc, message, part)
    }

    /// Decodes bits produced by [`encode_bits`](Self::encode_bits).
    pub fn decode_bits(&self, name: &str, bits: &BitBuffer, part: Part) -> Result<Message, CodecError> {
        self.ensure_loaded(name)?;
        let desc = self.descriptor(name)?;
        let registry = self.registry.read();
        let mut pool = bits.clone();
        decode_part(self.env(&registry), desc, &mut pool, part, Message::new(name))
    }

    /// Bits [`encode_bits`](Self::encode_bits) would produce.
    pub fn size_bits(&self, message: &Message, part: Part) -> Result<usize, CodecError> {
        self.ensure_loaded(message.type_name())?;
        let desc = self.descriptor(message.type_name())?;
        let registry = self.registry.read();
        let mut ctx = Traversal::for_encode(self.env(&registry), desc, part, message);
        DefaultMessageCodec.size_message(&mut ctx)
    }

    /// Length in bytes of `encode(message)`.
    pub fn size(&self, message: &Message) -> Result<usize, CodecError> {
        let loaded = self.ensure_loaded(message.type_name())?;
        let head = loaded.id_bits() + self.size_bits(message, Part::Head)?;
        let body = self.size_bits(message, Part::Body)?;
        Ok(bytes_for_bits(head) + bytes_for_bits(body))
    }

    /// Smallest encoded length of message type `name`, in bytes.
    pub fn min_size(&self, name: &str) -> Result<usize, CodecError> {
        Ok(self.ensure_loaded(name)?.min_bytes())
    }

    /// Largest encoded length of message type `name`, in bytes.
    pub fn max_size(&self, name: &str) -> Result<usize, CodecError> {
        Ok(self.ensure_loaded(name)?.max_bytes())
    }

    /// Reads the id at the start of `bytes`.
    pub fn id(&self, bytes: &[u8]) -> Result<u32, CodecError> {
        IdentifierCodec::peek_id(bytes)
    }

    /// Decodes a message, picking its type from the leading id.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let id = IdentifierCodec::peek_id(bytes)?;
        let name = self
            .ids
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(CodecError::UnknownId { id })?;
        self.decode_as(&name, bytes)
    }

    /// Decodes `bytes` as message type `name`.
    pub fn decode_as(&self, name: &str, bytes: &[u8]) -> Result<Message, CodecError> {
        let loaded = self.ensure_loaded(name)?;
        let desc = self.descriptor(name)?;
        let registry = self.registry.read();
        let env = self.env(&registry);

        let mut pool = BitBuffer::from_bytes(bytes);
        let total = pool.len();

        if let Some(expected) = loaded.id {
            let mut bits = FieldBits::new(&mut pool);
            let id = IdentifierCodec::decode_id(&mut bits)?;
            if id != expected {
                return Err(CodecError::malformed(format!(
                    "id {id} does not match '{name}' (id {expected})"
                )));
            }
        }

        let head = decode_part(env, desc, &mut pool, Part::Head, Message::new(name))?;

        let consumed = total - pool.len();
        let padding = bytes_for_bits(consumed) * BITS_PER_BYTE - consumed;
        pool.take_front(padding)?;

        let message = decode_part(env, desc, &mut pool, Part::Body, head)?;
        trace!(message = %name, bytes = bytes.len(), unused_bits = pool.len(), "decoded");
        Ok(message)
    }

    /// Human-readable layout of message type `name`.
    pub fn describe(&self, name: &str) -> Result<String, CodecError> {
        let loaded = self.ensure_loaded(name)?;
        let desc = self.descriptor(name)?;
        let registry = self.registry.read();
        let mut ctx = Traversal::for_schema(self.env(&registry), desc, Part::Unknown);

        let mut lines = vec![
            name.to_string(),
            format!(
                "  id: {}",
                loaded.id.map_or_else(|| "none".to_string(), |id| id.to_string())
            ),
            format!("  checksum: {}", loaded.checksum),
            format!(
                "  size: {}-{} bytes (head {}-{} bits, body {}-{} bits)",
                loaded.min_bytes(),
                loaded.max_bytes(),
                loaded.id_bits() + loaded.head_min_bits,
                loaded.id_bits() + loaded.head_max_bits,
                loaded.body_min_bits,
                loaded.body_max_bits
            ),
        ];
        if let Some(max_bytes) = desc.options.max_bytes {
            lines.push(format!("  max_bytes: {max_bytes}"));
        }
        lines.extend(describe_fields(&mut ctx)?);
        Ok(lines.join("\n"))
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("config", &self.config)
            .field("loaded", &self.loaded_names())
            .finish_non_exhaustive()
    }
}

fn encode_part(
    env: CodecEnv<'_>,
    desc: &MessageDescriptor,
    message: &Message,
    part: Part,
) -> Result<BitBuffer, CodecError> {
    let mut ctx = Traversal::for_encode(env, desc, part, message);
    DefaultMessageCodec.encode_message(&mut ctx)
}

fn decode_part(
    env: CodecEnv<'_>,
    desc: &MessageDescriptor,
    pool: &mut BitBuffer,
    part: Part,
    initial: Message,
) -> Result<Message, CodecError> {
    let codec = DefaultMessageCodec;
    let mut ctx = Traversal::for_decode(env, desc, part, initial);
    let mut bits = FieldBits::new(pool);
    let min = codec.min_size(&mut ctx)?;
    bits.get_more_bits(min)?;
    match codec.decode(&mut bits, &mut ctx)? {
        Some(Value::Message(message)) => Ok(message),
        _ => Err(CodecError::malformed(format!("'{}' decoded to no message", desc.name))),
    }
}
