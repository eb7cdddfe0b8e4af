//! # senax-collections
//!
//! Adaptive binary encoding for container values (sequences and maps) in an
//! object-graph serializer.
//!
//! - Sequences get one header byte that records whether elements share a
//!   runtime type, whether it was declared, whether nulls occur and whether
//!   elements are ref-tracked. Shared type tags are written once.
//! - Maps are written in chunks of up to 127 entries that share key and
//!   value handling. The writer streams and backpatches each chunk header; a
//!   fully heterogeneous map falls back to per-entry general encoding.
//! - Classes that extend a built-in container write the container payload
//!   followed by one field block per class level, base level first.
//! - Shared and cyclic references round-trip when reference tracking is on.
//!
//! ```
//! use senax_collections::{decode, encode, Value};
//!
//! let value = Value::List(vec![Value::Int(1), Value::from("x"), Value::Null]);
//! let mut bytes = encode(&value).unwrap();
//! assert_eq!(decode(&mut bytes).unwrap(), value);
//! ```
//!
//! ## Feature Flags
//!
//! - `ahash`: adapters for `ahash::AHashMap` and `ahash::AHashSet`.
//! - `fxhash`: adapters for `fxhash::FxHashMap` and `fxhash::FxHashSet`.

pub mod adapter;
pub mod buffer;
pub mod collection;
pub mod config;
pub mod context;
pub mod core;
mod features;
pub mod flags;
pub mod layered;
pub mod map;
pub mod resolver;
pub mod value;

pub use adapter::{MapAdapter, SequenceAdapter};
pub use config::{CompatibleMode, Config, Limits};
pub use context::{GenericType, ReadContext, WriteContext};
pub use crate::core::{read_any, write_any, TypeId};
pub use layered::{ClassDef, Parent};
pub use map::{ChunkedMapWriter, MapLayout};
pub use resolver::{ElementCodec, TypeKind, TypeRegistry};
pub use value::{Container, ContainerKind, Object, SharedRef, Value};

use bytes::Bytes;
use context::HasGenerics;
use std::sync::Arc;

/// Errors that can occur during encoding or decoding operations.
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    /// The value could not be encoded (e.g., a null in a non-null slot or a logic error).
    #[error("Encode error: {0}")]
    Encode(String),
    /// The value could not be decoded (e.g., invalid data or a malformed header).
    #[error("Decode error: {0}")]
    Decode(String),
    /// The buffer did not contain enough data to complete the operation.
    #[error("Insufficient data in buffer")]
    InsufficientData,
    /// A type tag that does not resolve to a registered type.
    #[error("Unknown type tag {0}")]
    UnknownType(u64),
    /// A decoded count or nesting depth is above the configured limit.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    /// A type or class could not be registered.
    #[error("Registration error: {0}")]
    Registration(String),
    /// Chunked map stream corruption
    #[error(transparent)]
    Chunk(#[from] ChunkDecodeError),
    /// Reference flag or id corruption
    #[error(transparent)]
    Reference(#[from] RefDecodeError),
}

/// The result type used throughout this crate for encode/decode operations.
pub type Result<T> = std::result::Result<T, EncoderError>;

/// Corruption in a chunked map stream.
#[derive(Debug, thiserror::Error)]
pub enum ChunkDecodeError {
    #[error("Invalid map chunk size {0} (maximum is 127)")]
    InvalidChunkSize(u8),
    #[error("Map chunk of {size} entries exceeds the {remaining} entries left in the map")]
    ChunkExceedsBudget { size: u8, remaining: usize },
    #[error("Map data ends with {remaining} entries still expected")]
    Truncated { remaining: usize },
    #[error("Map chunk header declares the {side} type, but no {side} type is declared")]
    MissingDeclaredType { side: &'static str },
}

/// Corruption in reference flags.
#[derive(Debug, thiserror::Error)]
pub enum RefDecodeError {
    #[error("Back-reference to unknown id {id}")]
    UnknownReference { id: u64 },
    #[error("Unexpected reference flag {flag}")]
    UnexpectedFlag { flag: i8 },
}

/// A type registry plus the options every encode and decode call shares.
///
/// Each call gets its own buffer, reference resolver and generic stack, so
/// one `Codec` can serve many calls, sequentially or from several threads.
#[derive(Default)]
pub struct Codec {
    pub registry: TypeRegistry,
    pub config: Config,
}

impl Codec {
    pub fn new(registry: TypeRegistry, config: Config) -> Self {
        Self { registry, config }
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            registry: TypeRegistry::new(),
            config,
        }
    }

    /// Encodes a root value with nothing declared about its type.
    pub fn encode(&self, value: &Value) -> Result<Bytes> {
        self.encode_declared(value, GenericType::any())
    }

    /// Encodes a root value whose static type is `declared`.
    ///
    /// The decoder must pass the same declared type to
    /// [`decode_declared`](Self::decode_declared).
    pub fn encode_declared(&self, value: &Value, declared: GenericType) -> Result<Bytes> {
        let mut ctx = WriteContext::new(&self.registry, &self.config);
        {
            let mut scope = ctx.scoped_generic(Arc::new(declared));
            write_any(&mut scope, value)?;
        }
        Ok(ctx.writer.freeze())
    }

    /// Decodes one root value and advances `reader` past it.
    pub fn decode(&self, reader: &mut Bytes) -> Result<Value> {
        self.decode_declared(reader, GenericType::any())
    }

    pub fn decode_declared(&self, reader: &mut Bytes, declared: GenericType) -> Result<Value> {
        let mut ctx = ReadContext::new(reader.clone(), &self.registry, &self.config);
        let value = {
            let mut scope = ctx.scoped_generic(Arc::new(declared));
            read_any(&mut scope)?
        };
        *reader = ctx.reader;
        Ok(value)
    }
}

/// Encodes a value with the default registry and configuration.
pub fn encode(value: &Value) -> Result<Bytes> {
    Codec::default().encode(value)
}

/// Decodes a value with the default registry and configuration.
pub fn decode(reader: &mut Bytes) -> Result<Value> {
    Codec::default().decode(reader)
}
