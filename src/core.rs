use crate::buffer::{read_bytes_with_len, read_f64, read_i8, read_u8, read_varint};
use crate::collection::{read_sequence, write_sequence};
use crate::context::{read_ref_or_inline, write_ref_or_inline, ReadContext, SlotMode, WriteContext};
use crate::map::{read_map, write_map};
use crate::resolver::ElementCodec;
use crate::value::{with_resolved, Value};
use crate::*;
use bytes::Bytes;
use indexmap::{IndexMap, IndexSet};
use std::fmt;

// Reference and null flags: one signed byte in front of a value whose slot
// may be null or ref-tracked. Stable and part of the wire format.

/// The value is null; nothing follows.
pub const NULL_FLAG: i8 = -3;
/// Back-reference; a varuint reference id follows.
pub const REF_FLAG: i8 = -2;
/// Non-null value that is not ref-tracked; the payload follows.
pub const NOT_NULL_VALUE_FLAG: i8 = -1;
/// First occurrence of a ref-tracked value; it gets the next reference id.
pub const REF_VALUE_FLAG: i8 = 0;

/// Wire type tag of a value, written as a varuint.
///
/// Ids below [`TypeId::FIRST_USER`] are reserved for built-in types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Declared "any"; never written as the tag of a concrete value.
    pub const UNKNOWN: TypeId = TypeId(0);
    pub const BOOL: TypeId = TypeId(1);
    pub const INT: TypeId = TypeId(2);
    pub const FLOAT: TypeId = TypeId(3);
    pub const STRING: TypeId = TypeId(4);
    pub const BINARY: TypeId = TypeId(5);
    pub const LIST: TypeId = TypeId(6);
    pub const SET: TypeId = TypeId(7);
    pub const MAP: TypeId = TypeId(8);
    /// First id handed out to registered classes.
    pub const FIRST_USER: TypeId = TypeId(64);

    pub fn is_builtin(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn mismatch(expected: &str, value: &Value) -> EncoderError {
    EncoderError::Encode(format!(
        "Expected {} value, got type {:?}",
        expected,
        value.type_id()
    ))
}

// --- scalars ---

/// Encodes a `bool` as one byte, 0 or 1.
pub(crate) struct BoolCodec;

impl ElementCodec for BoolCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Bool(b) => {
                ctx.writer.put_u8(*b as u8);
                Ok(())
            }
            other => Err(mismatch("bool", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        match read_u8(&mut ctx.reader)? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(EncoderError::Decode(format!(
                "Expected bool byte (0 or 1), got {}",
                other
            ))),
        }
    }
}

/// Encodes an `i64` as zigzag varint.
pub(crate) struct IntCodec;

impl ElementCodec for IntCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Int(n) => {
                ctx.writer.put_varint(*n);
                Ok(())
            }
            other => Err(mismatch("int", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        Ok(Value::Int(read_varint(&mut ctx.reader)?))
    }
}

/// Encodes an `f64` as 8 little-endian bytes.
pub(crate) struct FloatCodec;

impl ElementCodec for FloatCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Float(f) => {
                ctx.writer.put_f64(*f);
                Ok(())
            }
            other => Err(mismatch("float", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        Ok(Value::Float(read_f64(&mut ctx.reader)?))
    }
}

/// Encodes a UTF-8 string with a varuint byte length.
pub(crate) struct StringCodec;

impl ElementCodec for StringCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Str(s) => {
                ctx.writer.put_bytes_with_len(s.as_bytes());
                Ok(())
            }
            other => Err(mismatch("string", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let bytes = read_bytes_with_len(&mut ctx.reader)?;
        String::from_utf8(bytes.to_vec())
            .map(Value::Str)
            .map_err(|e| EncoderError::Decode(e.to_string()))
    }
}

pub(crate) struct BinaryCodec;

impl ElementCodec for BinaryCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Binary(b) => {
                ctx.writer.put_bytes_with_len(b);
                Ok(())
            }
            other => Err(mismatch("binary", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let bytes: Bytes = read_bytes_with_len(&mut ctx.reader)?;
        Ok(Value::Binary(bytes))
    }
}

// --- containers ---

/// Plain list: element count, header, elements.
pub(crate) struct ListCodec;

impl ElementCodec for ListCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::List(items) => write_sequence(ctx, items),
            other => Err(mismatch("list", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        Ok(Value::List(read_sequence::<Vec<Value>>(ctx)?))
    }
}

pub(crate) struct SetCodec;

impl ElementCodec for SetCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Set(items) => write_sequence(ctx, items),
            other => Err(mismatch("set", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        Ok(Value::Set(read_sequence::<IndexSet<Value>>(ctx)?))
    }
}

/// Plain map: total size, then chunks.
pub(crate) struct MapCodec;

impl ElementCodec for MapCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        match value {
            Value::Map(entries) => write_map(ctx, entries).map(|_| ()),
            other => Err(mismatch("map", other)),
        }
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        Ok(Value::Map(read_map::<IndexMap<Value, Value>>(ctx)?))
    }
}

// --- general per-value form ---

/// Writes a value in the general per-value form: a null or reference flag,
/// then the type tag and payload. A back-reference ends after its id.
pub fn write_any(ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
    let Some(type_id) = value.type_id() else {
        ctx.writer.put_i8(NULL_FLAG);
        return Ok(());
    };
    let mode = if ctx.registry.tracks_refs(type_id, ctx.config) {
        SlotMode::Tracked
    } else {
        SlotMode::Nullable
    };
    write_ref_or_inline(ctx, value, mode, write_tagged)
}

/// Reads a value written by [`write_any`].
pub fn read_any(ctx: &mut ReadContext<'_>) -> Result<Value> {
    read_ref_or_inline(ctx, SlotMode::Tracked, read_tagged)
}

/// Writes the type tag of a non-null value followed by its payload.
pub fn write_tagged(ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
    with_resolved(value, |value| {
        let type_id = value
            .type_id()
            .ok_or_else(|| EncoderError::Encode("Null value has no type tag".to_string()))?;
        let registry = ctx.registry;
        let codec = registry.resolve(type_id)?;
        registry.write_type_tag(&mut ctx.writer, type_id);
        codec.write(value, ctx)
    })
}

/// Reads a type tag and the payload it announces.
pub fn read_tagged(ctx: &mut ReadContext<'_>) -> Result<Value> {
    let registry = ctx.registry;
    let type_id = registry.read_type_tag(&mut ctx.reader)?;
    registry.resolve(type_id)?.read(ctx)
}

/// Reads one flag byte and checks it against the null flag vocabulary.
pub(crate) fn read_null_flag(reader: &mut Bytes) -> Result<bool> {
    match read_i8(reader)? {
        NULL_FLAG => Ok(true),
        NOT_NULL_VALUE_FLAG => Ok(false),
        flag => Err(RefDecodeError::UnexpectedFlag { flag }.into()),
    }
}
