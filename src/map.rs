//! Chunked map codec.
//!
//! Wire layout: `varuint(total) | chunk*`, where
//! `chunk = size:u8 header:u8 entry*`. Entries are grouped into runs of up
//! to [`MAX_CHUNK_SIZE`] that share a key mode and a value mode, so a
//! homogeneous map pays for one type tag per side per chunk instead of one
//! per entry. The writer streams: it reserves the two chunk bytes when a
//! chunk opens and patches them when the chunk closes.
//!
//! When keys and values both stop being homogeneous, the writer gives up on
//! chunking: it writes a `0` size byte and every remaining entry in the
//! general per-value form. The reader runs until the declared total is used
//! up, so no terminator follows the last chunk.

use crate::adapter::MapAdapter;
use crate::buffer::{read_u8, PatchSlot};
use crate::context::{
    read_ref_or_inline, write_ref_or_inline, GenericType, HasGenerics, ReadContext, SlotMode,
    WriteContext,
};
use crate::core::{read_any, write_any, TypeId};
use crate::flags::{
    KEY_DECL_TYPE, KEY_HAS_NULL, KEY_NOT_SAME_TYPE, TRACKING_KEY_REF, TRACKING_VALUE_REF,
    VALUE_DECL_TYPE, VALUE_HAS_NULL, VALUE_NOT_SAME_TYPE,
};
use crate::value::Value;
use crate::{ChunkDecodeError, EncoderError, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest number of entries in one chunk.
pub const MAX_CHUNK_SIZE: u8 = 127;

/// Size byte that switches the rest of the map to the general per-value form.
pub const ABANDON_SENTINEL: u8 = 0;

/// Where one chunk landed in the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Offset of the chunk's size byte; the header byte follows it.
    pub offset: usize,
    pub size: u8,
    pub header: u8,
}

/// Chunks written for one map, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapLayout {
    pub chunks: Vec<ChunkInfo>,
    /// Offset of the abandon sentinel, if chunking was given up.
    pub sentinel: Option<usize>,
}

impl MapLayout {
    /// Number of entries written inside chunks.
    pub fn chunked_entries(&self) -> usize {
        self.chunks.iter().map(|c| c.size as usize).sum()
    }
}

/// Header bits of one side of a chunk.
struct SideBits {
    name: &'static str,
    tracking: u8,
    has_null: u8,
    decl: u8,
    not_same: u8,
}

const KEY_BITS: SideBits = SideBits {
    name: "key",
    tracking: TRACKING_KEY_REF,
    has_null: KEY_HAS_NULL,
    decl: KEY_DECL_TYPE,
    not_same: KEY_NOT_SAME_TYPE,
};

const VALUE_BITS: SideBits = SideBits {
    name: "value",
    tracking: TRACKING_VALUE_REF,
    has_null: VALUE_HAS_NULL,
    decl: VALUE_DECL_TYPE,
    not_same: VALUE_NOT_SAME_TYPE,
};

/// How the keys or the values of one chunk are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SideMode {
    /// Shared type, untracked, never null: payload only.
    Plain,
    /// Shared ref-tracked type: ref flag, then payload.
    Tracked,
    /// Values only. Shared untracked type or null: null marker, then payload.
    Nullable,
    /// Keys only. Every key is null; nothing is written.
    AllNull,
    /// Any type: general per-value form.
    Mixed,
}

/// One side (keys or values) of an open chunk.
struct Side {
    mode: SideMode,
    /// Shared runtime type, once known.
    ty: Option<TypeId>,
    declared: TypeId,
    tag_done: bool,
}

impl Side {
    fn new(mode: SideMode, ty: Option<TypeId>, declared: TypeId) -> Self {
        Self {
            mode,
            ty,
            declared,
            tag_done: false,
        }
    }

    /// Picks the mode for the side of a chunk that opens with `value`.
    fn open(value: &Value, is_key: bool, mixed: bool, declared: TypeId, tracked: bool) -> Self {
        match value.type_id() {
            None if is_key => Side::new(SideMode::AllNull, None, declared),
            _ if mixed => Side::new(SideMode::Mixed, None, declared),
            None => Side::new(SideMode::Nullable, None, declared),
            Some(ty) if tracked => Side::new(SideMode::Tracked, Some(ty), declared),
            Some(ty) => Side::new(SideMode::Plain, Some(ty), declared),
        }
    }

    /// Whether `value` can join this side without closing the chunk.
    ///
    /// A null key never joins a chunk of non-null keys, even a mixed one.
    fn accepts(&self, value: &Value, is_key: bool, tracked: bool) -> bool {
        let ty = value.type_id();
        match self.mode {
            SideMode::Plain => ty.is_some() && ty == self.ty,
            SideMode::Tracked => (ty.is_none() && !is_key) || ty == self.ty,
            SideMode::Nullable => match (ty, self.ty) {
                (None, _) => true,
                (Some(_), None) => !tracked,
                (Some(t), Some(shared)) => t == shared,
            },
            SideMode::AllNull => ty.is_none(),
            SideMode::Mixed => ty.is_some() || !is_key,
        }
    }

    /// True if `value` is non-null and its type differs from the side's shared type.
    fn type_breaks(&self, value: &Value) -> bool {
        match (self.mode, value.type_id(), self.ty) {
            (SideMode::Plain | SideMode::Tracked | SideMode::Nullable, Some(t), Some(shared)) => {
                t != shared
            }
            _ => false,
        }
    }

    fn header_bits(&self, bits: &SideBits) -> u8 {
        let decl = match self.ty {
            Some(ty) if ty == self.declared && self.declared != TypeId::UNKNOWN => bits.decl,
            _ => 0,
        };
        match self.mode {
            SideMode::Plain => decl,
            SideMode::Tracked => bits.tracking | decl,
            SideMode::Nullable | SideMode::AllNull => bits.has_null | decl,
            SideMode::Mixed => bits.not_same,
        }
    }

    /// Rebuilds a side from a chunk header read off the wire.
    fn parse(header: u8, bits: &SideBits, is_key: bool, declared: TypeId) -> Result<Self> {
        let has = |bit: u8| header & bit != 0;
        let invalid = || {
            EncoderError::Decode(format!(
                "Invalid {} bits in map chunk header 0x{:02X}",
                bits.name, header
            ))
        };
        let mode = if has(bits.not_same) {
            if has(bits.tracking) || has(bits.has_null) || has(bits.decl) {
                return Err(invalid());
            }
            SideMode::Mixed
        } else if has(bits.has_null) {
            if has(bits.tracking) || (is_key && has(bits.decl)) {
                return Err(invalid());
            }
            if is_key {
                SideMode::AllNull
            } else {
                SideMode::Nullable
            }
        } else if has(bits.tracking) {
            SideMode::Tracked
        } else {
            SideMode::Plain
        };
        let ty = if has(bits.decl) {
            if declared == TypeId::UNKNOWN {
                return Err(ChunkDecodeError::MissingDeclaredType { side: bits.name }.into());
            }
            Some(declared)
        } else {
            None
        };
        Ok(Side::new(mode, ty, declared))
    }

    fn slot_mode(&self) -> SlotMode {
        match self.mode {
            SideMode::Tracked => SlotMode::Tracked,
            SideMode::Nullable => SlotMode::Nullable,
            _ => SlotMode::NonNull,
        }
    }

    fn write(
        &mut self,
        ctx: &mut WriteContext<'_>,
        value: &Value,
        frame: &Arc<GenericType>,
    ) -> Result<()> {
        if self.mode == SideMode::AllNull {
            return Ok(());
        }
        let mut scope = ctx.scoped_generic(frame.clone());
        if self.mode == SideMode::Mixed {
            return write_any(&mut scope, value);
        }
        if self.ty.is_none() {
            self.ty = value.type_id();
        }
        let slot = self.slot_mode();
        let registry = scope.registry;
        write_ref_or_inline(&mut scope, value, slot, |ctx, v| {
            let ty = self
                .ty
                .ok_or_else(|| EncoderError::Encode("Map side has no type".to_string()))?;
            let codec = registry.resolve(ty)?;
            if !self.tag_done {
                if ty != self.declared {
                    registry.write_type_tag(&mut ctx.writer, ty);
                }
                self.tag_done = true;
            }
            codec.write(v, ctx)
        })
    }

    fn read(&mut self, ctx: &mut ReadContext<'_>, frame: &Arc<GenericType>) -> Result<Value> {
        if self.mode == SideMode::AllNull {
            return Ok(Value::Null);
        }
        let mut scope = ctx.scoped_generic(frame.clone());
        if self.mode == SideMode::Mixed {
            return read_any(&mut scope);
        }
        let slot = self.slot_mode();
        let registry = scope.registry;
        read_ref_or_inline(&mut scope, slot, |ctx| {
            let ty = match self.ty {
                Some(ty) => ty,
                None => {
                    let ty = registry.read_type_tag(&mut ctx.reader)?;
                    self.ty = Some(ty);
                    ty
                }
            };
            registry.resolve(ty)?.read(ctx)
        })
    }
}

struct Chunk {
    slot: PatchSlot,
    offset: usize,
    size: u8,
    key: Side,
    value: Side,
}

enum State {
    Open,
    Accumulating(Chunk),
    Abandoned,
}

/// Streaming writer for the entries of one map.
///
/// Feed every entry to [`write_entry`](Self::write_entry) in iteration
/// order, then call [`finish`](Self::finish) to close the last chunk. The
/// caller writes the total entry count before the first entry.
pub struct ChunkedMapWriter {
    key_frame: Arc<GenericType>,
    value_frame: Arc<GenericType>,
    state: State,
    layout: MapLayout,
}

impl ChunkedMapWriter {
    /// A writer for a map whose declared type is the top generic frame of `ctx`.
    pub fn new(ctx: &WriteContext<'_>) -> Self {
        Self {
            key_frame: ctx.generics.param(0),
            value_frame: ctx.generics.param(1),
            state: State::Open,
            layout: MapLayout::default(),
        }
    }

    pub fn write_entry(&mut self, ctx: &mut WriteContext<'_>, key: &Value, value: &Value) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Open) {
            State::Abandoned => {
                self.state = State::Abandoned;
                self.write_general(ctx, key, value)
            }
            State::Open => self.open_and_write(ctx, key, value, false, false),
            State::Accumulating(mut chunk) => {
                if chunk.size >= MAX_CHUNK_SIZE {
                    self.flush(ctx, chunk)?;
                    return self.open_and_write(ctx, key, value, false, false);
                }
                let key_tracked = tracks(ctx, key);
                let value_tracked = tracks(ctx, value);
                if chunk.key.accepts(key, true, key_tracked)
                    && chunk.value.accepts(value, false, value_tracked)
                {
                    self.write_inline(ctx, &mut chunk, key, value)?;
                    self.state = State::Accumulating(chunk);
                    return Ok(());
                }
                let key_break = chunk.key.type_breaks(key);
                let value_break = chunk.value.type_breaks(value);
                let abandon = (key_break && value_break)
                    || (key_break && chunk.value.mode == SideMode::Mixed)
                    || (value_break && chunk.key.mode == SideMode::Mixed);
                self.flush(ctx, chunk)?;
                if abandon {
                    self.abandon(ctx);
                    return self.write_general(ctx, key, value);
                }
                self.open_and_write(ctx, key, value, key_break, value_break)
            }
        }
    }

    /// Closes the open chunk, if any, and returns where every chunk landed.
    pub fn finish(mut self, ctx: &mut WriteContext<'_>) -> Result<MapLayout> {
        if let State::Accumulating(chunk) = std::mem::replace(&mut self.state, State::Open) {
            self.flush(ctx, chunk)?;
        }
        Ok(self.layout)
    }

    fn open_and_write(
        &mut self,
        ctx: &mut WriteContext<'_>,
        key: &Value,
        value: &Value,
        key_mixed: bool,
        value_mixed: bool,
    ) -> Result<()> {
        let key_side = Side::open(
            key,
            true,
            key_mixed,
            self.key_frame.type_id,
            tracks(ctx, key),
        );
        let value_side = Side::open(
            value,
            false,
            value_mixed,
            self.value_frame.type_id,
            tracks(ctx, value),
        );
        let offset = ctx.writer.position();
        let mut chunk = Chunk {
            slot: ctx.writer.reserve(2),
            offset,
            size: 0,
            key: key_side,
            value: value_side,
        };
        self.write_inline(ctx, &mut chunk, key, value)?;
        self.state = State::Accumulating(chunk);
        Ok(())
    }

    fn write_inline(
        &self,
        ctx: &mut WriteContext<'_>,
        chunk: &mut Chunk,
        key: &Value,
        value: &Value,
    ) -> Result<()> {
        chunk.key.write(ctx, key, &self.key_frame)?;
        chunk.value.write(ctx, value, &self.value_frame)?;
        chunk.size += 1;
        Ok(())
    }

    fn write_general(&self, ctx: &mut WriteContext<'_>, key: &Value, value: &Value) -> Result<()> {
        {
            let mut scope = ctx.scoped_generic(self.key_frame.clone());
            write_any(&mut scope, key)?;
        }
        let mut scope = ctx.scoped_generic(self.value_frame.clone());
        write_any(&mut scope, value)
    }

    fn flush(&mut self, ctx: &mut WriteContext<'_>, chunk: Chunk) -> Result<()> {
        let header = chunk.key.header_bits(&KEY_BITS) | chunk.value.header_bits(&VALUE_BITS);
        ctx.writer.patch(chunk.slot, &[chunk.size, header])?;
        trace!(
            offset = chunk.offset,
            size = chunk.size,
            header,
            "map chunk flushed"
        );
        self.layout.chunks.push(ChunkInfo {
            offset: chunk.offset,
            size: chunk.size,
            header,
        });
        Ok(())
    }

    fn abandon(&mut self, ctx: &mut WriteContext<'_>) {
        let offset = ctx.writer.position();
        ctx.writer.put_u8(ABANDON_SENTINEL);
        debug!(
            offset,
            chunked_entries = self.layout.chunked_entries(),
            "map chunking abandoned"
        );
        self.layout.sentinel = Some(offset);
        self.state = State::Abandoned;
    }
}

fn tracks(ctx: &WriteContext<'_>, value: &Value) -> bool {
    value
        .type_id()
        .is_some_and(|ty| ctx.registry.tracks_refs(ty, ctx.config))
}

/// Writes the entry count followed by the chunked entries.
pub fn write_map<M: MapAdapter>(ctx: &mut WriteContext<'_>, map: &M) -> Result<MapLayout> {
    ctx.with_depth(|ctx| {
        ctx.writer.put_varuint(map.len() as u64);
        write_map_entries(ctx, map)
    })
}

/// Writes the chunked entries; the caller has already written the count.
pub fn write_map_entries<M: MapAdapter>(ctx: &mut WriteContext<'_>, map: &M) -> Result<MapLayout> {
    let mut writer = ChunkedMapWriter::new(ctx);
    for (key, value) in map.entries() {
        writer.write_entry(ctx, key, value)?;
    }
    writer.finish(ctx)
}

/// Reads a map written by [`write_map`] into a fresh container.
pub fn read_map<M: MapAdapter>(ctx: &mut ReadContext<'_>) -> Result<M> {
    ctx.with_depth(|ctx| {
        let len = ctx.read_len()?;
        let mut map = M::with_len(ctx.capacity_hint(len));
        read_map_entries(ctx, &mut map, len)?;
        Ok(map)
    })
}

/// Reads `len` chunked entries into `map`; the caller has already read the count.
pub fn read_map_entries<M: MapAdapter>(
    ctx: &mut ReadContext<'_>,
    map: &mut M,
    len: usize,
) -> Result<()> {
    let key_frame = ctx.generics.param(0);
    let value_frame = ctx.generics.param(1);
    let mut remaining = len;
    while remaining > 0 {
        if ctx.reader.is_empty() {
            return Err(ChunkDecodeError::Truncated { remaining }.into());
        }
        let size = read_u8(&mut ctx.reader)?;
        if size == ABANDON_SENTINEL {
            for _ in 0..remaining {
                let key = {
                    let mut scope = ctx.scoped_generic(key_frame.clone());
                    read_any(&mut scope)?
                };
                let value = {
                    let mut scope = ctx.scoped_generic(value_frame.clone());
                    read_any(&mut scope)?
                };
                map.insert(key, value);
            }
            return Ok(());
        }
        if size > MAX_CHUNK_SIZE {
            return Err(ChunkDecodeError::InvalidChunkSize(size).into());
        }
        if size as usize > remaining {
            return Err(ChunkDecodeError::ChunkExceedsBudget { size, remaining }.into());
        }
        let header = read_u8(&mut ctx.reader)?;
        let mut key_side = Side::parse(header, &KEY_BITS, true, key_frame.type_id)?;
        let mut value_side = Side::parse(header, &VALUE_BITS, false, value_frame.type_id)?;
        for _ in 0..size {
            let key = key_side.read(ctx, &key_frame)?;
            let value = value_side.read(ctx, &value_frame)?;
            map.insert(key, value);
        }
        remaining -= size as usize;
    }
    Ok(())
}
