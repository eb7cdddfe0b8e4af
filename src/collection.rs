//! Sequence element codec (lists, sets, and any [`SequenceAdapter`]).
//!
//! Wire layout: `varuint(count) | header:u8 | [type tag]? | element*`. An
//! empty sequence is just `varuint(0)`. The header is decided by one scan
//! over the elements (see [`crate::flags`]); the elements are then written
//! with a single strategy, never re-classified one by one.

use crate::adapter::SequenceAdapter;
use crate::buffer::read_u8;
use crate::context::{
    read_ref_or_inline, write_ref_or_inline, HasGenerics, ReadContext, SlotMode, WriteContext,
};
use crate::core::{read_any, read_tagged, write_any, write_tagged, TypeId};
use crate::flags::{classify, decide_strategy, Strategy, HAS_NULL, NOT_DECL_ELEMENT_TYPE, NOT_SAME_TYPE};
use crate::{EncoderError, Result};
use tracing::trace;

/// Writes the element count followed by the elements.
pub fn write_sequence<C: SequenceAdapter>(ctx: &mut WriteContext<'_>, container: &C) -> Result<()> {
    ctx.with_depth(|ctx| {
        ctx.writer.put_varuint(container.len() as u64);
        write_elements(ctx, container)
    })
}

/// Reads a sequence written by [`write_sequence`] into a fresh container.
pub fn read_sequence<C: SequenceAdapter>(ctx: &mut ReadContext<'_>) -> Result<C> {
    ctx.with_depth(|ctx| {
        let len = ctx.read_len()?;
        let mut container = C::with_len(ctx.capacity_hint(len));
        read_elements(ctx, &mut container, len)?;
        Ok(container)
    })
}

/// Writes header and elements; the caller has already written the count.
pub fn write_elements<C: SequenceAdapter>(ctx: &mut WriteContext<'_>, container: &C) -> Result<()> {
    if container.is_empty() {
        return Ok(());
    }
    let element_frame = ctx.generics.param(0);
    let declared = element_frame.type_id;
    let classification = classify(container.elements());
    let tracking = if classification.same_type {
        ctx.registry
            .tracks_refs(classification.representative_or(declared), ctx.config)
    } else {
        ctx.config.ref_tracking
    };
    let header = decide_strategy(declared, tracking, &classification);
    trace!(
        len = container.len(),
        flags = header.flags,
        strategy = ?header.strategy,
        element_type = %header.element_type,
        "sequence header"
    );

    ctx.writer.put_u8(header.flags);
    let registry = ctx.registry;
    if header.writes_type_tag() {
        registry.write_type_tag(&mut ctx.writer, header.element_type);
    }
    let nullable = if header.flags & HAS_NULL != 0 {
        SlotMode::Nullable
    } else {
        SlotMode::NonNull
    };

    let mut scope = ctx.scoped_generic(element_frame);
    match header.strategy {
        Strategy::SameTypeTracked | Strategy::SameTypeUntracked => {
            let codec = registry.get(header.element_type);
            let mode = if header.strategy == Strategy::SameTypeTracked {
                SlotMode::Tracked
            } else {
                nullable
            };
            for element in container.elements() {
                write_ref_or_inline(&mut scope, element, mode, |ctx, value| {
                    codec
                        .ok_or(EncoderError::UnknownType(u64::from(header.element_type.0)))?
                        .write(value, ctx)
                })?;
            }
        }
        Strategy::DifferentTypesTracked => {
            for element in container.elements() {
                write_any(&mut scope, element)?;
            }
        }
        Strategy::DifferentTypesUntracked => {
            for element in container.elements() {
                write_ref_or_inline(&mut scope, element, nullable, write_tagged)?;
            }
        }
    }
    Ok(())
}

/// Reads header and `len` elements into `container`; the caller has already
/// read the count.
pub fn read_elements<C: SequenceAdapter>(
    ctx: &mut ReadContext<'_>,
    container: &mut C,
    len: usize,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let flags = read_u8(&mut ctx.reader)?;
    let strategy = Strategy::from_flags(flags)?;
    let element_frame = ctx.generics.param(0);
    let registry = ctx.registry;
    let element_type = if flags & NOT_SAME_TYPE != 0 {
        TypeId::UNKNOWN
    } else if flags & NOT_DECL_ELEMENT_TYPE != 0 {
        registry.read_type_tag(&mut ctx.reader)?
    } else {
        element_frame.type_id
    };
    let nullable = if flags & HAS_NULL != 0 {
        SlotMode::Nullable
    } else {
        SlotMode::NonNull
    };

    let mut scope = ctx.scoped_generic(element_frame);
    match strategy {
        Strategy::SameTypeTracked | Strategy::SameTypeUntracked => {
            let codec = registry.get(element_type);
            let mode = if strategy == Strategy::SameTypeTracked {
                SlotMode::Tracked
            } else {
                nullable
            };
            for _ in 0..len {
                let value = read_ref_or_inline(&mut scope, mode, |ctx| {
                    codec
                        .ok_or(EncoderError::UnknownType(u64::from(element_type.0)))?
                        .read(ctx)
                })?;
                container.insert(value);
            }
        }
        Strategy::DifferentTypesTracked => {
            for _ in 0..len {
                container.insert(read_any(&mut scope)?);
            }
        }
        Strategy::DifferentTypesUntracked => {
            for _ in 0..len {
                container.insert(read_ref_or_inline(&mut scope, nullable, read_tagged)?);
            }
        }
    }
    Ok(())
}
