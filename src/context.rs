//! Per-call encode and decode state.
//!
//! A [`WriteContext`] or [`ReadContext`] is owned by exactly one in-flight
//! encode or decode call. It bundles the buffer, the registry, the reference
//! resolver and the stack of declared generic types, and it enforces the
//! nesting depth limit.

use crate::buffer::Writer;
use crate::config::Config;
use crate::core::{TypeId, NOT_NULL_VALUE_FLAG, NULL_FLAG};
use crate::resolver::{RefRead, RefReader, RefWriter, TypeRegistry};
use crate::value::{with_resolved, SharedRef, Value};
use crate::{EncoderError, Result};
use bytes::Bytes;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Statically declared type of a slot, with its type parameters.
///
/// [`TypeId::UNKNOWN`] means nothing is declared. A missing parameter reads
/// as "any".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericType {
    pub type_id: TypeId,
    pub params: Vec<Arc<GenericType>>,
}

impl GenericType {
    pub fn any() -> Self {
        Self::of(TypeId::UNKNOWN)
    }

    pub fn of(type_id: TypeId) -> Self {
        Self {
            type_id,
            params: Vec::new(),
        }
    }

    pub fn list(element: GenericType) -> Self {
        Self {
            type_id: TypeId::LIST,
            params: vec![Arc::new(element)],
        }
    }

    pub fn set(element: GenericType) -> Self {
        Self {
            type_id: TypeId::SET,
            params: vec![Arc::new(element)],
        }
    }

    pub fn map(key: GenericType, value: GenericType) -> Self {
        Self {
            type_id: TypeId::MAP,
            params: vec![Arc::new(key), Arc::new(value)],
        }
    }

    /// Type parameter `index`, or "any" if it is not declared.
    pub fn param(&self, index: usize) -> Arc<GenericType> {
        self.params
            .get(index)
            .cloned()
            .unwrap_or_else(|| Arc::new(GenericType::any()))
    }

    pub fn is_declared(&self) -> bool {
        self.type_id != TypeId::UNKNOWN
    }
}

/// Declared types of the containers currently being written or read,
/// innermost on top.
#[derive(Debug, Default)]
pub struct GenericStack {
    frames: Vec<Arc<GenericType>>,
}

impl GenericStack {
    pub fn push(&mut self, frame: Arc<GenericType>) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Arc<GenericType>> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&Arc<GenericType>> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Type parameter `index` of the top frame, or "any" with no frame.
    pub fn param(&self, index: usize) -> Arc<GenericType> {
        match self.top() {
            Some(frame) => frame.param(index),
            None => Arc::new(GenericType::any()),
        }
    }
}

/// Access to the generic stack of a context.
pub trait HasGenerics {
    fn generics_mut(&mut self) -> &mut GenericStack;

    /// Pushes `frame` and returns a guard that pops it when dropped.
    fn scoped_generic(&mut self, frame: Arc<GenericType>) -> GenericScope<'_, Self>
    where
        Self: Sized,
    {
        self.generics_mut().push(frame);
        GenericScope { ctx: self }
    }
}

/// Guard returned by [`HasGenerics::scoped_generic`].
///
/// Derefs to the context, so codecs keep working through the guard; the
/// frame is popped on every exit path, including `?` and unwinding.
pub struct GenericScope<'c, C: HasGenerics> {
    ctx: &'c mut C,
}

impl<C: HasGenerics> Deref for GenericScope<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.ctx
    }
}

impl<C: HasGenerics> DerefMut for GenericScope<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.ctx
    }
}

impl<C: HasGenerics> Drop for GenericScope<'_, C> {
    fn drop(&mut self) {
        self.ctx.generics_mut().pop();
    }
}

fn depth_exceeded(max: usize) -> EncoderError {
    EncoderError::LimitExceeded(format!("Nesting depth exceeds limit {}", max))
}

/// State of one encode call.
pub struct WriteContext<'a> {
    pub writer: Writer,
    pub registry: &'a TypeRegistry,
    pub config: &'a Config,
    pub refs: RefWriter,
    pub generics: GenericStack,
    depth: usize,
}

impl<'a> WriteContext<'a> {
    pub fn new(registry: &'a TypeRegistry, config: &'a Config) -> Self {
        Self {
            writer: Writer::new(),
            registry,
            config,
            refs: RefWriter::new(),
            generics: GenericStack::default(),
            depth: 0,
        }
    }

    /// Runs `f` one nesting level deeper.
    pub fn with_depth<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.depth >= self.config.limits.max_depth {
            return Err(depth_exceeded(self.config.limits.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

impl HasGenerics for WriteContext<'_> {
    fn generics_mut(&mut self) -> &mut GenericStack {
        &mut self.generics
    }
}

/// State of one decode call.
pub struct ReadContext<'a> {
    pub reader: Bytes,
    pub registry: &'a TypeRegistry,
    pub config: &'a Config,
    pub refs: RefReader,
    pub generics: GenericStack,
    depth: usize,
}

impl<'a> ReadContext<'a> {
    pub fn new(reader: Bytes, registry: &'a TypeRegistry, config: &'a Config) -> Self {
        Self {
            reader,
            registry,
            config,
            refs: RefReader::new(),
            generics: GenericStack::default(),
            depth: 0,
        }
    }

    pub fn with_depth<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.depth >= self.config.limits.max_depth {
            return Err(depth_exceeded(self.config.limits.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Reads a collection length and checks it against the configured limit.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = crate::buffer::read_varuint(&mut self.reader)?;
        self.config.check_collection_len(len)
    }

    /// Capacity to preallocate for `len` elements; never more than the bytes left.
    pub fn capacity_hint(&self, len: usize) -> usize {
        len.min(self.reader.len())
    }
}

impl HasGenerics for ReadContext<'_> {
    fn generics_mut(&mut self) -> &mut GenericStack {
        &mut self.generics
    }
}

/// What precedes the payload in one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotMode {
    /// Reference flag: null, back-reference, or a new tracked value.
    Tracked,
    /// Null / not-null marker.
    Nullable,
    /// Nothing; the header already proved the slot is never null.
    NonNull,
}

/// Writes the flag `mode` calls for, then the payload unless the value is
/// null or a back-reference.
///
/// `payload` receives the value with any `Shared` wrapper looked through.
pub fn write_ref_or_inline<'a, F>(
    ctx: &mut WriteContext<'a>,
    value: &Value,
    mode: SlotMode,
    payload: F,
) -> Result<()>
where
    F: FnOnce(&mut WriteContext<'a>, &Value) -> Result<()>,
{
    match mode {
        SlotMode::Tracked => {
            if value.is_null() {
                ctx.writer.put_i8(NULL_FLAG);
                return Ok(());
            }
            match value {
                Value::Shared(shared) => {
                    if ctx.refs.try_write_back_reference(&mut ctx.writer, shared) {
                        return Ok(());
                    }
                    let inner = shared.borrow();
                    with_resolved(&inner, |v| payload(ctx, v))
                }
                _ => {
                    ctx.refs.write_new_value(&mut ctx.writer);
                    payload(ctx, value)
                }
            }
        }
        SlotMode::Nullable => {
            if value.is_null() {
                ctx.writer.put_i8(NULL_FLAG);
                return Ok(());
            }
            ctx.writer.put_i8(NOT_NULL_VALUE_FLAG);
            with_resolved(value, |v| payload(ctx, v))
        }
        SlotMode::NonNull => {
            if value.is_null() {
                return Err(EncoderError::Encode(
                    "Null value in a slot declared non-null".to_string(),
                ));
            }
            with_resolved(value, |v| payload(ctx, v))
        }
    }
}

/// Reads what [`write_ref_or_inline`] wrote for the same `mode`.
///
/// A new tracked value is registered under its id before `payload` runs, so
/// references inside the payload can point back at it.
pub fn read_ref_or_inline<'a, F>(
    ctx: &mut ReadContext<'a>,
    mode: SlotMode,
    payload: F,
) -> Result<Value>
where
    F: FnOnce(&mut ReadContext<'a>) -> Result<Value>,
{
    match mode {
        SlotMode::Tracked => match ctx.refs.read_ref_or_allocate(&mut ctx.reader)? {
            RefRead::Null => Ok(Value::Null),
            RefRead::Existing(shared) => Ok(Value::Shared(shared)),
            RefRead::NotNull => payload(ctx),
            RefRead::Pending(id) => {
                let placeholder = SharedRef::new(Value::Null);
                ctx.refs.register(id, placeholder.clone());
                let value = payload(ctx)?;
                placeholder.replace(value);
                Ok(Value::Shared(placeholder))
            }
        },
        SlotMode::Nullable => {
            if crate::core::read_null_flag(&mut ctx.reader)? {
                Ok(Value::Null)
            } else {
                payload(ctx)
            }
        }
        SlotMode::NonNull => payload(ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_pops_on_error() {
        let registry = TypeRegistry::new();
        let config = Config::default();
        let mut ctx = WriteContext::new(&registry, &config);
        let result: Result<()> = (|| {
            let scope = ctx.scoped_generic(Arc::new(GenericType::of(TypeId::INT)));
            assert_eq!(scope.generics.depth(), 1);
            Err(EncoderError::Encode("boom".to_string()))
        })();
        assert!(result.is_err());
        assert_eq!(ctx.generics.depth(), 0);
    }

    #[test]
    fn test_depth_limit() {
        let registry = TypeRegistry::new();
        let mut config = Config::default();
        config.limits.max_depth = 1;
        let mut ctx = ReadContext::new(Bytes::new(), &registry, &config);
        let nested = ctx.with_depth(|ctx| ctx.with_depth(|_| Ok(())));
        assert!(matches!(nested, Err(EncoderError::LimitExceeded(_))));
        assert!(ctx.with_depth(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_missing_param_is_any() {
        let frame = GenericType::list(GenericType::of(TypeId::STRING));
        assert_eq!(frame.param(0).type_id, TypeId::STRING);
        assert!(!frame.param(1).is_declared());
    }
}
