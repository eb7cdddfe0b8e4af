//! Class definitions and the codecs for class instances.
//!
//! A class that extends a built-in container (directly or through other
//! registered classes) is written by the layered codec: the container
//! payload first, then one field block per class level, base level first.
//! Classes that opt out (custom serialization anywhere in the chain, or no
//! default constructor) and classes without a container base are written by
//! the general object codec instead. The choice is made once, at
//! registration.

use crate::buffer::{
    read_field_id_optimized, read_slice, read_u8, read_varuint, write_field_id_optimized, Writer,
};
use crate::collection::{read_elements, write_elements};
use crate::config::CompatibleMode;
use crate::context::{GenericType, HasGenerics, ReadContext, WriteContext};
use crate::core::{read_any, write_any, TypeId};
use crate::map::{read_map_entries, write_map_entries};
use crate::resolver::ElementCodec;
use crate::value::{Container, ContainerKind, Object, Value};
use crate::{EncoderError, Result};
use bytes::Bytes;
use crc::{Crc, CRC_64_ECMA_182};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Stable id of a class level or field, derived from its name.
///
/// `0` terminates a field block, so a zero checksum maps to `u64::MAX`.
pub fn name_id(name: &str) -> u64 {
    match CRC64.checksum(name.as_bytes()) {
        0 => u64::MAX,
        id => id,
    }
}

/// What a class extends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parent {
    #[default]
    None,
    /// Another registered class.
    Class(TypeId),
    /// A built-in container.
    Container(ContainerKind),
}

/// One level of a class hierarchy: its name, parent, and the fields it adds.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub name: String,
    pub parent: Parent,
    /// Instance fields declared by this level only.
    pub fields: Vec<String>,
    /// The class defines its own serialization hooks.
    pub custom_serialization: bool,
    /// The class can be built empty, without constructor arguments.
    pub default_constructible: bool,
    /// The class cannot be extended.
    pub final_type: bool,
    /// Declared element (or key/value) types of the inherited container.
    pub container_type: Option<GenericType>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Parent::None,
            fields: Vec::new(),
            custom_serialization: false,
            default_constructible: true,
            final_type: false,
            container_type: None,
        }
    }

    pub fn extends(mut self, parent: TypeId) -> Self {
        self.parent = Parent::Class(parent);
        self
    }

    pub fn extends_container(mut self, kind: ContainerKind) -> Self {
        self.parent = Parent::Container(kind);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn with_custom_serialization(mut self, custom: bool) -> Self {
        self.custom_serialization = custom;
        self
    }

    pub fn with_default_constructible(mut self, constructible: bool) -> Self {
        self.default_constructible = constructible;
        self
    }

    pub fn with_final(mut self, final_type: bool) -> Self {
        self.final_type = final_type;
        self
    }

    pub fn with_container_type(mut self, container_type: GenericType) -> Self {
        self.container_type = Some(container_type);
        self
    }
}

#[derive(Debug)]
struct Field {
    name: String,
    id: u64,
}

#[derive(Debug)]
struct Level {
    id: u64,
    fields: Vec<Field>,
}

impl Level {
    fn from_def(def: &ClassDef) -> Self {
        Self {
            id: name_id(&def.name),
            fields: def
                .fields
                .iter()
                .map(|name| Field {
                    name: name.clone(),
                    id: name_id(name),
                })
                .collect(),
        }
    }

    fn field(&self, id: u64) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// The built-in container a chain bottoms out in, with its declared type.
///
/// `chain` is leaf first; the most derived `container_type` wins.
fn container_base(chain: &[Arc<ClassDef>]) -> Option<(ContainerKind, Arc<GenericType>)> {
    let kind = match chain.last()?.parent {
        Parent::Container(kind) => kind,
        _ => return None,
    };
    let frame = chain
        .iter()
        .find_map(|def| def.container_type.clone())
        .unwrap_or_else(|| GenericType::of(kind.type_id()));
    Some((kind, Arc::new(frame)))
}

/// Builds the layered codec for a class chain (leaf first), or explains why
/// the class must go to the object codec.
pub(crate) fn layered_plan(type_id: TypeId, chain: &[Arc<ClassDef>]) -> std::result::Result<LayeredCodec, String> {
    let Some((kind, frame)) = container_base(chain) else {
        return Err("no built-in container base".to_string());
    };
    if let Some(def) = chain.iter().find(|def| def.custom_serialization) {
        return Err(format!("level {} defines custom serialization", def.name));
    }
    if let Some(leaf) = chain.first().filter(|leaf| !leaf.default_constructible) {
        return Err(format!("{} has no default constructor", leaf.name));
    }
    Ok(LayeredCodec {
        type_id,
        kind,
        container_frame: frame,
        levels: chain.iter().rev().map(|def| Level::from_def(def)).collect(),
    })
}

pub(crate) fn object_plan(type_id: TypeId, chain: &[Arc<ClassDef>]) -> ObjectCodec {
    let fields = chain
        .iter()
        .rev()
        .flat_map(|def| Level::from_def(def).fields)
        .collect();
    ObjectCodec {
        type_id,
        fields,
        container: container_base(chain),
    }
}

fn expect_object<'v>(value: &'v Value, type_id: TypeId) -> Result<&'v Object> {
    match value {
        Value::Object(obj) if obj.type_id == type_id => Ok(obj),
        other => Err(EncoderError::Encode(format!(
            "Expected object of type {}, got type {:?}",
            type_id,
            other.type_id()
        ))),
    }
}

/// Skips one field block: `(field_id, value)*` up to the terminator.
fn skip_field_block(ctx: &mut ReadContext<'_>) -> Result<()> {
    while read_field_id_optimized(&mut ctx.reader)? != 0 {
        read_any(ctx)?;
    }
    Ok(())
}

/// Writes one bit per field, LSB first, set when the object holds the field.
fn write_presence<'f>(
    writer: &mut Writer,
    obj: &Object,
    fields: impl Iterator<Item = &'f Field>,
) {
    let mut bits: Vec<u8> = Vec::new();
    for (index, field) in fields.enumerate() {
        if index % 8 == 0 {
            bits.push(0);
        }
        if obj.fields.contains_key(&field.name) {
            if let Some(byte) = bits.last_mut() {
                *byte |= 1 << (index % 8);
            }
        }
    }
    writer.put_slice(&bits);
}

fn read_presence(reader: &mut Bytes, count: usize) -> Result<Bytes> {
    read_slice(reader, count.div_ceil(8))
}

fn is_present(bits: &[u8], index: usize) -> bool {
    bits.get(index / 8)
        .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
}

/// Codec for a class whose chain ends in a built-in container.
///
/// Layout: `varuint(count) | elements or chunks | levels`, with the levels
/// written base first. In compatible mode the levels are prefixed by their
/// count and each level is `level_id (field_id value)* 0`; otherwise a
/// presence bitmap over all fields precedes the set fields, in declaration
/// order.
#[derive(Debug)]
pub(crate) struct LayeredCodec {
    type_id: TypeId,
    kind: ContainerKind,
    container_frame: Arc<GenericType>,
    /// Base level first.
    levels: Vec<Level>,
}

impl LayeredCodec {
    fn write_levels(&self, ctx: &mut WriteContext<'_>, obj: &Object) -> Result<()> {
        let mut scope = ctx.scoped_generic(Arc::new(GenericType::any()));
        match scope.config.compatible_mode {
            CompatibleMode::Compatible => {
                scope.writer.put_varuint(self.levels.len() as u64);
                for level in &self.levels {
                    write_field_id_optimized(&mut scope.writer, level.id);
                    for field in &level.fields {
                        if let Some(value) = obj.fields.get(&field.name) {
                            write_field_id_optimized(&mut scope.writer, field.id);
                            write_any(&mut scope, value)?;
                        }
                    }
                    write_field_id_optimized(&mut scope.writer, 0);
                }
            }
            CompatibleMode::SchemaConsistent => {
                let fields = || self.levels.iter().flat_map(|level| &level.fields);
                write_presence(&mut scope.writer, obj, fields());
                for field in fields() {
                    if let Some(value) = obj.fields.get(&field.name) {
                        write_any(&mut scope, value)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_levels(&self, ctx: &mut ReadContext<'_>, obj: &mut Object) -> Result<()> {
        let mut scope = ctx.scoped_generic(Arc::new(GenericType::any()));
        match scope.config.compatible_mode {
            CompatibleMode::Compatible => {
                let count = read_varuint(&mut scope.reader)?;
                for _ in 0..count {
                    let level_id = read_field_id_optimized(&mut scope.reader)?;
                    let Some(level) = self.levels.iter().find(|l| l.id == level_id) else {
                        skip_field_block(&mut scope)?;
                        continue;
                    };
                    loop {
                        let field_id = read_field_id_optimized(&mut scope.reader)?;
                        if field_id == 0 {
                            break;
                        }
                        let value = read_any(&mut scope)?;
                        if let Some(field) = level.field(field_id) {
                            obj.fields.insert(field.name.clone(), value);
                        }
                    }
                }
            }
            CompatibleMode::SchemaConsistent => {
                let count = self.levels.iter().map(|level| level.fields.len()).sum();
                let present = read_presence(&mut scope.reader, count)?;
                let fields = self.levels.iter().flat_map(|level| &level.fields);
                for (index, field) in fields.enumerate() {
                    if is_present(&present, index) {
                        let value = read_any(&mut scope)?;
                        obj.fields.insert(field.name.clone(), value);
                    }
                }
            }
        }
        Ok(())
    }
}

impl ElementCodec for LayeredCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        let obj = expect_object(value, self.type_id)?;
        let Some(container) = obj.container.as_ref() else {
            return Err(EncoderError::Encode(format!(
                "Object of type {} has no container, its class extends {:?}",
                self.type_id, self.kind
            )));
        };
        if container.kind() != self.kind {
            return Err(EncoderError::Encode(format!(
                "Object of type {} holds a {:?}, its class extends {:?}",
                self.type_id,
                container.kind(),
                self.kind
            )));
        }
        ctx.with_depth(|ctx| {
            {
                let mut scope = ctx.scoped_generic(self.container_frame.clone());
                scope.writer.put_varuint(container.len() as u64);
                match container {
                    Container::List(items) => write_elements(&mut scope, items)?,
                    Container::Set(items) => write_elements(&mut scope, items)?,
                    Container::Map(entries) => {
                        write_map_entries(&mut scope, entries)?;
                    }
                }
            }
            self.write_levels(ctx, obj)
        })
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        ctx.with_depth(|ctx| {
            let container = {
                let mut scope = ctx.scoped_generic(self.container_frame.clone());
                let len = scope.read_len()?;
                let capacity = scope.capacity_hint(len);
                match self.kind {
                    ContainerKind::List => {
                        let mut items: Vec<Value> = Vec::with_capacity(capacity);
                        read_elements(&mut scope, &mut items, len)?;
                        Container::List(items)
                    }
                    ContainerKind::Set => {
                        let mut items: IndexSet<Value> = IndexSet::with_capacity(capacity);
                        read_elements(&mut scope, &mut items, len)?;
                        Container::Set(items)
                    }
                    ContainerKind::Map => {
                        let mut entries: IndexMap<Value, Value> = IndexMap::with_capacity(capacity);
                        read_map_entries(&mut scope, &mut entries, len)?;
                        Container::Map(entries)
                    }
                }
            };
            let mut obj = Object::new(self.type_id).with_container(container);
            self.read_levels(ctx, &mut obj)?;
            Ok(Value::Object(obj))
        })
    }
}

const NO_CONTAINER: u8 = 0;

fn container_kind_byte(kind: ContainerKind) -> u8 {
    match kind {
        ContainerKind::List => 1,
        ContainerKind::Set => 2,
        ContainerKind::Map => 3,
    }
}

/// General codec for class instances: every field of every level, flattened
/// base first, then a container kind byte and the container, if any.
#[derive(Debug)]
pub(crate) struct ObjectCodec {
    type_id: TypeId,
    fields: Vec<Field>,
    container: Option<(ContainerKind, Arc<GenericType>)>,
}

impl ObjectCodec {
    fn container_frame(&self, kind: ContainerKind) -> Arc<GenericType> {
        match &self.container {
            Some((base, frame)) if *base == kind => frame.clone(),
            _ => Arc::new(GenericType::of(kind.type_id())),
        }
    }
}

impl ElementCodec for ObjectCodec {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()> {
        let obj = expect_object(value, self.type_id)?;
        ctx.with_depth(|ctx| {
            {
                let mut scope = ctx.scoped_generic(Arc::new(GenericType::any()));
                match scope.config.compatible_mode {
                    CompatibleMode::Compatible => {
                        for field in &self.fields {
                            if let Some(value) = obj.fields.get(&field.name) {
                                write_field_id_optimized(&mut scope.writer, field.id);
                                write_any(&mut scope, value)?;
                            }
                        }
                        write_field_id_optimized(&mut scope.writer, 0);
                    }
                    CompatibleMode::SchemaConsistent => {
                        write_presence(&mut scope.writer, obj, self.fields.iter());
                        for field in &self.fields {
                            if let Some(value) = obj.fields.get(&field.name) {
                                write_any(&mut scope, value)?;
                            }
                        }
                    }
                }
            }
            let Some(container) = &obj.container else {
                ctx.writer.put_u8(NO_CONTAINER);
                return Ok(());
            };
            ctx.writer.put_u8(container_kind_byte(container.kind()));
            let mut scope = ctx.scoped_generic(self.container_frame(container.kind()));
            scope.writer.put_varuint(container.len() as u64);
            match container {
                Container::List(items) => write_elements(&mut scope, items),
                Container::Set(items) => write_elements(&mut scope, items),
                Container::Map(entries) => write_map_entries(&mut scope, entries).map(|_| ()),
            }
        })
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        ctx.with_depth(|ctx| {
            let mut obj = Object::new(self.type_id);
            {
                let mut scope = ctx.scoped_generic(Arc::new(GenericType::any()));
                match scope.config.compatible_mode {
                    CompatibleMode::Compatible => loop {
                        let field_id = read_field_id_optimized(&mut scope.reader)?;
                        if field_id == 0 {
                            break;
                        }
                        let value = read_any(&mut scope)?;
                        if let Some(field) = self.fields.iter().find(|f| f.id == field_id) {
                            obj.fields.insert(field.name.clone(), value);
                        }
                    },
                    CompatibleMode::SchemaConsistent => {
                        let present = read_presence(&mut scope.reader, self.fields.len())?;
                        for (index, field) in self.fields.iter().enumerate() {
                            if is_present(&present, index) {
                                let value = read_any(&mut scope)?;
                                obj.fields.insert(field.name.clone(), value);
                            }
                        }
                    }
                }
            }
            let kind = match read_u8(&mut ctx.reader)? {
                NO_CONTAINER => return Ok(Value::Object(obj)),
                1 => ContainerKind::List,
                2 => ContainerKind::Set,
                3 => ContainerKind::Map,
                other => {
                    return Err(EncoderError::Decode(format!(
                        "Invalid container kind byte {}",
                        other
                    )))
                }
            };
            let mut scope = ctx.scoped_generic(self.container_frame(kind));
            let len = scope.read_len()?;
            let capacity = scope.capacity_hint(len);
            let container = match kind {
                ContainerKind::List => {
                    let mut items: Vec<Value> = Vec::with_capacity(capacity);
                    read_elements(&mut scope, &mut items, len)?;
                    Container::List(items)
                }
                ContainerKind::Set => {
                    let mut items: IndexSet<Value> = IndexSet::with_capacity(capacity);
                    read_elements(&mut scope, &mut items, len)?;
                    Container::Set(items)
                }
                ContainerKind::Map => {
                    let mut entries: IndexMap<Value, Value> = IndexMap::with_capacity(capacity);
                    read_map_entries(&mut scope, &mut entries, len)?;
                    Container::Map(entries)
                }
            };
            obj.container = Some(container);
            Ok(Value::Object(obj))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(defs: Vec<ClassDef>) -> Vec<Arc<ClassDef>> {
        defs.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_levels_are_base_first() {
        let defs = chain(vec![
            ClassDef::new("Leaf").with_field("c"),
            ClassDef::new("Mid").with_field("b"),
            ClassDef::new("Base")
                .with_field("a")
                .extends_container(ContainerKind::List),
        ]);
        let plan = layered_plan(TypeId(70), &defs).unwrap();
        let names: Vec<&str> = plan
            .levels
            .iter()
            .flat_map(|l| l.fields.iter().map(|f| f.name.as_str()))
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(plan.levels[0].id, name_id("Base"));
    }

    #[test]
    fn test_custom_serialization_refused() {
        let defs = chain(vec![
            ClassDef::new("Leaf"),
            ClassDef::new("Base")
                .with_custom_serialization(true)
                .extends_container(ContainerKind::Map),
        ]);
        assert!(layered_plan(TypeId(70), &defs).is_err());
        let fallback = object_plan(TypeId(70), &defs);
        assert_eq!(fallback.container.map(|(kind, _)| kind), Some(ContainerKind::Map));
    }

    #[test]
    fn test_not_default_constructible_refused() {
        let defs = chain(vec![ClassDef::new("Sorted")
            .with_default_constructible(false)
            .extends_container(ContainerKind::Set)]);
        assert!(layered_plan(TypeId(70), &defs).is_err());
    }

    #[test]
    fn test_name_id_never_zero() {
        assert_ne!(name_id(""), 0);
        assert_eq!(name_id("a"), name_id("a"));
        assert_ne!(name_id("a"), name_id("b"));
    }
}
