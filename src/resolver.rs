//! Type registry and reference resolvers.
//!
//! The registry maps wire type tags to [`ElementCodec`]s and answers the
//! per-type questions the container codecs ask: which codec handles a type,
//! and whether values of that type carry reference flags. The reference
//! resolvers assign ids to ref-tracked values so repeated instances are
//! written once.

use crate::buffer::{read_i8, read_varuint, Writer};
use crate::config::Config;
use crate::context::{ReadContext, WriteContext};
use crate::core::{
    BinaryCodec, BoolCodec, FloatCodec, IntCodec, ListCodec, MapCodec, SetCodec, StringCodec,
    TypeId, NOT_NULL_VALUE_FLAG, NULL_FLAG, REF_FLAG, REF_VALUE_FLAG,
};
use crate::layered::{self, ClassDef, Parent};
use crate::value::{SharedRef, Value};
use crate::{EncoderError, RefDecodeError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Writes and reads the payload of one runtime type.
///
/// The payload excludes the null/ref flag and the type tag; those are owned
/// by the caller, which decides per slot whether they are needed.
pub trait ElementCodec: Send + Sync {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<()>;
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value>;
}

/// Coarse category of a registered type, used for ref-tracking decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// bool, integer, float.
    Basic,
    /// string, binary.
    String,
    Container,
    Class,
}

struct Registration {
    name: String,
    kind: TypeKind,
    codec: Arc<dyn ElementCodec>,
    class: Option<Arc<ClassDef>>,
}

/// Registry of every type that may appear on the wire.
///
/// Built once, then shared read-only by any number of encode and decode calls.
pub struct TypeRegistry {
    types: HashMap<TypeId, Registration>,
    next_id: u32,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding the built-in types.
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
            next_id: TypeId::FIRST_USER.0,
        };
        let builtins: [(TypeId, &str, TypeKind, Arc<dyn ElementCodec>); 8] = [
            (TypeId::BOOL, "bool", TypeKind::Basic, Arc::new(BoolCodec)),
            (TypeId::INT, "int", TypeKind::Basic, Arc::new(IntCodec)),
            (TypeId::FLOAT, "float", TypeKind::Basic, Arc::new(FloatCodec)),
            (TypeId::STRING, "string", TypeKind::String, Arc::new(StringCodec)),
            (TypeId::BINARY, "binary", TypeKind::String, Arc::new(BinaryCodec)),
            (TypeId::LIST, "list", TypeKind::Container, Arc::new(ListCodec)),
            (TypeId::SET, "set", TypeKind::Container, Arc::new(SetCodec)),
            (TypeId::MAP, "map", TypeKind::Container, Arc::new(MapCodec)),
        ];
        for (type_id, name, kind, codec) in builtins {
            registry.types.insert(
                type_id,
                Registration {
                    name: name.to_string(),
                    kind,
                    codec,
                    class: None,
                },
            );
        }
        registry
    }

    /// Codec for `type_id`.
    ///
    /// # Errors
    /// `UnknownType` if nothing is registered under the id.
    pub fn resolve(&self, type_id: TypeId) -> Result<&dyn ElementCodec> {
        self.get(type_id)
            .ok_or(EncoderError::UnknownType(u64::from(type_id.0)))
    }

    pub fn get(&self, type_id: TypeId) -> Option<&dyn ElementCodec> {
        self.types.get(&type_id).map(|r| r.codec.as_ref())
    }

    pub fn kind(&self, type_id: TypeId) -> Option<TypeKind> {
        self.types.get(&type_id).map(|r| r.kind)
    }

    pub fn name(&self, type_id: TypeId) -> Option<&str> {
        self.types.get(&type_id).map(|r| r.name.as_str())
    }

    pub fn class(&self, type_id: TypeId) -> Option<&Arc<ClassDef>> {
        self.types.get(&type_id).and_then(|r| r.class.as_ref())
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    pub fn write_type_tag(&self, writer: &mut Writer, type_id: TypeId) {
        writer.put_varuint(type_id.0 as u64);
    }

    /// Reads a type tag and checks that it resolves locally.
    pub fn read_type_tag(&self, reader: &mut Bytes) -> Result<TypeId> {
        let raw = read_varuint(reader)?;
        let type_id = u32::try_from(raw)
            .map(TypeId)
            .map_err(|_| EncoderError::UnknownType(raw))?;
        if !self.contains(type_id) {
            return Err(EncoderError::UnknownType(raw));
        }
        Ok(type_id)
    }

    /// Whether values of `type_id` carry reference flags under `config`.
    ///
    /// Unregistered ids (including the declared "any") are treated as
    /// polymorphic and follow the global switch.
    pub fn tracks_refs(&self, type_id: TypeId, config: &Config) -> bool {
        if !config.ref_tracking {
            return false;
        }
        match self.kind(type_id) {
            Some(TypeKind::Basic) => !config.basic_types_ref_ignored,
            Some(TypeKind::String) => !config.string_ref_ignored,
            Some(TypeKind::Container) | Some(TypeKind::Class) | None => true,
        }
    }

    /// Plugs a custom codec in under the next free id.
    pub fn register_codec(
        &mut self,
        name: impl Into<String>,
        kind: TypeKind,
        codec: Arc<dyn ElementCodec>,
    ) -> Result<TypeId> {
        let type_id = self.allocate_id();
        self.insert(type_id, name.into(), kind, codec, None)?;
        Ok(type_id)
    }

    /// Registers a class under the next free id.
    pub fn register_class(&mut self, class: ClassDef) -> Result<TypeId> {
        let type_id = self.allocate_id();
        self.register_class_as(type_id, class)?;
        Ok(type_id)
    }

    /// Registers a class under an explicit id.
    ///
    /// Picks the codec now: classes extending a built-in container get the
    /// layered codec unless some level opts out, everything else gets the
    /// general object codec.
    pub fn register_class_as(&mut self, type_id: TypeId, class: ClassDef) -> Result<()> {
        if type_id.is_builtin() {
            return Err(EncoderError::Registration(format!(
                "Type id {} is reserved for built-in types",
                type_id
            )));
        }
        if let Parent::Class(parent) = class.parent {
            match self.class(parent) {
                None => {
                    return Err(EncoderError::Registration(format!(
                        "Parent {} of class {} is not a registered class",
                        parent, class.name
                    )))
                }
                Some(def) if def.final_type => {
                    return Err(EncoderError::Registration(format!(
                        "Class {} cannot extend final class {}",
                        class.name, def.name
                    )))
                }
                Some(_) => {}
            }
        }
        let class = Arc::new(class);
        let chain = self.class_chain(&class);
        let codec: Arc<dyn ElementCodec> = match layered::layered_plan(type_id, &chain) {
            Ok(plan) => Arc::new(plan),
            Err(reason) => {
                debug!(class = %class.name, %reason, "falling back to object codec");
                Arc::new(layered::object_plan(type_id, &chain))
            }
        };
        let name = class.name.clone();
        self.insert(type_id, name, TypeKind::Class, codec, Some(class))?;
        if type_id.0 >= self.next_id {
            self.next_id = type_id.0 + 1;
        }
        Ok(())
    }

    /// The class and its registered ancestors, leaf first.
    fn class_chain(&self, class: &Arc<ClassDef>) -> Vec<Arc<ClassDef>> {
        let mut chain = vec![class.clone()];
        let mut parent = class.parent;
        while let Parent::Class(id) = parent {
            match self.class(id) {
                Some(def) => {
                    chain.push(def.clone());
                    parent = def.parent;
                }
                None => break,
            }
        }
        chain
    }

    fn allocate_id(&mut self) -> TypeId {
        while self.types.contains_key(&TypeId(self.next_id)) {
            self.next_id += 1;
        }
        let id = TypeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(
        &mut self,
        type_id: TypeId,
        name: String,
        kind: TypeKind,
        codec: Arc<dyn ElementCodec>,
        class: Option<Arc<ClassDef>>,
    ) -> Result<()> {
        if self.types.contains_key(&type_id) {
            return Err(EncoderError::Registration(format!(
                "Type id {} is already registered",
                type_id
            )));
        }
        self.types.insert(
            type_id,
            Registration {
                name,
                kind,
                codec,
                class,
            },
        );
        Ok(())
    }
}

/// Write side of reference tracking for one encode call.
#[derive(Debug, Default)]
pub struct RefWriter {
    ids: HashMap<usize, u32>,
    next_id: u32,
}

impl RefWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a back-reference if `shared` was seen before and returns true.
    /// Otherwise assigns it the next id, writes [`REF_VALUE_FLAG`] and returns
    /// false; the caller must then write the payload.
    pub fn try_write_back_reference(&mut self, writer: &mut Writer, shared: &SharedRef) -> bool {
        if let Some(&id) = self.ids.get(&shared.addr()) {
            writer.put_i8(REF_FLAG);
            writer.put_varuint(id as u64);
            return true;
        }
        let id = self.allocate();
        self.ids.insert(shared.addr(), id);
        writer.put_i8(REF_VALUE_FLAG);
        false
    }

    /// Marks a tracked value without identity; it still consumes an id so the
    /// reader's numbering stays in step.
    pub fn write_new_value(&mut self, writer: &mut Writer) {
        self.allocate();
        writer.put_i8(REF_VALUE_FLAG);
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Outcome of reading a reference flag.
#[derive(Debug)]
pub enum RefRead {
    Null,
    /// Back-reference to a value read earlier.
    Existing(SharedRef),
    /// New tracked value; register it under this id before reading its payload.
    Pending(u32),
    /// Untracked non-null value.
    NotNull,
}

/// Read side of reference tracking for one decode call.
#[derive(Debug, Default)]
pub struct RefReader {
    objects: Vec<Option<SharedRef>>,
}

impl RefReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_ref_or_allocate(&mut self, reader: &mut Bytes) -> Result<RefRead> {
        match read_i8(reader)? {
            NULL_FLAG => Ok(RefRead::Null),
            NOT_NULL_VALUE_FLAG => Ok(RefRead::NotNull),
            REF_VALUE_FLAG => {
                let id = self.objects.len() as u32;
                self.objects.push(None);
                Ok(RefRead::Pending(id))
            }
            REF_FLAG => {
                let raw = read_varuint(reader)?;
                let found = usize::try_from(raw)
                    .ok()
                    .and_then(|idx| self.objects.get(idx))
                    .and_then(|slot| slot.clone());
                match found {
                    Some(shared) => Ok(RefRead::Existing(shared)),
                    None => Err(RefDecodeError::UnknownReference { id: raw }.into()),
                }
            }
            flag => Err(RefDecodeError::UnexpectedFlag { flag }.into()),
        }
    }

    pub fn register(&mut self, id: u32, shared: SharedRef) {
        if let Some(slot) = self.objects.get_mut(id as usize) {
            *slot = Some(shared);
        }
    }
}
