//! Dynamic value model the container codecs operate on.
//!
//! Containers hold [`Value`]s whose runtime type is only known at encode
//! time. Object identity (needed for shared and cyclic references) lives in
//! [`SharedRef`]; everything else is a plain owned value.

use crate::core::TypeId;
use bytes::Bytes;
use indexmap::{IndexMap, IndexSet};
use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A value that can appear as a container element, key, or field.
///
/// Equality, hashing and ordering look through [`Value::Shared`], so a value
/// decoded from a ref-tracked slot compares equal to an untracked original.
/// Sets and maps compare without regard to iteration order.
///
/// Comparing, hashing or ordering two *distinct* cyclic graphs does not
/// terminate; check cycles with [`SharedRef::ptr_eq`] instead.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Binary(Bytes),
    List(Vec<Value>),
    Set(IndexSet<Value>),
    Map(IndexMap<Value, Value>),
    Object(Object),
    /// Identity-bearing value; repeated occurrences are written as back-references
    /// when the inner type is ref-tracked.
    Shared(SharedRef),
}

/// Kind of a recognized built-in container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerKind {
    List,
    Set,
    Map,
}

impl ContainerKind {
    /// Type id of the plain (non-subclassed) container of this kind.
    pub fn type_id(self) -> TypeId {
        match self {
            ContainerKind::List => TypeId::LIST,
            ContainerKind::Set => TypeId::SET,
            ContainerKind::Map => TypeId::MAP,
        }
    }
}

/// Container payload inherited by an [`Object`] whose class extends a
/// recognized container.
#[derive(Clone, Debug)]
pub enum Container {
    List(Vec<Value>),
    Set(IndexSet<Value>),
    Map(IndexMap<Value, Value>),
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::List(_) => ContainerKind::List,
            Container::Set(_) => ContainerKind::Set,
            Container::Map(_) => ContainerKind::Map,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Container::List(items) => items.len(),
            Container::Set(items) => items.len(),
            Container::Map(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Container::List(a), Container::List(b)) => a == b,
            (Container::Set(a), Container::Set(b)) => a == b,
            (Container::Map(a), Container::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Container {}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Container::List(items) => items.hash(state),
            Container::Set(items) => hash_set(items, state),
            Container::Map(entries) => hash_map(entries, state),
        }
    }
}

impl PartialOrd for Container {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Container {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Container::List(a), Container::List(b)) => a.cmp(b),
            (Container::Set(a), Container::Set(b)) => cmp_set(a, b),
            (Container::Map(a), Container::Map(b)) => cmp_map(a, b),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

/// An instance of a registered class.
///
/// `fields` holds the instance fields of every level of the class chain,
/// keyed by field name. `container` is set for classes that extend a
/// recognized container.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Object {
    pub type_id: TypeId,
    pub fields: BTreeMap<String, Value>,
    pub container: Option<Container>,
}

impl Object {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            fields: BTreeMap::new(),
            container: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }
}

/// Shared, identity-bearing handle to a value.
///
/// Two handles are the same object when [`SharedRef::ptr_eq`] holds. The
/// interior `RefCell` lets a decoder register the handle before its payload
/// is read, so references inside the payload can point back at it.
#[derive(Clone)]
pub struct SharedRef(Rc<RefCell<Value>>);

impl SharedRef {
    pub fn new(value: Value) -> Self {
        SharedRef(Rc::new(RefCell::new(value)))
    }

    /// Returns true if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &SharedRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation, used as the identity key.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn borrow(&self) -> Ref<'_, Value> {
        self.0.borrow()
    }

    /// Swaps in a new inner value and returns the old one.
    pub fn replace(&self, value: Value) -> Value {
        self.0.replace(value)
    }

    /// Runs `f` with mutable access to the inner value.
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

thread_local! {
    static DEBUG_VISITING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

impl fmt::Debug for SharedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.addr();
        let cyclic = DEBUG_VISITING.with(|v| v.borrow().contains(&addr));
        if cyclic {
            return write!(f, "Shared(<cycle {:#x}>)", addr);
        }
        let Ok(inner) = self.0.try_borrow() else {
            return write!(f, "Shared(<borrowed {:#x}>)", addr);
        };
        DEBUG_VISITING.with(|v| v.borrow_mut().push(addr));
        let result = f.debug_tuple("Shared").field(&*inner).finish();
        DEBUG_VISITING.with(|v| v.borrow_mut().pop());
        result
    }
}

impl Value {
    /// Wraps a value in a fresh [`SharedRef`].
    pub fn shared(value: impl Into<Value>) -> Self {
        Value::Shared(SharedRef::new(value.into()))
    }

    /// Runtime type of the value, looking through `Shared`. `None` for null.
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(TypeId::BOOL),
            Value::Int(_) => Some(TypeId::INT),
            Value::Float(_) => Some(TypeId::FLOAT),
            Value::Str(_) => Some(TypeId::STRING),
            Value::Binary(_) => Some(TypeId::BINARY),
            Value::List(_) => Some(TypeId::LIST),
            Value::Set(_) => Some(TypeId::SET),
            Value::Map(_) => Some(TypeId::MAP),
            Value::Object(obj) => Some(obj.type_id),
            Value::Shared(shared) => shared.borrow().type_id(),
        }
    }

    /// True for `Null` and for a `Shared` wrapping null.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Shared(shared) => shared.borrow().is_null(),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&IndexSet<Value>> {
        match self {
            Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<Value, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_shared(&self) -> Option<&SharedRef> {
        match self {
            Value::Shared(shared) => Some(shared),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Str(_) => 4,
            Value::Binary(_) => 5,
            Value::List(_) => 6,
            Value::Set(_) => 7,
            Value::Map(_) => 8,
            Value::Object(_) => 9,
            Value::Shared(shared) => shared.borrow().rank(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Shared(a), Value::Shared(b)) if a.ptr_eq(b) => true,
            (Value::Shared(a), _) => *a.borrow() == *other,
            (_, Value::Shared(b)) => *self == *b.borrow(),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Value::Shared(shared) = self {
            shared.borrow().hash(state);
            return;
        }
        self.rank().hash(state);
        match self {
            Value::Null | Value::Shared(_) => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
            Value::List(items) => items.hash(state),
            Value::Set(items) => hash_set(items, state),
            Value::Map(entries) => hash_map(entries, state),
            Value::Object(obj) => obj.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Shared(a), Value::Shared(b)) if a.ptr_eq(b) => Ordering::Equal,
            (Value::Shared(a), _) => a.borrow().cmp(other),
            (_, Value::Shared(b)) => self.cmp(&b.borrow()),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => cmp_set(a, b),
            (Value::Map(a), Value::Map(b)) => cmp_map(a, b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Calls `f` with the value behind any `Shared` wrappers.
pub(crate) fn with_resolved<R>(value: &Value, f: impl FnOnce(&Value) -> R) -> R {
    match value {
        Value::Shared(shared) => {
            let inner = shared.borrow();
            with_resolved(&inner, f)
        }
        _ => f(value),
    }
}

fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

// Sets and maps compare without regard to order, so their hash must not
// depend on iteration order either.
fn hash_set<H: Hasher>(items: &IndexSet<Value>, state: &mut H) {
    items.len().hash(state);
    items
        .iter()
        .fold(0u64, |acc, item| acc.wrapping_add(hash_one(item)))
        .hash(state);
}

fn hash_map<H: Hasher>(entries: &IndexMap<Value, Value>, state: &mut H) {
    entries.len().hash(state);
    entries
        .iter()
        .fold(0u64, |acc, entry| acc.wrapping_add(hash_one(&entry)))
        .hash(state);
}

fn cmp_set(a: &IndexSet<Value>, b: &IndexSet<Value>) -> Ordering {
    let mut left: Vec<&Value> = a.iter().collect();
    let mut right: Vec<&Value> = b.iter().collect();
    left.sort();
    right.sort();
    left.cmp(&right)
}

fn cmp_map(a: &IndexMap<Value, Value>, b: &IndexMap<Value, Value>) -> Ordering {
    let mut left: Vec<(&Value, &Value)> = a.iter().collect();
    let mut right: Vec<(&Value, &Value)> = b.iter().collect();
    left.sort();
    right.sort();
    left.cmp(&right)
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<IndexSet<Value>> for Value {
    fn from(value: IndexSet<Value>) -> Self {
        Value::Set(value)
    }
}

impl From<IndexMap<Value, Value>> for Value {
    fn from(value: IndexMap<Value, Value>) -> Self {
        Value::Map(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<SharedRef> for Value {
    fn from(value: SharedRef) -> Self {
        Value::Shared(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
