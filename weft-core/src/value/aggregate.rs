//! Aggregates
//!
//! An aggregate is the mutable value a reactive container wraps: an object,
//! an array, a set or a map. Aggregates are shared (`Rc`) and carry their own
//! [`AggregateId`], which doubles as the identity of the container wrapping
//! them. Wrapping the same aggregate twice therefore always yields the same
//! container.
//!
//! # Member protocol
//!
//! Each shape implements [`Members`]: plain, untracked get/set/delete/has/keys.
//! Mutating calls report the keys whose observable value actually changed, so
//! the container layer can raise exactly those notifications and nothing more.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use smallvec::{smallvec, SmallVec};

use super::{Function, HashKey, Key, Value};
use crate::error::{Error, Result};
use crate::id::AggregateId;
use crate::reactive::registry;

/// Keys changed by a single mutation.
pub(crate) type Changes = SmallVec<[Key; 4]>;

/// Largest array index, as in JS: lengths stop at 2^32 - 1.
pub(crate) const MAX_ARRAY_INDEX: usize = u32::MAX as usize - 1;

/// Largest array length.
pub(crate) const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// A named method table. Objects carrying a class behave as instances of it.
pub struct Class {
    name: Rc<str>,
    methods: IndexMap<Rc<str>, Function>,
}

impl Class {
    /// Start a class with no methods.
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            methods: IndexMap::new(),
        }
    }

    /// Add a method. The receiver passed to `f` is the reactive container of
    /// the instance, so every member access inside the method is tracked.
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&crate::Container, &[Value]) -> crate::Result<Value> + 'static,
    {
        self.methods.insert(Rc::from(name), Function::new(f));
        self
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, name: &str) -> Option<&Function> {
        self.methods.get(name)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fields of an object, in insertion order.
#[derive(Default)]
pub struct ObjectData {
    pub(crate) fields: IndexMap<Rc<str>, Value>,
    pub(crate) class: Option<Rc<Class>>,
}

/// The four aggregate shapes.
pub enum Shape {
    Object(ObjectData),
    Array(Vec<Value>),
    Set(IndexSet<HashKey>),
    Map(IndexMap<HashKey, Value>),
}

impl Shape {
    /// Human readable shape name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Object(_) => "object",
            Shape::Array(_) => "array",
            Shape::Set(_) => "set",
            Shape::Map(_) => "map",
        }
    }

    pub(crate) fn members(&self) -> &dyn Members {
        match self {
            Shape::Object(object) => object,
            Shape::Array(items) => items,
            Shape::Set(items) => items,
            Shape::Map(entries) => entries,
        }
    }

    pub(crate) fn members_mut(&mut self) -> &mut dyn Members {
        match self {
            Shape::Object(object) => object,
            Shape::Array(items) => items,
            Shape::Set(items) => items,
            Shape::Map(entries) => entries,
        }
    }

    /// Map a key onto the form this shape stores it under, the way JS
    /// coerces property keys: `"length"` on an array is the length slot,
    /// `3` on an object is the field `"3"`, and so on.
    pub(crate) fn normalize(&self, key: Key) -> Key {
        match (self, key) {
            (Shape::Object(_), Key::Index(index)) => Key::Field(Rc::from(index.to_string())),
            (Shape::Object(_), Key::Length) => Key::field("length"),
            (Shape::Object(_), Key::Size) => Key::field("size"),
            (Shape::Object(_), Key::Entry(HashKey::Str(name))) => Key::Field(name),
            (Shape::Object(_), Key::Entry(other)) => {
                Key::Field(Rc::from(other.to_value().to_string()))
            }
            (Shape::Array(_), Key::Field(name)) => {
                if &*name == "length" {
                    Key::Length
                } else if let Some(index) = name
                    .parse::<usize>()
                    .ok()
                    .filter(|index| *index <= MAX_ARRAY_INDEX)
                {
                    Key::Index(index)
                } else {
                    Key::Field(name)
                }
            }
            (Shape::Set(_) | Shape::Map(_), Key::Field(name)) if &*name == "size" => Key::Size,
            (Shape::Set(_) | Shape::Map(_), Key::Index(index)) => {
                Key::Entry(HashKey::of(&Value::Number(index as f64)))
            }
            (_, key) => key,
        }
    }
}

/// Untracked member access, implemented once per shape.
pub(crate) trait Members {
    /// Current value of a member; `Undefined` when absent.
    fn member(&self, key: &Key) -> Value;

    /// Whether the member exists.
    fn contains(&self, key: &Key) -> bool;

    /// Store a value, returning the keys whose value changed. Fails when the
    /// shape has no slot for `key`.
    fn store(&mut self, key: Key, value: Value) -> Result<Changes>;

    /// Delete a member, returning the keys whose value changed.
    fn remove(&mut self, key: &Key) -> Changes;

    /// The enumerable members, in iteration order.
    fn member_keys(&self) -> Vec<Key>;
}

impl Members for ObjectData {
    fn member(&self, key: &Key) -> Value {
        let Key::Field(name) = key else {
            return Value::Undefined;
        };
        if let Some(value) = self.fields.get(name) {
            return value.clone();
        }
        self.class
            .as_ref()
            .and_then(|class| class.lookup(name))
            .map(|function| Value::Function(function.clone()))
            .unwrap_or_default()
    }

    fn contains(&self, key: &Key) -> bool {
        match key {
            Key::Field(name) => {
                self.fields.contains_key(name)
                    || self.class.as_ref().is_some_and(|class| class.lookup(name).is_some())
            }
            _ => false,
        }
    }

    fn store(&mut self, key: Key, value: Value) -> Result<Changes> {
        let Key::Field(name) = key else {
            return Err(unsupported("object", key));
        };
        Ok(match self.fields.get_mut(&name) {
            Some(current) if current.same_value(&value) => Changes::new(),
            Some(current) => {
                *current = value;
                smallvec![Key::Field(name)]
            }
            None => {
                self.fields.insert(name.clone(), value);
                smallvec![Key::Field(name), Key::Contents]
            }
        })
    }

    fn remove(&mut self, key: &Key) -> Changes {
        match key {
            Key::Field(name) if self.fields.shift_remove(name).is_some() => {
                smallvec![key.clone(), Key::Contents]
            }
            _ => Changes::new(),
        }
    }

    fn member_keys(&self) -> Vec<Key> {
        self.fields.keys().map(|name| Key::Field(name.clone())).collect()
    }
}

impl Members for Vec<Value> {
    fn member(&self, key: &Key) -> Value {
        match key {
            Key::Index(index) => self.get(*index).cloned().unwrap_or_default(),
            Key::Length => Value::Number(self.len() as f64),
            _ => Value::Undefined,
        }
    }

    fn contains(&self, key: &Key) -> bool {
        match key {
            Key::Index(index) => *index < self.len(),
            Key::Length => true,
            _ => false,
        }
    }

    fn store(&mut self, key: Key, value: Value) -> Result<Changes> {
        match key {
            Key::Index(index) if index < self.len() => {
                if self[index].same_value(&value) {
                    return Ok(Changes::new());
                }
                self[index] = value;
                Ok(smallvec![Key::Index(index)])
            }
            Key::Index(index) if index <= MAX_ARRAY_INDEX => {
                grow(self, index + 1)?;
                let mut changes = Changes::new();
                if !value.is_undefined() {
                    changes.push(Key::Index(index));
                }
                self.resize(index + 1, Value::Undefined);
                self[index] = value;
                changes.push(Key::Length);
                Ok(changes)
            }
            Key::Length => {
                let new_len = value
                    .as_index()
                    .filter(|len| *len <= MAX_ARRAY_LENGTH)
                    .ok_or_else(|| Error::InvalidArrayLength(value.to_string()))?;
                if new_len > self.len() {
                    grow(self, new_len)?;
                }
                let before = self.clone();
                self.resize(new_len, Value::Undefined);
                Ok(diff_items(&before, self))
            }
            key => Err(unsupported("array", key)),
        }
    }

    fn remove(&mut self, key: &Key) -> Changes {
        match key {
            Key::Index(index) if *index < self.len() && !self[*index].is_undefined() => {
                self[*index] = Value::Undefined;
                smallvec![key.clone()]
            }
            _ => Changes::new(),
        }
    }

    fn member_keys(&self) -> Vec<Key> {
        (0..self.len()).map(Key::Index).collect()
    }
}

impl Members for IndexSet<HashKey> {
    fn member(&self, key: &Key) -> Value {
        match key {
            Key::Entry(entry) if self.contains(entry) => entry.to_value(),
            Key::Size => Value::Number(self.len() as f64),
            _ => Value::Undefined,
        }
    }

    fn contains(&self, key: &Key) -> bool {
        match key {
            Key::Entry(entry) => IndexSet::contains(self, entry),
            Key::Size => true,
            _ => false,
        }
    }

    fn store(&mut self, key: Key, _value: Value) -> Result<Changes> {
        match key {
            Key::Entry(entry) if self.insert(entry.clone()) => {
                Ok(smallvec![Key::Entry(entry), Key::Size, Key::Contents])
            }
            Key::Entry(_) => Ok(Changes::new()),
            key => Err(unsupported("set", key)),
        }
    }

    fn remove(&mut self, key: &Key) -> Changes {
        match key {
            Key::Entry(entry) if self.shift_remove(entry) => {
                smallvec![key.clone(), Key::Size, Key::Contents]
            }
            _ => Changes::new(),
        }
    }

    fn member_keys(&self) -> Vec<Key> {
        self.iter().cloned().map(Key::Entry).collect()
    }
}

impl Members for IndexMap<HashKey, Value> {
    fn member(&self, key: &Key) -> Value {
        match key {
            Key::Entry(entry) => self.get(entry).cloned().unwrap_or_default(),
            Key::Size => Value::Number(self.len() as f64),
            _ => Value::Undefined,
        }
    }

    fn contains(&self, key: &Key) -> bool {
        match key {
            Key::Entry(entry) => self.contains_key(entry),
            Key::Size => true,
            _ => false,
        }
    }

    fn store(&mut self, key: Key, value: Value) -> Result<Changes> {
        let Key::Entry(entry) = key else {
            return Err(unsupported("map", key));
        };
        Ok(match self.get_mut(&entry) {
            Some(current) if current.same_value(&value) => Changes::new(),
            Some(current) => {
                *current = value;
                smallvec![Key::Entry(entry), Key::Contents]
            }
            None => {
                self.insert(entry.clone(), value);
                smallvec![Key::Entry(entry), Key::Size, Key::Contents]
            }
        })
    }

    fn remove(&mut self, key: &Key) -> Changes {
        match key {
            Key::Entry(entry) if self.shift_remove(entry).is_some() => {
                smallvec![key.clone(), Key::Size, Key::Contents]
            }
            _ => Changes::new(),
        }
    }

    fn member_keys(&self) -> Vec<Key> {
        self.keys().cloned().map(Key::Entry).collect()
    }
}

fn unsupported(kind: &'static str, key: Key) -> Error {
    Error::UnsupportedKey { kind, key }
}

/// Reserve room for `len` items, failing instead of aborting when the
/// allocation cannot be made.
fn grow(items: &mut Vec<Value>, len: usize) -> Result<()> {
    items
        .try_reserve(len.saturating_sub(items.len()))
        .map_err(|_| Error::InvalidArrayLength(len.to_string()))
}

/// Per-index diff of two array states, plus `Length` when it moved.
pub(crate) fn diff_items(before: &[Value], after: &[Value]) -> Changes {
    let mut changes = Changes::new();
    let undefined = Value::Undefined;
    for index in 0..before.len().max(after.len()) {
        let old = before.get(index).unwrap_or(&undefined);
        let new = after.get(index).unwrap_or(&undefined);
        if !old.same_value(new) {
            changes.push(Key::Index(index));
        }
    }
    if before.len() != after.len() {
        changes.push(Key::Length);
    }
    changes
}

/// Shared handle to one underlying aggregate.
#[derive(Clone)]
pub struct Aggregate(Rc<AggregateCell>);

struct AggregateCell {
    id: AggregateId,
    frozen: Cell<bool>,
    shape: RefCell<Shape>,
}

impl Aggregate {
    /// Allocate a new aggregate with a fresh identity.
    pub fn new(shape: Shape) -> Self {
        Self(Rc::new(AggregateCell {
            id: AggregateId::new(),
            frozen: Cell::new(false),
            shape: RefCell::new(shape),
        }))
    }

    /// The aggregate's identity.
    pub fn id(&self) -> AggregateId {
        self.0.id
    }

    /// Shape name: `object`, `array`, `set` or `map`.
    pub fn kind(&self) -> &'static str {
        self.0.shape.borrow().name()
    }

    pub(crate) fn shape(&self) -> Ref<'_, Shape> {
        self.0.shape.borrow()
    }

    pub(crate) fn shape_mut(&self) -> RefMut<'_, Shape> {
        self.0.shape.borrow_mut()
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        self.0.frozen.set(frozen);
    }

    /// Whether both handles point at the same aggregate.
    pub fn ptr_eq(&self, other: &Aggregate) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakAggregate {
        WeakAggregate(Rc::downgrade(&self.0))
    }
}

/// Non-owning aggregate handle.
#[derive(Clone)]
pub(crate) struct WeakAggregate(Weak<AggregateCell>);

impl WeakAggregate {
    pub(crate) fn upgrade(&self) -> Option<Aggregate> {
        self.0.upgrade().map(Aggregate)
    }
}

impl Drop for AggregateCell {
    fn drop(&mut self) {
        registry::forget_aggregate(self.id);
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.0.shape.try_borrow().map(|s| s.name()).unwrap_or("?");
        f.debug_struct("Aggregate")
            .field("id", &self.0.id)
            .field("kind", &kind)
            .field("frozen", &self.0.frozen.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_store_reports_new_fields_as_shape_changes() {
        let mut object = ObjectData::default();
        let changes = object.store(Key::from("a"), Value::from(1)).unwrap();
        assert_eq!(changes.as_slice(), &[Key::from("a"), Key::Contents]);

        let changes = object.store(Key::from("a"), Value::from(2)).unwrap();
        assert_eq!(changes.as_slice(), &[Key::from("a")]);

        // same value is not a change
        assert!(object.store(Key::from("a"), Value::from(2)).unwrap().is_empty());
    }

    #[test]
    fn object_remove_only_reports_existing_fields() {
        let mut object = ObjectData::default();
        assert!(object.remove(&Key::from("missing")).is_empty());

        object.store(Key::from("a"), Value::Undefined).unwrap();
        let changes = object.remove(&Key::from("a"));
        assert_eq!(changes.as_slice(), &[Key::from("a"), Key::Contents]);
    }

    #[test]
    fn array_store_past_end_grows() {
        let mut items: Vec<Value> = vec![Value::from(1)];
        let changes = items.store(Key::Index(3), Value::from(4)).unwrap();
        assert_eq!(changes.as_slice(), &[Key::Index(3), Key::Length]);
        assert_eq!(items.len(), 4);
        assert!(items[2].is_undefined());
    }

    #[test]
    fn array_length_truncates() {
        let mut items: Vec<Value> = vec![Value::from(1), Value::from(2), Value::from(3)];
        let changes = items.store(Key::Length, Value::from(1)).unwrap();
        assert_eq!(
            changes.as_slice(),
            &[Key::Index(1), Key::Index(2), Key::Length]
        );
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn set_insert_is_idempotent() {
        let mut items: IndexSet<HashKey> = IndexSet::new();
        assert_eq!(items.store(Key::entry(1), Value::Undefined).unwrap().len(), 3);
        assert!(items.store(Key::entry(1), Value::Undefined).unwrap().is_empty());
        assert_eq!(items.member(&Key::Size), Value::from(1));
    }

    #[test]
    fn map_overwrite_keeps_size() {
        let mut entries: IndexMap<HashKey, Value> = IndexMap::new();
        entries.store(Key::entry("a"), Value::from(1)).unwrap();
        let changes = entries.store(Key::entry("a"), Value::from(2)).unwrap();
        assert_eq!(changes.as_slice(), &[Key::entry("a"), Key::Contents]);
    }

    #[test]
    fn diff_reports_moved_elements() {
        let before = vec![Value::from(1), Value::from(2), Value::from(1)];
        let after = vec![Value::from(1), Value::from(2), Value::from(1)].into_iter().rev().collect::<Vec<_>>();
        // palindrome: nothing moved
        assert!(diff_items(&before, &after).is_empty());

        let after = vec![Value::from(2), Value::from(1)];
        assert_eq!(
            diff_items(&before, &after).as_slice(),
            &[Key::Index(0), Key::Index(1), Key::Index(2), Key::Length]
        );
    }

    #[test]
    fn normalize_coerces_keys() {
        let array = Shape::Array(Vec::new());
        assert_eq!(array.normalize(Key::from("length")), Key::Length);
        assert_eq!(array.normalize(Key::from("2")), Key::Index(2));

        let object = Shape::Object(ObjectData::default());
        assert_eq!(object.normalize(Key::Index(2)), Key::from("2"));

        let set = Shape::Set(IndexSet::new());
        assert_eq!(set.normalize(Key::from("size")), Key::Size);
    }

    #[test]
    fn oversized_numeric_names_stay_fields() {
        let array = Shape::Array(Vec::new());
        assert_eq!(array.normalize(Key::from("4294967294")), Key::Index(MAX_ARRAY_INDEX));
        assert_eq!(array.normalize(Key::from("4294967295")), Key::from("4294967295"));
        assert_eq!(
            array.normalize(Key::from("18446744073709551615")),
            Key::from("18446744073709551615")
        );
    }

    #[test]
    fn array_indexes_and_lengths_are_bounded() {
        let mut items: Vec<Value> = vec![Value::from(1)];

        let err = items.store(Key::Index(usize::MAX), Value::from(1)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKey { kind: "array", .. }));

        let err = items.store(Key::Length, Value::from(1e12)).unwrap_err();
        assert_eq!(err, Error::InvalidArrayLength("1000000000000".into()));

        for bad in [Value::from(-1), Value::from(1.5), Value::from("two")] {
            assert!(matches!(
                items.store(Key::Length, bad),
                Err(Error::InvalidArrayLength(_))
            ));
        }
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn shapes_reject_keys_they_cannot_hold() {
        let mut items: Vec<Value> = Vec::new();
        assert!(items.store(Key::from("foo"), Value::from(1)).is_err());
        assert!(items.store(Key::Size, Value::from(1)).is_err());

        let mut set: IndexSet<HashKey> = IndexSet::new();
        assert!(set.store(Key::from("foo"), Value::from(2)).is_err());
        assert!(set.store(Key::Size, Value::from(2)).is_err());

        let mut map: IndexMap<HashKey, Value> = IndexMap::new();
        assert!(map.store(Key::Size, Value::from(2)).is_err());

        let mut object = ObjectData::default();
        assert!(object.store(Key::Contents, Value::from(2)).is_err());
        assert!(set.is_empty() && map.is_empty() && object.fields.is_empty());
    }
}
