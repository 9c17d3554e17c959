//! Reactive Containers
//!
//! A [`Container`] is the reactive view of one aggregate. Every member read
//! goes through it and is recorded against the running reactor; every write
//! goes through it and notifies the reactors that read the member.
//!
//! # Identity
//!
//! The container's identity is its aggregate's identity. [`wrap`] never
//! allocates anything observable: wrapping the same aggregate any number of
//! times yields containers that compare, hash and subscribe identically.
//!
//! # Deep reactivity
//!
//! Nested aggregates are stored raw and wrapped when read, so reactivity
//! reaches arbitrarily deep without ever walking a structure eagerly. Function
//! members come back bound to the container they were read from, which keeps
//! member access inside methods on the reactive path.

use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::trace;

use super::context::ReactiveContext;
use super::registry::Registry;
use crate::error::{Error, Result};
use crate::id::AggregateId;
use crate::value::{json, Aggregate, Changes, Key, Method, Shape, Value, WeakAggregate};

/// Who is writing: user code, or a reactor settling its own output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Public,
    Owner,
}

/// Reactive view of an aggregate.
#[derive(Clone)]
pub struct Container {
    aggregate: Aggregate,
}

/// Wrap a value in a reactive container.
///
/// Accepts raw aggregates (objects, arrays, sets, maps) and values that are
/// already reactive, which come back unchanged. Anything else fails with
/// [`Error::InvalidWrapTarget`].
pub fn wrap(value: impl Into<Value>) -> Result<Container> {
    let value = value.into();
    match value {
        Value::Reactive(container) => Ok(container),
        Value::Aggregate(aggregate) => Ok(Container::from_aggregate(aggregate)),
        other => Err(Error::InvalidWrapTarget(other.type_name())),
    }
}

impl Container {
    /// See [`wrap`].
    pub fn wrap(value: impl Into<Value>) -> Result<Self> {
        wrap(value)
    }

    pub(crate) fn from_aggregate(aggregate: Aggregate) -> Self {
        Self { aggregate }
    }

    /// The container's identity.
    pub fn id(&self) -> AggregateId {
        self.aggregate.id()
    }

    /// The wrapped aggregate.
    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// Shape name: `object`, `array`, `set` or `map`.
    pub fn kind(&self) -> &'static str {
        self.aggregate.kind()
    }

    /// A non-owning handle. Reactors that capture a weak handle do not keep
    /// the container alive, so they can be reclaimed once it is dropped.
    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(self.aggregate.downgrade())
    }

    pub(crate) fn normalize(&self, key: Key) -> Key {
        self.aggregate.shape().normalize(key)
    }

    /// Record a read of `key` against the running reactor.
    pub(crate) fn track(&self, key: Key) {
        if let Some(reactor) = ReactiveContext::current_reactor() {
            Registry::add_dependency(self.id(), key, reactor);
        }
    }

    /// Present a stored value to a reader: aggregates wrapped, functions bound.
    pub(crate) fn present(&self, value: Value) -> Value {
        match value {
            Value::Aggregate(aggregate) => Value::Reactive(Container::from_aggregate(aggregate)),
            Value::Function(function) => Value::Method(Method::new(self.clone(), function)),
            other => other,
        }
    }

    /// Read a member.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = self.normalize(key.into());
        let value = self.aggregate.shape().members().member(&key);
        self.track(key);
        self.present(value)
    }

    /// Read a member without recording a dependency.
    pub fn peek(&self, key: impl Into<Key>) -> Value {
        let key = self.normalize(key.into());
        let value = self.aggregate.shape().members().member(&key);
        self.present(value)
    }

    /// Write a member.
    ///
    /// Writing the value already stored is a no-op. Otherwise every reactor
    /// depending on the member runs before this returns, and the first error
    /// any of them raises is returned here.
    ///
    /// Fails with [`Error::UnsupportedKey`] when the shape has no slot for
    /// the key (a named field on an array, a field on a set or map), and
    /// with [`Error::InvalidArrayLength`] for a `length` that is not an
    /// integer in `0..=2^32 - 1`.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.write(key.into(), value.into(), Access::Public)
    }

    pub(crate) fn write(&self, key: Key, value: Value, access: Access) -> Result<()> {
        let key = self.normalize(key);
        self.check_writable(&key, access)?;
        let changes = self
            .aggregate
            .shape_mut()
            .members_mut()
            .store(key, value.into_stored())?;
        self.notify(changes)
    }

    /// Delete a member. Notifies only if the member existed.
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        let key = self.normalize(key.into());
        self.check_writable(&key, Access::Public)?;
        let changes = self.aggregate.shape_mut().members_mut().remove(&key);
        self.notify(changes)
    }

    /// Membership test. Counts as a read of the member.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = self.normalize(key.into());
        let present = self.aggregate.shape().members().contains(&key);
        self.track(key);
        present
    }

    /// Enumerable member keys. Counts as a read of the container's contents.
    pub fn keys(&self) -> Vec<Key> {
        let keys = self.aggregate.shape().members().member_keys();
        match self.kind() {
            "array" => self.track(Key::Length),
            _ => self.track(Key::Contents),
        }
        keys
    }

    /// Number of members: array length, set/map size, or object field count.
    pub fn len(&self) -> usize {
        let (key, len) = match &*self.aggregate.shape() {
            Shape::Object(object) => (Key::Contents, object.fields.len()),
            Shape::Array(items) => (Key::Length, items.len()),
            Shape::Set(items) => (Key::Size, items.len()),
            Shape::Map(entries) => (Key::Size, entries.len()),
        };
        self.track(key);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member values in iteration order.
    ///
    /// Iterating reads the container's enumerable members: arrays record
    /// their length and every index, objects their contents and every field,
    /// sets and maps their contents. A reactor that iterates therefore re-runs
    /// whenever membership changes.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// `(key, value)` pairs in iteration order. Array keys are indexes, object
    /// keys are field names. See [`Container::values`] for tracking.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        let (entries, reads): (Vec<(Value, Value)>, Vec<Key>) = {
            let shape = self.aggregate.shape();
            match &*shape {
                Shape::Object(object) => (
                    object
                        .fields
                        .iter()
                        .map(|(name, value)| (Value::Str(name.clone()), value.clone()))
                        .collect(),
                    std::iter::once(Key::Contents)
                        .chain(object.fields.keys().map(|name| Key::Field(name.clone())))
                        .collect(),
                ),
                Shape::Array(items) => (
                    items
                        .iter()
                        .enumerate()
                        .map(|(index, value)| (Value::from(index), value.clone()))
                        .collect(),
                    std::iter::once(Key::Length)
                        .chain((0..items.len()).map(Key::Index))
                        .collect(),
                ),
                Shape::Set(items) => (
                    items
                        .iter()
                        .map(|item| (item.to_value(), item.to_value()))
                        .collect(),
                    vec![Key::Contents],
                ),
                Shape::Map(entries) => (
                    entries
                        .iter()
                        .map(|(key, value)| (key.to_value(), value.clone()))
                        .collect(),
                    vec![Key::Contents],
                ),
            }
        };
        for key in reads {
            self.track(key);
        }
        entries
            .into_iter()
            .map(|(key, value)| (self.present(key), self.present(value)))
            .collect()
    }

    /// Iterate over member values. See [`Container::values`].
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.values().into_iter()
    }

    /// Call a function-valued member with this container as receiver.
    pub fn call(&self, name: impl Into<Key>, args: &[Value]) -> Result<Value> {
        let key = name.into();
        match self.get(key.clone()) {
            Value::Method(method) => method.call(args),
            _ => Err(Error::NotCallable(key)),
        }
    }

    /// Make the container read-only. Further writes and deletes fail with
    /// [`Error::ImmutableWrite`].
    pub fn freeze(&self) {
        self.aggregate.set_frozen(true);
    }

    /// Whether the container is read-only.
    pub fn is_frozen(&self) -> bool {
        self.aggregate.is_frozen()
    }

    pub(crate) fn check_writable(&self, key: &Key, access: Access) -> Result<()> {
        if access == Access::Public && self.aggregate.is_frozen() {
            return Err(Error::ImmutableWrite {
                container: self.id(),
                key: key.clone(),
            });
        }
        Ok(())
    }

    /// Deep, untracked copy of the contents as JSON.
    pub fn snapshot(&self) -> serde_json::Value {
        json::to_json(&Value::Aggregate(self.aggregate.clone()))
    }

    /// Number of reactors currently depending on one member.
    pub fn observer_count(&self, key: impl Into<Key>) -> usize {
        let key = self.normalize(key.into());
        Registry::observer_count(self.id(), &key)
    }

    /// Raise change notifications for `changes`.
    pub(crate) fn notify(&self, changes: Changes) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        trace!(container = %self.id(), ?changes, "members changed");
        super::propagate(self.id(), &changes)
    }

    pub(crate) fn expect_shape(&self, expected: &'static str) -> Result<()> {
        let found = self.kind();
        if found == expected {
            Ok(())
        } else {
            Err(Error::WrongShape { expected, found })
        }
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Container {}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl IntoIterator for &Container {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Non-owning container handle; see [`Container::downgrade`].
#[derive(Clone)]
pub struct WeakContainer(WeakAggregate);

impl WeakContainer {
    /// The container, if its aggregate is still alive.
    pub fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(Container::from_aggregate)
    }
}

impl fmt::Debug for WeakContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(container) => write!(f, "WeakContainer({})", container.id()),
            None => f.write_str("WeakContainer(<dropped>)"),
        }
    }
}
