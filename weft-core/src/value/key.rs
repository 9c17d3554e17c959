//! Member keys.
//!
//! A [`Key`] names one observable slot of an aggregate. Dependencies are
//! recorded per `(aggregate, key)` pair, so the granularity of a key is the
//! granularity of change notification.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::{Aggregate, Function, Value};

/// Identifies a member of a reactive container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Named field of an object.
    Field(Rc<str>),

    /// Array element.
    Index(usize),

    /// Set element or map entry.
    Entry(HashKey),

    /// Array length.
    Length,

    /// Number of set elements or map entries.
    Size,

    /// The enumerable members as a whole. Read by iteration over objects,
    /// sets and maps; notified whenever members are added or removed.
    Contents,
}

impl Key {
    /// Shorthand for a field key.
    pub fn field(name: &str) -> Self {
        Key::Field(Rc::from(name))
    }

    /// Shorthand for a set element / map entry key.
    pub fn entry(value: impl Into<Value>) -> Self {
        Key::Entry(HashKey::of(&value.into()))
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::field(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(Rc::from(name))
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{}", index),
            Key::Entry(key) => write!(f, "entry({})", key.to_value()),
            Key::Length => f.write_str("length"),
            Key::Size => f.write_str("size"),
            Key::Contents => f.write_str("[contents]"),
        }
    }
}

/// Hashable projection of a [`Value`].
///
/// Scalars hash by value, aggregates and functions by identity. The original
/// value can always be recovered with [`HashKey::to_value`], which is what
/// lets maps keep their keys in this form.
#[derive(Debug, Clone)]
pub enum HashKey {
    Undefined,
    Null,
    Bool(bool),
    /// Canonical bit pattern: `-0.0` folds into `0.0` and every NaN into one.
    Number(u64),
    Str(Rc<str>),
    Aggregate(Aggregate),
    Function(Function),
}

impl HashKey {
    /// Project a value. Reactive containers project to the aggregate they wrap.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Undefined => HashKey::Undefined,
            Value::Null => HashKey::Null,
            Value::Bool(b) => HashKey::Bool(*b),
            Value::Number(n) => HashKey::Number(canonical_bits(*n)),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Aggregate(aggregate) => HashKey::Aggregate(aggregate.clone()),
            Value::Reactive(container) => HashKey::Aggregate(container.aggregate().clone()),
            Value::Function(function) => HashKey::Function(function.clone()),
            Value::Method(method) => HashKey::Function(method.function().clone()),
        }
    }

    /// Recover the value this key was projected from.
    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Undefined => Value::Undefined,
            HashKey::Null => Value::Null,
            HashKey::Bool(b) => Value::Bool(*b),
            HashKey::Number(bits) => Value::Number(f64::from_bits(*bits)),
            HashKey::Str(s) => Value::Str(s.clone()),
            HashKey::Aggregate(aggregate) => Value::Aggregate(aggregate.clone()),
            HashKey::Function(function) => Value::Function(function.clone()),
        }
    }
}

fn canonical_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0.0f64.to_bits()
    } else {
        n.to_bits()
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HashKey::Undefined, HashKey::Undefined) | (HashKey::Null, HashKey::Null) => true,
            (HashKey::Bool(a), HashKey::Bool(b)) => a == b,
            (HashKey::Number(a), HashKey::Number(b)) => a == b,
            (HashKey::Str(a), HashKey::Str(b)) => a == b,
            (HashKey::Aggregate(a), HashKey::Aggregate(b)) => a.id() == b.id(),
            (HashKey::Function(a), HashKey::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for HashKey {}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            HashKey::Undefined | HashKey::Null => {}
            HashKey::Bool(b) => b.hash(state),
            HashKey::Number(bits) => bits.hash(state),
            HashKey::Str(s) => s.hash(state),
            HashKey::Aggregate(aggregate) => aggregate.id().hash(state),
            HashKey::Function(function) => function.addr().hash(state),
        }
    }
}
