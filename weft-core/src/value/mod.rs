//! Dynamic Values
//!
//! Containers hold loosely typed data: scalars, nested aggregates and
//! functions, mixed freely inside one object. [`Value`] is that data.
//!
//! # Raw vs. reactive
//!
//! Aggregates are stored raw ([`Value::Aggregate`]). Reading a member through
//! a container hands them out wrapped ([`Value::Reactive`]), which is how deep
//! reactivity stays lazy: nothing is wrapped until somebody looks at it.
//! Writing a reactive value stores the aggregate underneath, so wrapping and
//! unwrapping never changes identity.
//!
//! # Equality
//!
//! `PartialEq` is SameValue: scalars by value (NaN equals NaN), aggregates and
//! functions by identity. A container equals the raw aggregate it wraps. This
//! is the comparison used to decide whether a write is a change.

mod aggregate;
pub(crate) mod json;
mod key;

use std::fmt;
use std::rc::Rc;

pub use aggregate::{Aggregate, Class, ObjectData, Shape};
pub(crate) use aggregate::WeakAggregate;
pub(crate) use aggregate::{diff_items, Changes, Members};
pub use key::{HashKey, Key};

use indexmap::{IndexMap, IndexSet};

use crate::error::Result;
use crate::id::AggregateId;
use crate::reactive::Container;

type NativeFn = dyn Fn(&Container, &[Value]) -> Result<Value>;

/// A function stored as a member.
///
/// Functions receive the container they were read from as their receiver,
/// so member access inside the body goes through the reactive layer.
#[derive(Clone)]
pub struct Function(Rc<NativeFn>);

impl Function {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Container, &[Value]) -> Result<Value> + 'static,
    {
        Self(Rc::new(f))
    }

    /// Invoke with an explicit receiver.
    pub fn call(&self, this: &Container, args: &[Value]) -> Result<Value> {
        (self.0)(this, args)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:#x})", self.addr())
    }
}

/// A function bound to the container it was read from.
#[derive(Clone, Debug)]
pub struct Method {
    receiver: Container,
    function: Function,
}

impl Method {
    pub(crate) fn new(receiver: Container, function: Function) -> Self {
        Self { receiver, function }
    }

    /// Call the function with its bound receiver.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.function.call(&self.receiver, args)
    }

    /// The container this method is bound to.
    pub fn receiver(&self) -> &Container {
        &self.receiver
    }

    /// The unbound function.
    pub fn function(&self) -> &Function {
        &self.function
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// A raw aggregate, as stored inside another aggregate.
    Aggregate(Aggregate),
    /// An aggregate seen through its reactive container.
    Reactive(Container),
    Function(Function),
    /// A function read from a container, bound to it.
    Method(Method),
}

impl Value {
    /// Build an object from `(name, value)` pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let fields = fields
            .into_iter()
            .map(|(name, value)| (Rc::from(name.as_ref()), value.into_stored()))
            .collect();
        Value::Aggregate(Aggregate::new(Shape::Object(ObjectData {
            fields,
            class: None,
        })))
    }

    /// Build an instance of `class` with the given own fields.
    pub fn instance<K, I>(class: &Rc<Class>, fields: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let fields = fields
            .into_iter()
            .map(|(name, value)| (Rc::from(name.as_ref()), value.into_stored()))
            .collect();
        Value::Aggregate(Aggregate::new(Shape::Object(ObjectData {
            fields,
            class: Some(class.clone()),
        })))
    }

    /// Build an array.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let items = items.into_iter().map(Value::into_stored).collect();
        Value::Aggregate(Aggregate::new(Shape::Array(items)))
    }

    /// Build a set. Duplicates collapse, first occurrence wins the position.
    pub fn set<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let items: IndexSet<HashKey> = items.into_iter().map(|v| HashKey::of(&v)).collect();
        Value::Aggregate(Aggregate::new(Shape::Set(items)))
    }

    /// Build a map from `(key, value)` pairs.
    pub fn map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let entries: IndexMap<HashKey, Value> = entries
            .into_iter()
            .map(|(key, value)| (HashKey::of(&key), value.into_stored()))
            .collect();
        Value::Aggregate(Aggregate::new(Shape::Map(entries)))
    }

    /// Wrap a closure as a function value.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Container, &[Value]) -> Result<Value> + 'static,
    {
        Value::Function(Function::new(f))
    }

    /// The form a value takes when stored inside an aggregate.
    pub(crate) fn into_stored(self) -> Value {
        match self {
            Value::Reactive(container) => Value::Aggregate(container.aggregate().clone()),
            Value::Method(method) => Value::Function(method.function),
            other => other,
        }
    }

    /// The aggregate behind this value, raw or wrapped.
    pub fn as_aggregate(&self) -> Option<&Aggregate> {
        match self {
            Value::Aggregate(aggregate) => Some(aggregate),
            Value::Reactive(container) => Some(container.aggregate()),
            _ => None,
        }
    }

    /// The container, if this value was read through one.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Reactive(container) => Some(container),
            _ => None,
        }
    }

    /// Consume into a container, wrapping a raw aggregate if needed.
    pub fn into_container(self) -> Option<Container> {
        match self {
            Value::Reactive(container) => Some(container),
            Value::Aggregate(aggregate) => Some(Container::from_aggregate(aggregate)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A non-negative integral number, as an index or length.
    pub(crate) fn as_index(&self) -> Option<usize> {
        match self {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_aggregate(&self) -> bool {
        self.as_aggregate().is_some()
    }

    /// JS truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Aggregate(aggregate) => aggregate.kind(),
            Value::Reactive(container) => container.aggregate().kind(),
            Value::Function(_) | Value::Method(_) => "function",
        }
    }

    /// SameValue comparison; see the module docs.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Method(a), Value::Method(b)) => {
                a.function.ptr_eq(&b.function) && a.receiver == b.receiver
            }
            _ => match (self.as_aggregate(), other.as_aggregate()) {
                (Some(a), Some(b)) => a.id() == b.id(),
                _ => false,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Aggregate(aggregate) => aggregate.fmt(f),
            Value::Reactive(container) => container.fmt(f),
            Value::Function(function) => function.fmt(f),
            Value::Method(method) => write!(f, "Method({:?})", method.function),
        }
    }
}

/// JS-flavoured string conversion: integral numbers print without a
/// fraction and arrays join their elements with commas. An array nested in
/// itself prints as an empty string at the point of recursion.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display(f, &mut Vec::new())
    }
}

impl Value {
    fn display(&self, f: &mut fmt::Formatter<'_>, visiting: &mut Vec<AggregateId>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::Function(_) | Value::Method(_) => f.write_str("function"),
            Value::Aggregate(_) | Value::Reactive(_) => {
                let Some(aggregate) = self.as_aggregate() else {
                    return Ok(());
                };
                let shape = aggregate.shape();
                match &*shape {
                    Shape::Array(_) if visiting.contains(&aggregate.id()) => Ok(()),
                    Shape::Array(items) => {
                        visiting.push(aggregate.id());
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                f.write_str(",")?;
                            }
                            if !matches!(item, Value::Undefined | Value::Null) {
                                item.display(f, visiting)?;
                            }
                        }
                        visiting.pop();
                        Ok(())
                    }
                    Shape::Object(_) => f.write_str("[object Object]"),
                    Shape::Set(_) => f.write_str("[object Set]"),
                    Shape::Map(_) => f.write_str("[object Map]"),
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

number_from!(i32, i64, u32, u64, usize, f32);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Container> for Value {
    fn from(container: Container) -> Self {
        Value::Reactive(container)
    }
}

impl From<&Container> for Value {
    fn from(container: &Container) -> Self {
        Value::Reactive(container.clone())
    }
}

impl From<Aggregate> for Value {
    fn from(aggregate: Aggregate) -> Self {
        Value::Aggregate(aggregate)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_same_value() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(1), Value::from("1"));
    }

    #[test]
    fn aggregates_compare_by_identity() {
        let a = Value::object([("x", Value::from(1))]);
        let b = Value::object([("x", Value::from(1))]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn display_matches_js_conversions() {
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::Undefined.to_string(), "undefined");
        let list = Value::array([Value::from(1), Value::from("a"), Value::Null]);
        assert_eq!(list.to_string(), "1,a,");
    }

    #[test]
    fn display_stops_at_arrays_containing_themselves() {
        let list = crate::reactive::wrap(Value::array([Value::from(1), Value::from(2)])).unwrap();
        list.set(1usize, &list).unwrap();
        assert_eq!(Value::from(&list).to_string(), "1,");

        let outer = Value::array([Value::from("a"), Value::from(&list)]);
        assert_eq!(outer.to_string(), "a,1,");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::object(Vec::<(&str, Value)>::new()).is_truthy());
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::from(true).type_name(), "boolean");
        assert_eq!(Value::set([]).type_name(), "set");
        assert_eq!(Value::map([]).type_name(), "map");
    }
}
