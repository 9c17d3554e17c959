//! Shape-specific container operations.
//!
//! Array mutators work on a copy of the items and notify from a per-index
//! diff of before and after, so a `reverse` of `[a, b, a]` notifies nothing
//! and a `push` notifies the new index and `length` only. Set and map
//! operations map onto the entry protocol and notify the entry, `size` and
//! the container's contents.

use std::cmp::Ordering;

use super::container::{Access, Container};
use crate::error::{Error, Result};
use crate::value::{diff_items, Changes, HashKey, Key, Shape, Value};

impl Container {
    /// Apply `f` to the array items and notify whatever moved.
    fn splice_items<T>(&self, f: impl FnOnce(&mut Vec<Value>) -> T) -> Result<T> {
        let found = self.kind();
        self.check_writable(&Key::Length, Access::Public)?;
        let (result, changes) = {
            let mut shape = self.aggregate().shape_mut();
            let Shape::Array(items) = &mut *shape else {
                return Err(Error::WrongShape {
                    expected: "array",
                    found,
                });
            };
            let before = items.clone();
            let result = f(items);
            (result, diff_items(&before, items))
        };
        self.notify(changes)?;
        Ok(result)
    }

    /// Append items; returns the new length.
    pub fn push(&self, values: impl IntoIterator<Item = Value>) -> Result<usize> {
        let values: Vec<Value> = values.into_iter().map(Value::into_stored).collect();
        self.splice_items(|items| {
            items.extend(values);
            items.len()
        })
    }

    /// Remove and return the last item; `Undefined` when empty.
    pub fn pop(&self) -> Result<Value> {
        let value = self.splice_items(|items| items.pop().unwrap_or_default())?;
        Ok(self.present(value))
    }

    /// Remove and return the first item; `Undefined` when empty.
    pub fn shift(&self) -> Result<Value> {
        let value = self.splice_items(|items| {
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        })?;
        Ok(self.present(value))
    }

    /// Prepend items; returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> Result<usize> {
        let values: Vec<Value> = values.into_iter().map(Value::into_stored).collect();
        self.splice_items(|items| {
            items.splice(0..0, values);
            items.len()
        })
    }

    /// Insert one item before `index`, clamped to the length.
    pub fn insert_at(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into().into_stored();
        self.splice_items(|items| {
            let index = index.min(items.len());
            items.insert(index, value);
        })
    }

    /// Remove `delete_count` items starting at `start` and insert `values` in
    /// their place. Returns the removed items.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        let values: Vec<Value> = values.into_iter().map(Value::into_stored).collect();
        let removed = self.splice_items(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, values).collect::<Vec<_>>()
        })?;
        Ok(removed.into_iter().map(|value| self.present(value)).collect())
    }

    /// Reverse in place.
    pub fn reverse(&self) -> Result<()> {
        self.splice_items(|items| items.reverse())
    }

    /// Stable sort with a comparator over the stored values. The comparator
    /// must not access this container.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        self.splice_items(|items| items.sort_by(|a, b| compare(a, b)))
    }

    /// Add a member to a set. Returns whether it was new.
    pub fn add(&self, value: impl Into<Value>) -> Result<bool> {
        self.expect_shape("set")?;
        let key = Key::Entry(HashKey::of(&value.into()));
        self.check_writable(&key, Access::Public)?;
        let changes = self
            .aggregate()
            .shape_mut()
            .members_mut()
            .store(key, Value::Undefined)?;
        let added = !changes.is_empty();
        self.notify(changes)?;
        Ok(added)
    }

    /// Store a map entry.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.expect_shape("map")?;
        self.write(Key::entry(key), value.into(), Access::Public)
    }

    /// Read a map entry. Counts as a read of that entry only.
    pub fn lookup(&self, key: impl Into<Value>) -> Value {
        self.get(Key::entry(key))
    }

    /// Set or map membership test. Counts as a read of that entry only.
    pub fn contains(&self, key: impl Into<Value>) -> bool {
        self.has(Key::entry(key))
    }

    /// Remove a set member or map entry. Returns whether it existed.
    pub fn remove(&self, key: impl Into<Value>) -> Result<bool> {
        let key = Key::entry(key);
        if !matches!(self.kind(), "set" | "map") {
            self.expect_shape("map")?;
        }
        self.check_writable(&key, Access::Public)?;
        let changes = self.aggregate().shape_mut().members_mut().remove(&key);
        let removed = !changes.is_empty();
        self.notify(changes)?;
        Ok(removed)
    }

    /// Remove every member of a set or map.
    pub fn clear(&self) -> Result<()> {
        if !matches!(self.kind(), "set" | "map") {
            self.expect_shape("map")?;
        }
        self.check_writable(&Key::Contents, Access::Public)?;
        let changes = {
            let mut shape = self.aggregate().shape_mut();
            let mut changes = Changes::new();
            let removed: Vec<HashKey> = match &mut *shape {
                Shape::Set(items) => items.drain(..).collect(),
                Shape::Map(entries) => entries.drain(..).map(|(key, _)| key).collect(),
                _ => Vec::new(),
            };
            if !removed.is_empty() {
                changes.extend(removed.into_iter().map(Key::Entry));
                changes.push(Key::Size);
                changes.push(Key::Contents);
            }
            changes
        };
        self.notify(changes)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::error::Error;
    use crate::reactive::{run, wrap};
    use crate::value::Value;

    fn numbers(values: &[i32]) -> Value {
        Value::array(values.iter().map(|n| Value::from(*n)))
    }

    #[test]
    fn push_notifies_length_readers() {
        let list = wrap(numbers(&[1, 2])).unwrap();
        let reader = list.clone();
        let output = run(move || Ok(reader.get("length"))).unwrap();

        assert_eq!(list.push([Value::from(3)]).unwrap(), 3);
        assert_eq!(output.get("current"), Value::from(3));
    }

    #[test]
    fn reverse_of_palindrome_is_silent() {
        let list = wrap(numbers(&[1, 2, 1])).unwrap();
        let runs = Rc::new(Cell::new(0));
        let (reader, counter) = (list.clone(), runs.clone());
        let _output = run(move || {
            counter.set(counter.get() + 1);
            Ok(reader.values().len())
        })
        .unwrap();

        list.reverse().unwrap();
        assert_eq!(runs.get(), 1);

        list.sort_by(|a, b| {
            a.as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(list.snapshot(), serde_json::json!([1, 1, 2]));
    }

    #[test]
    fn shift_only_notifies_moved_indexes() {
        let list = wrap(numbers(&[1, 2, 2])).unwrap();
        let reader = list.clone();
        // index 1 holds 2 before and after the shift
        let output = run(move || Ok(reader.get(1))).unwrap();
        let reactor_runs = crate::reactive::run_count(&output).unwrap();

        assert_eq!(list.shift().unwrap(), Value::from(1));
        assert_eq!(crate::reactive::run_count(&output), Some(reactor_runs));
    }

    #[test]
    fn splice_returns_removed_items() {
        let list = wrap(numbers(&[1, 2, 3, 4])).unwrap();
        let removed = list.splice(1, 2, [Value::from(9)]).unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(list.snapshot(), serde_json::json!([1, 9, 4]));
    }

    #[test]
    fn set_membership_drives_size() {
        let tags = wrap(Value::set([Value::from("a")])).unwrap();
        let reader = tags.clone();
        let output = run(move || Ok(reader.len())).unwrap();

        assert!(tags.add("b").unwrap());
        assert!(!tags.add("b").unwrap());
        assert_eq!(output.get("current"), Value::from(2));

        assert!(tags.remove("a").unwrap());
        assert_eq!(output.get("current"), Value::from(1));
    }

    #[test]
    fn map_entries_are_tracked_individually() {
        let scores = wrap(Value::map([(Value::from("a"), Value::from(1))])).unwrap();
        let reader = scores.clone();
        let output = run(move || Ok(reader.lookup("a"))).unwrap();
        let before = crate::reactive::run_count(&output).unwrap();

        scores.insert("b", 2).unwrap();
        assert_eq!(crate::reactive::run_count(&output), Some(before));

        scores.insert("a", 5).unwrap();
        assert_eq!(output.get("current"), Value::from(5));
    }

    #[test]
    fn clear_notifies_size() {
        let scores = wrap(Value::map([(Value::from("a"), Value::from(1))])).unwrap();
        let reader = scores.clone();
        let output = run(move || Ok(reader.len())).unwrap();

        scores.clear().unwrap();
        assert_eq!(output.get("current"), Value::from(0));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let object = wrap(Value::object([("a", Value::from(1))])).unwrap();
        assert!(matches!(
            object.push([Value::from(1)]),
            Err(Error::WrongShape { expected: "array", found: "object" })
        ));
        assert!(matches!(object.add(1), Err(Error::WrongShape { .. })));
    }
}
