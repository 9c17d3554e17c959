//! JSON interop.
//!
//! Building containers from JSON is the quickest way to get nested state into
//! the reactive layer; snapshotting back to JSON gives an untracked deep copy
//! that is easy to assert on and to log.

use std::collections::HashSet;

use serde_json::{Map as JsonMap, Number, Value as Json};

use super::{Aggregate, HashKey, Shape, Value};
use crate::id::AggregateId;

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::array(items.into_iter().map(Value::from)),
            Json::Object(fields) => {
                Value::object(fields.into_iter().map(|(name, value)| (name, Value::from(value))))
            }
        }
    }
}

/// Deep, untracked conversion of a value to JSON.
///
/// Undefined becomes `null`, functions are dropped, sets become arrays and
/// maps become objects when every key is a string, arrays of `[key, value]`
/// pairs otherwise. An aggregate reached again through a reference cycle is
/// emitted as `null`.
pub(crate) fn to_json(value: &Value) -> Json {
    let mut visiting = HashSet::new();
    convert(value, &mut visiting)
}

fn convert(value: &Value, visiting: &mut HashSet<AggregateId>) -> Json {
    match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Json::from(*n as i64),
        Value::Number(n) => Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Function(_) | Value::Method(_) => Json::Null,
        Value::Aggregate(_) | Value::Reactive(_) => match value.as_aggregate() {
            Some(aggregate) => convert_aggregate(aggregate, visiting),
            None => Json::Null,
        },
    }
}

fn convert_aggregate(aggregate: &Aggregate, visiting: &mut HashSet<AggregateId>) -> Json {
    if !visiting.insert(aggregate.id()) {
        return Json::Null;
    }
    let json = match &*aggregate.shape() {
        Shape::Object(object) => Json::Object(
            object
                .fields
                .iter()
                .filter(|(_, value)| !matches!(value, Value::Function(_)))
                .map(|(name, value)| (name.to_string(), convert(value, visiting)))
                .collect(),
        ),
        Shape::Array(items) => Json::Array(items.iter().map(|item| convert(item, visiting)).collect()),
        Shape::Set(items) => Json::Array(
            items
                .iter()
                .map(|item| convert(&item.to_value(), visiting))
                .collect(),
        ),
        Shape::Map(entries) => {
            if entries.keys().all(|key| matches!(key, HashKey::Str(_))) {
                let mut object = JsonMap::new();
                for (key, value) in entries {
                    object.insert(key.to_value().to_string(), convert(value, visiting));
                }
                Json::Object(object)
            } else {
                Json::Array(
                    entries
                        .iter()
                        .map(|(key, value)| {
                            Json::Array(vec![convert(&key.to_value(), visiting), convert(value, visiting)])
                        })
                        .collect(),
                )
            }
        }
    };
    visiting.remove(&aggregate.id());
    json
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_of_nested_state() {
        let source = json!({"foo": {"bar": "a"}, "list": [1, 2, 3], "flag": true});
        let value = Value::from(source.clone());
        assert_eq!(to_json(&value), source);
    }

    #[test]
    fn maps_with_non_string_keys_become_pairs() {
        let value = Value::map([(Value::from(1), Value::from("one"))]);
        assert_eq!(to_json(&value), json!([[1, "one"]]));
    }

    #[test]
    fn sets_become_arrays() {
        let value = Value::set([Value::from("a"), Value::from("b"), Value::from("a")]);
        assert_eq!(to_json(&value), json!(["a", "b"]));
    }
}
