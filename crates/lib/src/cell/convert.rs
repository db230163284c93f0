//! Conversion between plain JSON values and the replicated tree.
//!
//! Objects are stored as nested maps and arrays as nested arrays, so edits deep inside
//! a cell replicate as small deltas. Reading always produces a fresh `Value`; nothing
//! returned from here refers back into the document.

use serde_json::{Map as JsonMap, Number, Value};
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, GetString, Map, MapPrelim, MapRef, Out, ReadTxn,
    TransactionMut,
};

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}

/// Whole doubles in the safe range read back as integers.
fn number_to_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Scalars only; containers go through the insert helpers.
pub(crate) fn scalar_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) if (i as f64).abs() <= MAX_SAFE_INTEGER => Any::Number(i as f64),
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Any::String(s.as_str().into()),
        Value::Array(items) => Any::Array(items.iter().map(scalar_to_any).collect()),
        Value::Object(fields) => Any::Map(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_any(v)))
                .collect::<std::collections::HashMap<_, _>>()
                .into(),
        ),
    }
}

pub(crate) fn out_to_json<T: ReadTxn>(out: &Out, txn: &T) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        Out::YMap(map) => map_to_json(map, txn),
        Out::YArray(array) => array_to_json(array, txn),
        Out::YText(text) => Value::String(text.get_string(txn)),
        _ => Value::Null,
    }
}

pub(crate) fn map_to_json<T: ReadTxn>(map: &MapRef, txn: &T) -> Value {
    Value::Object(
        map.iter(txn)
            .map(|(key, out)| (key.to_string(), out_to_json(&out, txn)))
            .collect(),
    )
}

pub(crate) fn array_to_json<T: ReadTxn>(array: &ArrayRef, txn: &T) -> Value {
    Value::Array(array.iter(txn).map(|out| out_to_json(&out, txn)).collect())
}

/// Write `value` under `key`, replacing whatever was there.
pub(crate) fn insert_into_map(map: &MapRef, txn: &mut TransactionMut, key: &str, value: &Value) {
    match value {
        Value::Object(fields) => {
            let child = map.insert(txn, key, MapPrelim::default());
            fill_map(&child, txn, fields);
        }
        Value::Array(items) => {
            let child = map.insert(txn, key, ArrayPrelim::default());
            fill_array(&child, txn, 0, items);
        }
        scalar => {
            map.insert(txn, key, scalar_to_any(scalar));
        }
    }
}

/// Insert `value` at `index`, shifting later elements.
pub(crate) fn insert_into_array(
    array: &ArrayRef,
    txn: &mut TransactionMut,
    index: u32,
    value: &Value,
) {
    match value {
        Value::Object(fields) => {
            let child = array.insert(txn, index, MapPrelim::default());
            fill_map(&child, txn, fields);
        }
        Value::Array(items) => {
            let child = array.insert(txn, index, ArrayPrelim::default());
            fill_array(&child, txn, 0, items);
        }
        scalar => {
            array.insert(txn, index, scalar_to_any(scalar));
        }
    }
}

fn fill_map(map: &MapRef, txn: &mut TransactionMut, fields: &JsonMap<String, Value>) {
    for (key, value) in fields {
        insert_into_map(map, txn, key, value);
    }
}

pub(crate) fn fill_array(array: &ArrayRef, txn: &mut TransactionMut, at: u32, items: &[Value]) {
    for (offset, item) in items.iter().enumerate() {
        insert_into_array(array, txn, at + offset as u32, item);
    }
}

/// Structural replace of the entry under `key`.
///
/// Nested maps and arrays that already exist with the same shape are edited in place
/// instead of being swapped out, so concurrent edits to untouched parts survive.
pub(crate) fn merge_entry(map: &MapRef, txn: &mut TransactionMut, key: &str, new: &Value) {
    match (map.get(&*txn, key), new) {
        (Some(Out::YMap(child)), Value::Object(fields)) => merge_map(&child, txn, fields),
        (Some(Out::YArray(child)), Value::Array(items)) => merge_array(&child, txn, items),
        (Some(Out::Any(existing)), _) if any_to_json(&existing) == *new => {}
        _ => insert_into_map(map, txn, key, new),
    }
}

pub(crate) fn merge_map(map: &MapRef, txn: &mut TransactionMut, fields: &JsonMap<String, Value>) {
    let stale: Vec<String> = map
        .keys(&*txn)
        .filter(|key| !fields.contains_key(*key))
        .map(String::from)
        .collect();
    for key in stale {
        map.remove(txn, &key);
    }
    for (key, value) in fields {
        merge_entry(map, txn, key, value);
    }
}

/// Keeps the common prefix and suffix and splices the middle.
pub(crate) fn merge_array(array: &ArrayRef, txn: &mut TransactionMut, items: &[Value]) {
    let current: Vec<Value> = array
        .iter(&*txn)
        .map(|out| out_to_json(&out, &*txn))
        .collect();

    let prefix = current
        .iter()
        .zip(items)
        .take_while(|(old, new)| old == new)
        .count();
    let max_suffix = current.len().min(items.len()) - prefix;
    let suffix = current
        .iter()
        .rev()
        .zip(items.iter().rev())
        .take(max_suffix)
        .take_while(|(old, new)| old == new)
        .count();

    let removed = current.len() - prefix - suffix;
    if removed > 0 {
        array.remove_range(txn, prefix as u32, removed as u32);
    }
    fill_array(array, txn, prefix as u32, &items[prefix..items.len() - suffix]);
}
