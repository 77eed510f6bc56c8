//! Field-mask operations over serialized records
//!
//! Records are projected onto [`serde_json::Value`] trees so that one set of
//! path-driven helpers works for every record type:
//! - [`field_is_zero`] decides zero-ness of the field at a path
//! - [`set_fields`] copies the masked fields of one record into another
//! - [`filtered`] keeps only the masked fields of a record
//!
//! A field is zero when it is absent, `null`, `false`, a numeric zero, an
//! empty string or an empty list. Any present record (JSON object) is non-zero.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::path::FieldPath;

/// Serialize a record into its value tree
pub fn to_value<T: Serialize>(record: &T) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}

/// Deserialize a record from its value tree
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Value at `path`, if every segment resolves
pub fn get<'a>(value: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |v, seg| v.as_object()?.get(seg.as_str()))
}

/// Whether a single value is zero
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !*b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(_) => false,
    }
}

/// Whether the field at `path` is zero (absent fields are zero)
pub fn field_is_zero(value: &Value, path: &FieldPath) -> bool {
    get(value, path).map_or(true, is_zero)
}

/// Equality treating absent and zero fields alike
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    let a_zero = a.map_or(true, is_zero);
    let b_zero = b.map_or(true, is_zero);
    if a_zero || b_zero {
        return a_zero && b_zero;
    }
    a == b
}

fn remove(dst: &mut Value, path: &FieldPath) {
    let Some((last, parents)) = path.segments().split_last() else {
        *dst = Value::Object(Map::new());
        return;
    };
    let mut cur = dst;
    for seg in parents {
        match cur.as_object_mut().and_then(|m| m.get_mut(seg.as_str())) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Some(m) = cur.as_object_mut() {
        m.remove(last.as_str());
    }
}

fn insert(dst: &mut Value, path: &FieldPath, leaf: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        *dst = leaf;
        return;
    };
    let mut cur = dst;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = match cur {
            Value::Object(m) => m
                .entry(seg.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Value::Object(m) = cur {
        m.insert(last.clone(), leaf);
    }
}

/// Copy the fields of `src` selected by `paths` into `dst`
///
/// A present field in `src` overwrites (and creates parents in) `dst`; an
/// absent or `null` field in `src` clears the field in `dst`.
pub fn set_value_fields<'a>(
    dst: &mut Value,
    src: &Value,
    paths: impl IntoIterator<Item = &'a FieldPath>,
) {
    for path in paths {
        match get(src, path) {
            Some(leaf) if !leaf.is_null() => insert(dst, path, leaf.clone()),
            _ => remove(dst, path),
        }
    }
}

/// Typed wrapper around [`set_value_fields`]
pub fn set_fields<'a, T>(
    dst: &T,
    src: &T,
    paths: impl IntoIterator<Item = &'a FieldPath>,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut out = to_value(dst)?;
    set_value_fields(&mut out, &to_value(src)?, paths);
    from_value(out)
}

/// Copy of `src` keeping only the fields selected by `paths`
pub fn filtered<'a, T>(src: &T, paths: impl IntoIterator<Item = &'a FieldPath>) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut out = Value::Object(Map::new());
    set_value_fields(&mut out, &to_value(src)?, paths);
    from_value(out)
}
