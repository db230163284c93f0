//! Staged, path-addressed editing of a single data cell.
//!
//! A mutator never touches the replicated tree directly. It edits a working copy
//! through [`CellMut`], which records every accepted edit; the store replays the
//! recorded edits in one transaction once the mutator has returned successfully.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::CellError;
use crate::{ElementKey, Result};

/// One step of a path inside a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// An edit accepted by [`CellMut`], in the order it was made.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CellEdit {
    /// Assign an object field
    Set { path: Vec<Segment>, value: Value },
    /// Delete an object field
    Remove { path: Vec<Segment> },
    /// Delete `delete` items at `start` of the array at `path`, then insert `insert` there
    Splice {
        path: Vec<Segment>,
        start: usize,
        delete: usize,
        insert: Vec<Value>,
    },
    /// Structural replace of the whole cell
    Replace { value: Value },
}

/// Mutable proxy handed to cell mutators.
///
/// Paths are dot-separated field names; a component addressing an array element is an
/// index, and the empty path is the cell itself:
///
/// ```
/// # use elemsync::{ElementKey, cell::CellMut};
/// # use serde_json::json;
/// # let mut cell = CellMut::detached(ElementKey::new("can-move", "box"), json!({ "pos": { "x": 0 }, "trail": [] }));
/// cell.set("pos.x", 10)?;
/// cell.push("trail", json!({ "x": 10 }))?;
/// assert_eq!(cell.get("trail.0.x"), Some(&json!(10)));
///
/// // Index assignment cannot be replicated and fails loudly.
/// assert!(cell.set("trail.0", json!(null)).is_err());
/// # Ok::<(), elemsync::Error>(())
/// ```
pub struct CellMut {
    key: ElementKey,
    value: Value,
    edits: Vec<CellEdit>,
    failure: Option<CellError>,
}

impl CellMut {
    pub(crate) fn new(key: ElementKey, value: Value) -> Self {
        Self {
            key,
            value,
            edits: Vec::new(),
            failure: None,
        }
    }

    /// A proxy over a plain value, not attached to any store.
    ///
    /// Useful to validate a mutator before handing it to the engine.
    pub fn detached(key: ElementKey, value: Value) -> Self {
        Self::new(key, value)
    }

    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    /// The working value, including edits made so far.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The value at `path`, if it exists.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = self.resolve(path).ok()?;
        node(&self.value, &segments)
    }

    /// Edits recorded so far.
    pub fn edits(&self) -> &[CellEdit] {
        &self.edits
    }

    /// Assign an object field. Assigning an array element is not supported.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (parent, last) = self.split_last(path, "set")?;
        let segment = match node(&self.value, &parent) {
            Some(Value::Object(_)) => Segment::Key(last),
            Some(Value::Array(_)) => return Err(self.unsupported("index assignment", path)),
            Some(other) => return Err(self.mismatch(&parent, "object", other)),
            None => return Err(self.not_found(&parent)),
        };

        if let Some(Value::Object(fields)) = node_mut(&mut self.value, &parent)
            && let Segment::Key(field) = &segment
        {
            fields.insert(field.clone(), value.clone());
        }
        let mut path = parent;
        path.push(segment);
        self.edits.push(CellEdit::Set { path, value });
        Ok(())
    }

    /// Delete an object field, returning its previous value.
    ///
    /// Array elements are removed with [`CellMut::splice`].
    pub fn remove(&mut self, path: &str) -> Result<Option<Value>> {
        let (parent, last) = self.split_last(path, "remove")?;
        let previous = match node_mut(&mut self.value, &parent) {
            Some(Value::Object(fields)) => fields.remove(&last),
            Some(Value::Array(_)) => return Err(self.unsupported("remove by index", path)),
            Some(other) => {
                let other = other.clone();
                return Err(self.mismatch(&parent, "object", &other));
            }
            None => return Err(self.not_found(&parent)),
        };

        let mut path = parent;
        path.push(Segment::Key(last));
        self.edits.push(CellEdit::Remove { path });
        Ok(previous)
    }

    /// Append one item to the array at `path`.
    pub fn push(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.extend(path, [value.into()])
    }

    /// Append items to the array at `path`.
    pub fn extend(&mut self, path: &str, values: impl IntoIterator<Item = Value>) -> Result<()> {
        let len = self.array_len(path)?;
        self.splice(path, len, 0, values).map(|_| ())
    }

    /// Insert one item at `index` of the array at `path`.
    pub fn insert(&mut self, path: &str, index: usize, value: impl Into<Value>) -> Result<()> {
        self.splice(path, index, 0, [value.into()]).map(|_| ())
    }

    /// Remove `delete_count` items at `start` and insert `items` in their place.
    ///
    /// Returns the removed items.
    pub fn splice(
        &mut self,
        path: &str,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        let segments = self.resolve(path)?;
        let insert: Vec<Value> = items.into_iter().collect();

        let removed = match node_mut(&mut self.value, &segments) {
            Some(Value::Array(array)) => {
                if start > array.len() || start + delete_count > array.len() {
                    let len = array.len();
                    return Err(CellError::IndexOutOfBounds {
                        key: self.key.to_string(),
                        path: path.to_string(),
                        index: start + delete_count,
                        len,
                    }
                    .into());
                }
                array
                    .splice(start..start + delete_count, insert.iter().cloned())
                    .collect::<Vec<_>>()
            }
            Some(other) => {
                let other = other.clone();
                return Err(self.mismatch(&segments, "array", &other));
            }
            None => return Err(self.not_found(&segments)),
        };

        if delete_count > 0 || !insert.is_empty() {
            self.edits.push(CellEdit::Splice {
                path: segments,
                start,
                delete: delete_count,
                insert,
            });
        }
        Ok(removed)
    }

    /// Not supported: the replicated array cannot remove from its back.
    ///
    /// Always fails; use [`CellMut::splice`] with an explicit index instead.
    pub fn pop(&mut self, path: &str) -> Result<Value> {
        self.array_len(path)?;
        Err(self.unsupported("pop", path))
    }

    /// Not supported: the replicated array cannot remove from its front.
    ///
    /// Always fails; use [`CellMut::splice`] with an explicit index instead.
    pub fn shift(&mut self, path: &str) -> Result<Value> {
        self.array_len(path)?;
        Err(self.unsupported("shift", path))
    }

    /// Replace the whole cell, diff-merging onto the existing structure.
    ///
    /// Replacing with an equal value records nothing.
    pub fn replace(&mut self, value: impl Into<Value>) {
        let value = value.into();
        if self.value == value {
            return;
        }
        self.value = value.clone();
        self.edits.push(CellEdit::Replace { value });
    }

    pub(crate) fn into_parts(self) -> (Value, Vec<CellEdit>, Option<CellError>) {
        (self.value, self.edits, self.failure)
    }

    fn array_len(&self, path: &str) -> Result<usize> {
        let segments = self.resolve(path)?;
        match node(&self.value, &segments) {
            Some(Value::Array(array)) => Ok(array.len()),
            Some(other) => Err(self.mismatch(&segments, "array", other)),
            None => Err(self.not_found(&segments)),
        }
    }

    /// Resolves every component of `path` against the working value.
    fn resolve(&self, path: &str) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut current = Some(&self.value);
        for component in components(path) {
            let segment = match current {
                Some(Value::Array(_)) => match component.parse::<usize>() {
                    Ok(index) => Segment::Index(index),
                    Err(_) => {
                        return Err(CellError::PathNotFound {
                            key: self.key.to_string(),
                            path: path.to_string(),
                        }
                        .into());
                    }
                },
                _ => Segment::Key(component.to_string()),
            };
            current = current.and_then(|value| child(value, &segment));
            segments.push(segment);
        }
        Ok(segments)
    }

    /// Splits `path` into its resolved parent and final component.
    fn split_last(&self, path: &str, operation: &str) -> Result<(Vec<Segment>, String)> {
        let mut parts: Vec<&str> = components(path).collect();
        let Some(last) = parts.pop() else {
            return Err(CellError::PathNotFound {
                key: self.key.to_string(),
                path: format!("{operation} needs a non-empty path"),
            }
            .into());
        };
        let parent = self.resolve(&parts.join("."))?;
        Ok((parent, last.to_string()))
    }

    fn unsupported(&mut self, operation: &str, path: &str) -> crate::Error {
        let err = CellError::UnsupportedArrayEdit {
            key: self.key.to_string(),
            path: path.to_string(),
            operation: operation.to_string(),
        };
        self.failure.get_or_insert_with(|| err.clone());
        err.into()
    }

    fn mismatch(&self, segments: &[Segment], expected: &str, actual: &Value) -> crate::Error {
        CellError::TypeMismatch {
            key: self.key.to_string(),
            path: join(segments),
            expected: expected.to_string(),
            actual: kind(actual).to_string(),
        }
        .into()
    }

    fn not_found(&self, segments: &[Segment]) -> crate::Error {
        CellError::PathNotFound {
            key: self.key.to_string(),
            path: join(segments),
        }
        .into()
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|component| !component.is_empty())
}

pub(crate) fn join(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(Segment::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (value, segment) {
        (Value::Object(fields), Segment::Key(key)) => fields.get(key),
        (Value::Array(items), Segment::Index(index)) => items.get(*index),
        _ => None,
    }
}

pub(crate) fn node<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| child(current, segment))
}

fn node_mut<'a>(value: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| match (current, segment) {
            (Value::Object(fields), Segment::Key(key)) => fields.get_mut(key),
            (Value::Array(items), Segment::Index(index)) => items.get_mut(*index),
            _ => None,
        })
}
