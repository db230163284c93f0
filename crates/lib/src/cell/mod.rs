//! Replicated data cells addressed by `(tag, element id)`.
//!
//! [`DataCellStore`] owns the `yrs` document. The cells of a tag live in a root map of
//! their own, `"{root}/{tag}"`, keyed by element id. Root maps are identified by name,
//! so peers that create the first cell of a tag concurrently still write into one map.
//! The map named `root` is an index of the tags in use.
//!
//! Every read produces a detached [`serde_json::Value`]; every write goes through a
//! single transaction so one logical change is one delta on the wire.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use yrs::{
    Array, ArrayRef, DeepObservable, Doc, Map, MapRef, Out, ReadTxn, StateVector, Subscription,
    Transact, TransactionMut, Update, WriteTxn,
    types::{Event, PathSegment},
    updates::{decoder::Decode, encoder::Encode},
};

use crate::{ElementKey, Result, constants::TAG_ROOT_SEPARATOR};

mod convert;
mod errors;
mod proxy;

pub(crate) use convert::{insert_into_map, map_to_json, out_to_json};
pub use errors::CellError;
pub use proxy::{CellEdit, CellMut, Segment};

use convert::{fill_array, insert_into_array, merge_entry};

/// Reference to an existing data cell.
///
/// Holds only the address; the store re-resolves it on every access so a reference
/// never pins replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellRef {
    key: ElementKey,
}

impl CellRef {
    pub fn key(&self) -> &ElementKey {
        &self.key
    }
}

/// Store of data cells over a `yrs` document.
pub struct DataCellStore {
    doc: Doc,
    root: String,
    tags: MapRef,
    transactions: AtomicU64,
    mutations: AtomicU64,
}

impl DataCellStore {
    /// Opens the cell tree rooted at `root` in `doc`.
    pub fn new(doc: Doc, root: &str) -> Self {
        let tags = doc.get_or_insert_map(root);
        Self {
            doc,
            root: root.to_string(),
            tags,
            transactions: AtomicU64::new(0),
            mutations: AtomicU64::new(0),
        }
    }

    /// The underlying document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Return the cell for `key`, creating it from `default` if it does not exist.
    ///
    /// An existing cell is returned untouched, no matter what `default` is.
    pub fn ensure_cell(&self, key: &ElementKey, default: &Value) -> Result<CellRef> {
        validate_key(key)?;
        if self.contains(key) {
            return Ok(CellRef { key: key.clone() });
        }

        let mut txn = self.doc.transact_mut();
        let created = ensure_in(&self.root, &self.tags, &mut txn, key, default);
        drop(txn);
        self.transactions.fetch_add(1, Ordering::Relaxed);
        if created {
            tracing::debug!(%key, "created data cell");
        }
        Ok(CellRef { key: key.clone() })
    }

    /// Reference to an existing cell.
    pub fn cell(&self, key: &ElementKey) -> Result<CellRef> {
        if self.contains(key) {
            Ok(CellRef { key: key.clone() })
        } else {
            Err(CellError::CellNotFound {
                key: key.to_string(),
            }
            .into())
        }
    }

    pub fn contains(&self, key: &ElementKey) -> bool {
        let txn = self.doc.transact();
        tag_map(&txn, &self.root, key.tag.as_str())
            .is_some_and(|tag_map| tag_map.contains_key(&txn, key.element_id.as_str()))
    }

    /// A detached copy of the cell's current value.
    pub fn read_snapshot(&self, cell: &CellRef) -> Result<Value> {
        let txn = self.doc.transact();
        let value = tag_map(&txn, &self.root, cell.key.tag.as_str())
            .and_then(|tag_map| tag_map.get(&txn, cell.key.element_id.as_str()));
        value
            .map(|out| out_to_json(&out, &txn))
            .ok_or_else(|| {
                CellError::CellNotFound {
                    key: cell.key.to_string(),
                }
                .into()
            })
    }

    /// Run `mutator` against a staged copy of the cell and apply its edits atomically.
    ///
    /// Nothing reaches the document if the mutator fails or attempted an edit the
    /// replicated array cannot express. Returns the applied edits.
    pub fn mutate<F>(&self, cell: &CellRef, mutator: F) -> Result<Vec<CellEdit>>
    where
        F: FnOnce(&mut CellMut) -> Result<()>,
    {
        let current = self.read_snapshot(cell)?;
        let mut proxy = CellMut::new(cell.key.clone(), current);
        let outcome = mutator(&mut proxy);
        let (value, edits, failure) = proxy.into_parts();

        outcome?;
        if let Some(err) = failure {
            return Err(err.into());
        }
        if edits.is_empty() {
            return Ok(edits);
        }

        let mut txn = self.doc.transact_mut();
        let tag_map = txn.get_or_insert_map(tag_root(&self.root, cell.key.tag.as_str()));
        let id = cell.key.element_id.as_str();
        for edit in &edits {
            apply_edit(&tag_map, &mut txn, id, &value, edit);
        }
        drop(txn);

        self.transactions.fetch_add(1, Ordering::Relaxed);
        self.mutations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %cell.key, edits = edits.len(), "applied cell mutation");
        Ok(edits)
    }

    /// Structural replace of the whole cell.
    pub fn replace(&self, cell: &CellRef, value: &Value) -> Result<Vec<CellEdit>> {
        self.mutate(cell, |proxy| {
            proxy.replace(value.clone());
            Ok(())
        })
    }

    /// Delete the cell. Returns whether it existed.
    pub fn remove_cell(&self, cell: &CellRef) -> Result<bool> {
        let mut txn = self.doc.transact_mut();
        let removed = match tag_map(&txn, &self.root, cell.key.tag.as_str()) {
            Some(tag_map) => tag_map
                .remove(&mut txn, cell.key.element_id.as_str())
                .is_some(),
            None => false,
        };
        drop(txn);
        self.transactions.fetch_add(1, Ordering::Relaxed);
        if removed {
            self.mutations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// Run several cell creations in one transaction.
    pub fn batch<R>(&self, f: impl FnOnce(&mut CellBatch<'_>) -> R) -> R {
        let mut batch = CellBatch {
            root: &self.root,
            tags: &self.tags,
            txn: self.doc.transact_mut(),
        };
        let out = f(&mut batch);
        drop(batch);
        self.transactions.fetch_add(1, Ordering::Relaxed);
        out
    }

    /// All cells as one `{tag: {element_id: value}}` object.
    pub fn snapshot_all(&self) -> Value {
        let txn = self.doc.transact();
        let tree = self
            .tags
            .keys(&txn)
            .filter_map(|tag| {
                let cells = tag_map(&txn, &self.root, tag)?;
                Some((tag.to_string(), map_to_json(&cells, &txn)))
            })
            .collect();
        Value::Object(tree)
    }

    /// Keys of every existing cell, sorted.
    pub fn keys(&self) -> Vec<ElementKey> {
        let txn = self.doc.transact();
        let mut keys = Vec::new();
        for tag in self.tags.keys(&txn) {
            if let Some(cells) = tag_map(&txn, &self.root, tag) {
                keys.extend(cells.keys(&txn).map(|id| ElementKey::new(tag, id)));
            }
        }
        keys.sort();
        keys
    }

    /// Number of write transactions this store has issued.
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Number of local cell mutations this store has applied.
    ///
    /// Remote updates and cell creation are not mutations.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    /// The document's state vector, v1 encoded.
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Everything the holder of `state_vector` is missing, as a v1 update.
    ///
    /// `None` encodes the whole document.
    pub fn encode_state_as_update(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>> {
        let sv = match state_vector {
            Some(bytes) => StateVector::decode_v1(bytes).map_err(|e| CellError::InvalidUpdate {
                reason: format!("state vector: {e}"),
            })?,
            None => StateVector::default(),
        };
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    /// Merge an update received from a peer.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| CellError::InvalidUpdate {
            reason: e.to_string(),
        })?;
        self.doc
            .transact_mut()
            .apply_update(update)
            .map_err(|e| CellError::InvalidUpdate {
                reason: e.to_string(),
            })?;
        tracing::debug!("applied remote update");
        Ok(())
    }

    /// Invoke `callback` after every transaction that touches the cell for `key`.
    ///
    /// The callback runs while the transaction is still being committed and must not
    /// open another transaction on this document.
    pub(crate) fn observe_cell<F>(&self, key: &ElementKey, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cells = self
            .doc
            .get_or_insert_map(tag_root(&self.root, key.tag.as_str()));
        let id = key.element_id.to_string();
        cells.observe_deep(move |txn, events| {
            if events.iter().any(|event| touches(event, txn, &id)) {
                callback();
            }
        })
    }
}

impl std::fmt::Debug for DataCellStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCellStore")
            .field("transactions", &self.transaction_count())
            .field("mutations", &self.mutation_count())
            .finish_non_exhaustive()
    }
}

/// One open write transaction spanning several cell creations.
pub struct CellBatch<'doc> {
    root: &'doc str,
    tags: &'doc MapRef,
    txn: TransactionMut<'doc>,
}

impl CellBatch<'_> {
    /// Like [`DataCellStore::ensure_cell`], inside the batch.
    ///
    /// Returns whether the cell was created.
    pub fn ensure_cell(&mut self, key: &ElementKey, default: &Value) -> Result<bool> {
        validate_key(key)?;
        Ok(ensure_in(self.root, self.tags, &mut self.txn, key, default))
    }
}

fn validate_key(key: &ElementKey) -> Result<()> {
    let reason = if key.tag.is_empty() {
        "empty tag"
    } else if key.element_id.as_str().trim().is_empty() {
        "empty element id"
    } else {
        return Ok(());
    };
    Err(CellError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into())
}

/// Name of the root map holding the cells of `tag`.
fn tag_root(root: &str, tag: &str) -> String {
    format!("{root}{TAG_ROOT_SEPARATOR}{tag}")
}

fn tag_map<T: ReadTxn>(txn: &T, root: &str, tag: &str) -> Option<MapRef> {
    txn.get_map(tag_root(root, tag))
}

fn ensure_in(
    root: &str,
    tags: &MapRef,
    txn: &mut TransactionMut,
    key: &ElementKey,
    default: &Value,
) -> bool {
    let tag = key.tag.as_str();
    if !tags.contains_key(&*txn, tag) {
        tags.insert(txn, tag, true);
    }
    let cells = txn.get_or_insert_map(tag_root(root, tag));
    let id = key.element_id.as_str();
    if cells.contains_key(&*txn, id) {
        return false;
    }
    // Every insert builds fresh shared types from the value, never reusing one.
    insert_into_map(&cells, txn, id, default);
    true
}

/// Whether a deep event from a tag's root map concerns the cell `id`.
fn touches(event: &Event, txn: &TransactionMut, id: &str) -> bool {
    let path = event.path();
    match path.front() {
        None => match event {
            Event::Map(map_event) => map_event.keys(txn).contains_key(id),
            _ => false,
        },
        Some(PathSegment::Key(key)) => key.as_ref() == id,
        Some(PathSegment::Index(_)) => false,
    }
}

enum Container {
    Map(MapRef),
    Array(ArrayRef),
}

/// Walks `path` through shared containers.
///
/// Fails with the depth of the first segment that does not lead to a shared map or
/// array.
fn navigate(
    root: &MapRef,
    txn: &TransactionMut,
    path: &[Segment],
) -> std::result::Result<Container, usize> {
    let mut current = Container::Map(root.clone());
    for (depth, segment) in path.iter().enumerate() {
        let child = match (&current, segment) {
            (Container::Map(map), Segment::Key(key)) => map.get(txn, key),
            (Container::Array(array), Segment::Index(index)) => array.get(txn, *index as u32),
            _ => None,
        };
        current = match child {
            Some(Out::YMap(map)) => Container::Map(map),
            Some(Out::YArray(array)) => Container::Array(array),
            _ => return Err(depth),
        };
    }
    Ok(current)
}

fn apply_edit(
    tag_map: &MapRef,
    txn: &mut TransactionMut,
    id: &str,
    value: &Value,
    edit: &CellEdit,
) {
    let full = |path: &[Segment]| {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(Segment::Key(id.to_string()));
        full.extend(path.iter().cloned());
        full
    };

    match edit {
        CellEdit::Replace { value } => merge_entry(tag_map, txn, id, value),
        CellEdit::Set { path, value: field } => {
            let full = full(path);
            let parent = &full[..full.len() - 1];
            match (navigate(tag_map, txn, parent), full.last()) {
                (Ok(Container::Map(map)), Some(Segment::Key(key))) => {
                    merge_entry(&map, txn, key, field)
                }
                (Ok(_), _) => rewrite(tag_map, txn, &full, parent.len() - 1, value),
                (Err(depth), _) => rewrite(tag_map, txn, &full, depth, value),
            }
        }
        CellEdit::Remove { path } => {
            let full = full(path);
            let parent = &full[..full.len() - 1];
            match (navigate(tag_map, txn, parent), full.last()) {
                (Ok(Container::Map(map)), Some(Segment::Key(key))) => {
                    map.remove(txn, key);
                }
                (Ok(_), _) => rewrite(tag_map, txn, &full, parent.len() - 1, value),
                (Err(depth), _) => rewrite(tag_map, txn, &full, depth, value),
            }
        }
        CellEdit::Splice {
            path,
            start,
            delete,
            insert,
        } => {
            let full = full(path);
            match navigate(tag_map, txn, &full) {
                Ok(Container::Array(array)) => {
                    let len = array.len(&*txn) as usize;
                    let start = (*start).min(len);
                    let delete = (*delete).min(len - start);
                    if delete > 0 {
                        array.remove_range(txn, start as u32, delete as u32);
                    }
                    fill_array(&array, txn, start as u32, insert);
                }
                Ok(Container::Map(_)) => rewrite(tag_map, txn, &full, full.len() - 1, value),
                Err(depth) => rewrite(tag_map, txn, &full, depth, value),
            }
        }
    }
}

/// Writes the final working value of `full[..=depth]` at that position.
///
/// Used when an edit's path runs through embedded values that cannot be edited in
/// place.
fn rewrite(
    tag_map: &MapRef,
    txn: &mut TransactionMut,
    full: &[Segment],
    depth: usize,
    value: &Value,
) {
    let container = match navigate(tag_map, txn, &full[..depth]) {
        Ok(container) => container,
        Err(shallower) => return rewrite(tag_map, txn, full, shallower, value),
    };
    let node = proxy::node(value, &full[1..=depth]);

    match (container, &full[depth], node) {
        (Container::Map(map), Segment::Key(key), Some(node)) => merge_entry(&map, txn, key, node),
        (Container::Map(map), Segment::Key(key), None) => {
            map.remove(txn, key);
        }
        (Container::Array(array), Segment::Index(index), Some(node)) => {
            let len = array.len(&*txn);
            let index = (*index as u32).min(len);
            if index < len {
                array.remove_range(txn, index, 1);
            }
            insert_into_array(&array, txn, index, node);
        }
        _ => tracing::debug!(path = %proxy::join(full), "nothing to rewrite"),
    }
}
