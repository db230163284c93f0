//! Live bindings between data cells and application code.
//!
//! Every bound `(tag, element id)` pair has exactly one [`ElementBinding`], owned by the
//! engine's [`BindingRegistry`]. Application code never holds the binding itself: it
//! gets a [`BindingHandle`], a weak, cheap-to-clone address that reads the binding's
//! current fields and funnels writes back through the engine.
//!
//! Registry methods never run capability callbacks while a lock is held; callbacks are
//! free to read and write through the handle they receive.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use serde_json::Value;

use crate::{
    Capability, CapabilityTag, ElementId, ElementInfo, ElementKey, Result,
    cell::{CellMut, CellRef},
    engine::{SyncEngine, WeakSyncEngine},
};

mod errors;
pub use errors::BindingError;

pub mod hooks;
pub use hooks::{
    ChannelMutationListener, MutationEvent, MutationListener, WriteContext, WriteGuard,
    WriteSource,
};

/// Runtime state of one bound element.
pub(crate) struct ElementBinding {
    pub(crate) key: ElementKey,
    pub(crate) element: ElementInfo,
    pub(crate) capability: Arc<Capability>,
    pub(crate) cell: CellRef,
    /// Latest snapshot of the data cell
    pub(crate) data: Value,
    /// Never replicated
    pub(crate) local_data: Value,
    /// Other clients' payloads for this element, ordered by client id
    pub(crate) awareness: Vec<Value>,
    pub(crate) awareness_by_stable_id: BTreeMap<String, Value>,
    /// This client's last broadcast payload
    pub(crate) self_awareness: Option<Value>,
}

impl ElementBinding {
    pub(crate) fn new(
        key: ElementKey,
        element: ElementInfo,
        capability: Arc<Capability>,
        cell: CellRef,
        data: Value,
    ) -> Self {
        Self {
            key,
            element,
            capability,
            cell,
            data,
            local_data: Value::Null,
            awareness: Vec::new(),
            awareness_by_stable_id: BTreeMap::new(),
            self_awareness: None,
        }
    }
}

/// Bindings of one engine, by tag then element id.
#[derive(Default)]
pub(crate) struct BindingRegistry {
    bindings: Mutex<HashMap<CapabilityTag, HashMap<ElementId, ElementBinding>>>,
}

impl BindingRegistry {
    /// Adds `binding` unless one already exists for its key.
    ///
    /// Returns whether it was inserted.
    pub(crate) fn insert(&self, binding: ElementBinding) -> bool {
        let mut bindings = self.bindings.lock().unwrap();
        let by_id = bindings.entry(binding.key.tag.clone()).or_default();
        if by_id.contains_key(&binding.key.element_id) {
            return false;
        }
        by_id.insert(binding.key.element_id.clone(), binding);
        true
    }

    /// Swaps the descriptor and element of an existing binding, keeping its data.
    ///
    /// Returns false if nothing is bound under `key`.
    pub(crate) fn rebind(
        &self,
        key: &ElementKey,
        capability: Arc<Capability>,
        element: ElementInfo,
    ) -> bool {
        self.with_mut(key, |binding| {
            binding.capability = capability;
            binding.element = element;
        })
        .is_some()
    }

    pub(crate) fn remove(&self, key: &ElementKey) -> Option<ElementBinding> {
        let mut bindings = self.bindings.lock().unwrap();
        let by_id = bindings.get_mut(&key.tag)?;
        let removed = by_id.remove(&key.element_id);
        if by_id.is_empty() {
            bindings.remove(&key.tag);
        }
        removed
    }

    pub(crate) fn contains(&self, key: &ElementKey) -> bool {
        self.with(key, |_| ()).is_some()
    }

    pub(crate) fn with<R>(
        &self,
        key: &ElementKey,
        f: impl FnOnce(&ElementBinding) -> R,
    ) -> Option<R> {
        let bindings = self.bindings.lock().unwrap();
        bindings
            .get(&key.tag)
            .and_then(|by_id| by_id.get(&key.element_id))
            .map(f)
    }

    pub(crate) fn with_mut<R>(
        &self,
        key: &ElementKey,
        f: impl FnOnce(&mut ElementBinding) -> R,
    ) -> Option<R> {
        let mut bindings = self.bindings.lock().unwrap();
        bindings
            .get_mut(&key.tag)
            .and_then(|by_id| by_id.get_mut(&key.element_id))
            .map(f)
    }

    pub(crate) fn capability(&self, key: &ElementKey) -> Option<Arc<Capability>> {
        self.with(key, |binding| binding.capability.clone())
    }

    /// Bound keys, sorted.
    pub(crate) fn keys(&self) -> Vec<ElementKey> {
        let bindings = self.bindings.lock().unwrap();
        let mut keys: Vec<ElementKey> = bindings
            .values()
            .flat_map(|by_id| by_id.values().map(|binding| binding.key.clone()))
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn len(&self) -> usize {
        let bindings = self.bindings.lock().unwrap();
        bindings.values().map(HashMap::len).sum()
    }
}

/// Application-facing handle to one element binding.
///
/// Handles are weak: they do not keep the engine alive, and reads on a handle whose
/// engine or binding is gone return empty values. Writes report
/// [`BindingError::EngineDropped`] or [`BindingError::NotBound`] instead.
#[derive(Clone, Debug)]
pub struct BindingHandle {
    key: ElementKey,
    engine: WeakSyncEngine,
}

impl BindingHandle {
    pub(crate) fn new(key: ElementKey, engine: WeakSyncEngine) -> Self {
        Self { key, engine }
    }

    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    /// Whether the binding still exists.
    pub fn is_bound(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.bindings().contains(&self.key))
    }

    /// Latest snapshot of the element's data cell.
    pub fn data(&self) -> Value {
        self.read(|binding| binding.data.clone()).unwrap_or_default()
    }

    /// Local-only data, `null` until set.
    pub fn local_data(&self) -> Value {
        self.read(|binding| binding.local_data.clone())
            .unwrap_or_default()
    }

    /// Other clients' awareness payloads for this element, ordered by client id.
    pub fn awareness(&self) -> Vec<Value> {
        self.read(|binding| binding.awareness.clone())
            .unwrap_or_default()
    }

    /// Other clients' awareness payloads keyed by stable id.
    pub fn awareness_by_stable_id(&self) -> BTreeMap<String, Value> {
        self.read(|binding| binding.awareness_by_stable_id.clone())
            .unwrap_or_default()
    }

    /// This client's last broadcast payload for the element.
    pub fn self_awareness(&self) -> Option<Value> {
        self.read(|binding| binding.self_awareness.clone()).flatten()
    }

    /// The element as last bound.
    pub fn element(&self) -> Option<ElementInfo> {
        self.read(|binding| binding.element.clone())
    }

    /// Structurally replace the element's data.
    ///
    /// Writes vetoed by a [`WriteGuard`] are dropped with a warning and still return
    /// `Ok`.
    pub fn set_data(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.engine()?.write(&self.key, |cell| {
            cell.replace(value);
            Ok(())
        })
    }

    /// Edit the element's data in place.
    ///
    /// The mutator's edits are applied in one transaction, or not at all if it fails.
    /// Unsupported array edits fail the whole call even when the mutator ignores
    /// the error it got.
    pub fn update_data<F>(&self, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut CellMut) -> Result<()>,
    {
        self.engine()?.write(&self.key, mutator)
    }

    /// Replace the local-only data and re-render the element.
    pub fn set_local_data(&self, value: impl Into<Value>) -> Result<()> {
        self.engine()?.set_local_data(&self.key, value.into())
    }

    /// Broadcast this client's awareness payload for the element.
    ///
    /// Returns false without broadcasting when `value` equals the last payload sent.
    pub fn set_my_awareness(&self, value: impl Into<Value>) -> Result<bool> {
        self.engine()?.set_my_awareness(&self.key, value.into())
    }

    /// Write the capability's default back through [`BindingHandle::set_data`].
    pub fn reset(&self) -> Result<()> {
        let engine = self.engine()?;
        let default = engine
            .bindings()
            .with(&self.key, |binding| binding.capability.default_for(&binding.element))
            .ok_or_else(|| BindingError::NotBound {
                key: self.key.to_string(),
            })?;
        self.set_data(default)
    }

    fn engine(&self) -> Result<SyncEngine> {
        self.engine
            .upgrade()
            .ok_or_else(|| BindingError::EngineDropped.into())
    }

    fn read<R>(&self, f: impl FnOnce(&ElementBinding) -> R) -> Option<R> {
        self.engine.upgrade()?.bindings().with(&self.key, f)
    }
}

impl PartialEq for BindingHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.engine.ptr_eq(&other.engine)
    }
}
