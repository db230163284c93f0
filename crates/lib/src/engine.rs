//! The sync engine: one per shared document.
//!
//! [`SyncEngine`] owns the data cell store, the binding registry, the observer bridge
//! and the awareness aggregator of one document. Nothing is process-wide; engines for
//! different documents coexist and are torn down by dropping them.

use std::{
    fmt,
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use handle_trait::Handle;
use serde_json::Value;
use tokio::sync::broadcast;
use yrs::Doc;

use crate::{
    CapabilityError, CapabilityRegistry, ElementId, ElementInfo, ElementKey, EngineConfig, Result,
    awareness::{AwarenessAggregator, AwarenessUpdate, PresenceChange, PresenceChannel},
    binding::{
        BindingError, BindingHandle, BindingRegistry, ElementBinding, MutationEvent,
        MutationListener, WriteContext, WriteGuard, WriteSource, hooks::WriteHooks,
    },
    cell::{CellMut, DataCellStore},
    migration::{LegacyStore, MigrationCoordinator, MigrationReport, YrsLegacyStore},
    observer::ObserverBridge,
};

/// Shared state behind a [`SyncEngine`].
pub(crate) struct EngineInner {
    config: EngineConfig,
    store: DataCellStore,
    capabilities: Arc<CapabilityRegistry>,
    presence: Arc<dyn PresenceChannel>,
    bindings: BindingRegistry,
    observer: ObserverBridge,
    awareness: AwarenessAggregator,
    hooks: RwLock<WriteHooks>,
    rejected_writes: AtomicU64,
}

impl fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInner")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("capabilities", &self.capabilities)
            .field("local_client", &self.presence.local_client_id())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

/// Element state sync engine for one document.
///
/// A cheap-to-clone handle around shared state. Binding handles and callbacks hold a
/// [`WeakSyncEngine`], so dropping the last `SyncEngine` tears everything down.
///
/// ```
/// use std::sync::Arc;
/// use elemsync::{Capability, CapabilityRegistry, ElementInfo, EngineConfig, SyncEngine};
/// use elemsync::awareness::PresenceHub;
/// use serde_json::json;
///
/// let capabilities = Arc::new(CapabilityRegistry::new());
/// capabilities.register(
///     Capability::builder("can-toggle")
///         .default_data(json!(false))
///         .update_element(|_| {})
///         .build()?,
/// );
///
/// let hub = PresenceHub::new(16);
/// let engine = SyncEngine::new(yrs::Doc::new(), EngineConfig::default(), capabilities, hub.client(1))?;
///
/// let lamp = engine.bind(ElementInfo::with_id("lamp"), "can-toggle")?;
/// lamp.set_data(true)?;
/// assert_eq!(lamp.data(), json!(true));
/// # Ok::<(), elemsync::Error>(())
/// ```
#[derive(Clone, Debug, Handle)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// Weak reference to a [`SyncEngine`].
#[derive(Clone, Debug, Handle)]
pub struct WeakSyncEngine {
    inner: Weak<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over `doc`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        doc: Doc,
        config: EngineConfig,
        capabilities: Arc<CapabilityRegistry>,
        presence: Arc<dyn PresenceChannel>,
    ) -> Result<Self> {
        config.validate()?;
        let store = DataCellStore::new(doc, &config.cells_root);
        tracing::debug!(
            cells_root = %config.cells_root,
            client = presence.local_client_id(),
            "created sync engine"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                capabilities,
                presence,
                bindings: BindingRegistry::default(),
                observer: ObserverBridge::default(),
                awareness: AwarenessAggregator::default(),
                hooks: RwLock::new(WriteHooks::default()),
                rejected_writes: AtomicU64::new(0),
            }),
        })
    }

    pub fn store(&self) -> &DataCellStore {
        &self.inner.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.inner.capabilities
    }

    pub fn presence(&self) -> &Arc<dyn PresenceChannel> {
        &self.inner.presence
    }

    /// Downgrade to a weak reference.
    pub fn downgrade(&self) -> WeakSyncEngine {
        WeakSyncEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn bindings(&self) -> &BindingRegistry {
        &self.inner.bindings
    }

    pub(crate) fn binding_handle(&self, key: &ElementKey) -> BindingHandle {
        BindingHandle::new(key.clone(), self.downgrade())
    }

    /// Bind `element` to the capability registered under `tag`.
    ///
    /// The first bind of an element creates its data cell if needed, mounts and renders
    /// it. Binding an already bound element only swaps in the current descriptor and
    /// element description and re-renders; its data is left as it is.
    pub fn bind(&self, element: ElementInfo, tag: &str) -> Result<BindingHandle> {
        let capability = self.inner.capabilities.get(tag)?;
        let element_id = ElementId::derive(capability.tag(), &element)?;
        let key = ElementKey {
            tag: capability.tag().clone(),
            element_id,
        };
        if !capability.accepts(&element) {
            return Err(CapabilityError::InvalidElement {
                tag: key.tag.to_string(),
                element_id: key.element_id.to_string(),
            }
            .into());
        }

        let handle = self.binding_handle(&key);
        if self
            .inner
            .bindings
            .rebind(&key, Arc::clone(&capability), element.clone())
        {
            tracing::debug!(%key, "rebound element");
            capability.update_element(&handle);
            return Ok(handle);
        }

        let cell = self
            .inner
            .store
            .ensure_cell(&key, &capability.default_for(&element))?;
        let data = self.inner.store.read_snapshot(&cell)?;
        let binding =
            ElementBinding::new(key.clone(), element, Arc::clone(&capability), cell, data);
        if !self.inner.bindings.insert(binding) {
            // Bound concurrently; the other call mounted it.
            return Ok(handle);
        }
        self.inner.observer.observe(&self.inner.store, &key);
        tracing::debug!(%key, "bound element");

        capability.on_mount(&handle);
        capability.update_element(&handle);
        self.inner.awareness.refresh_binding(self, &key);
        Ok(handle)
    }

    /// Bind every element of `elements` to `tag`.
    ///
    /// Elements that fail to bind are logged and skipped.
    pub fn bind_all(
        &self,
        tag: &str,
        elements: impl IntoIterator<Item = ElementInfo>,
    ) -> Vec<BindingHandle> {
        elements
            .into_iter()
            .filter_map(|element| match self.bind(element, tag) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(tag, "skipping element: {e}");
                    None
                }
            })
            .collect()
    }

    /// Remove the binding for `key`. Its data cell is kept.
    ///
    /// Returns whether a binding existed.
    pub fn unbind(&self, key: &ElementKey) -> bool {
        let Some(capability) = self.inner.bindings.capability(key) else {
            return false;
        };
        capability.on_unmount(&self.binding_handle(key));

        self.inner.observer.unobserve(key);
        let removed = self.inner.bindings.remove(key).is_some();
        tracing::debug!(%key, "unbound element");
        removed
    }

    /// Unbind `key` and delete its data cell.
    ///
    /// Returns whether a cell existed.
    pub fn delete_element_data(&self, key: &ElementKey) -> Result<bool> {
        self.unbind(key);
        match self.inner.store.cell(key) {
            Ok(cell) => self.inner.store.remove_cell(&cell),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn binding(&self, key: &ElementKey) -> Option<BindingHandle> {
        self.inner
            .bindings
            .contains(key)
            .then(|| self.binding_handle(key))
    }

    /// Keys of every bound element, sorted.
    pub fn bound_keys(&self) -> Vec<ElementKey> {
        self.inner.bindings.keys()
    }

    /// Run every scheduled refresh. Returns how many bindings were refreshed.
    pub fn process_pending(&self) -> usize {
        self.inner.observer.flush(self)
    }

    /// Number of keys with a scheduled refresh.
    pub fn pending_refreshes(&self) -> usize {
        self.inner.observer.pending()
    }

    /// Resolves once a refresh is scheduled.
    pub async fn wait_for_pending(&self) {
        self.inner.observer.wait_for_pending().await
    }

    /// Number of snapshot refreshes performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.observer.refresh_count()
    }

    /// Whether a remote refresh of `key` is being applied right now.
    pub fn is_remote_applying(&self, key: &ElementKey) -> bool {
        self.inner.observer.is_remote_applying(key)
    }

    /// Rebuild every binding's awareness after a presence change.
    pub fn on_presence_change(&self, change: &PresenceChange) -> AwarenessUpdate {
        self.inner.awareness.on_presence_change(self, change)
    }

    /// Feed presence changes from `changes` into the engine until the channel closes.
    ///
    /// Holds only a weak reference between changes, so it also stops once every other
    /// handle to the engine is dropped.
    pub async fn run_presence(self, mut changes: broadcast::Receiver<PresenceChange>) {
        let weak = self.downgrade();
        drop(self);
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "presence receiver lagged, recomputing");
                    PresenceChange::default()
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(engine) = weak.upgrade() else {
                break;
            };
            engine.on_presence_change(&change);
        }
    }

    /// Run the one-time legacy migration against `legacy`.
    pub fn run_migration(&self, legacy: &dyn LegacyStore) -> Result<MigrationReport> {
        MigrationCoordinator::new(&self.inner.store, &self.inner.config.migration_marker)
            .run_once(legacy)
    }

    /// The legacy layout of this engine's document.
    pub fn legacy_store(&self) -> YrsLegacyStore {
        YrsLegacyStore::new(self.inner.store.doc(), &self.inner.config.legacy_root)
    }

    /// Add a permission check consulted before every binding write.
    pub fn add_write_guard(&self, guard: impl WriteGuard + 'static) {
        self.inner.hooks.write().unwrap().add_guard(Arc::new(guard));
    }

    /// Add a listener told about every applied binding write.
    pub fn add_mutation_listener(&self, listener: impl MutationListener + 'static) {
        self.inner
            .hooks
            .write()
            .unwrap()
            .add_listener(Arc::new(listener));
    }

    /// Report that a validation service rejected a write it was told about.
    ///
    /// Local writes are applied optimistically and stay applied; the rejection is
    /// logged and counted.
    pub fn record_rejected_write(&self, key: &ElementKey, reason: &str) {
        self.inner.rejected_writes.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%key, reason, "write rejected after local apply; keeping local state");
    }

    pub fn rejected_write_count(&self) -> u64 {
        self.inner.rejected_writes.load(Ordering::Relaxed)
    }

    /// Apply a write from a binding handle.
    pub(crate) fn write<F>(&self, key: &ElementKey, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut CellMut) -> Result<()>,
    {
        let cell = self
            .inner
            .bindings
            .with(key, |binding| binding.cell.clone())
            .ok_or_else(|| BindingError::NotBound {
                key: key.to_string(),
            })?;

        let source = if self.is_remote_applying(key) {
            WriteSource::Remote
        } else {
            WriteSource::Local
        };
        let context = WriteContext {
            key: key.clone(),
            source,
        };
        if !self.inner.hooks.read().unwrap().permits(&context) {
            tracing::warn!(%key, ?source, "write denied by write guard");
            return Ok(());
        }

        let change = self.inner.store.mutate(&cell, mutator)?;
        if change.is_empty() {
            return Ok(());
        }

        self.refresh_local(key);

        let event = MutationEvent {
            key: key.clone(),
            change,
            source,
        };
        let hooks = self.inner.hooks.read().unwrap();
        if hooks.listener_count() > 0 {
            hooks.notify(&event);
        }
        Ok(())
    }

    /// Reflect a local write in the binding right away.
    fn refresh_local(&self, key: &ElementKey) {
        let snapshot = self
            .inner
            .bindings
            .with(key, |binding| binding.cell.clone())
            .and_then(|cell| self.inner.store.read_snapshot(&cell).ok());
        let Some(snapshot) = snapshot else {
            return;
        };
        let changed = self
            .inner
            .bindings
            .with_mut(key, |binding| {
                let changed = binding.data != snapshot;
                binding.data = snapshot;
                changed
            })
            .unwrap_or(false);
        if changed {
            self.render(key);
        }
    }

    pub(crate) fn set_local_data(&self, key: &ElementKey, value: Value) -> Result<()> {
        self.inner
            .bindings
            .with_mut(key, |binding| binding.local_data = value)
            .ok_or_else(|| BindingError::NotBound {
                key: key.to_string(),
            })?;
        self.render(key);
        Ok(())
    }

    pub(crate) fn set_my_awareness(&self, key: &ElementKey, value: Value) -> Result<bool> {
        self.inner.awareness.set_my_awareness(self, key, value)
    }

    /// Invoke the element's render callback.
    pub(crate) fn render(&self, key: &ElementKey) {
        if let Some(capability) = self.inner.bindings.capability(key) {
            capability.update_element(&self.binding_handle(key));
        }
    }
}

impl WeakSyncEngine {
    /// Upgrade to a strong reference, if the engine still exists.
    pub fn upgrade(&self) -> Option<SyncEngine> {
        self.inner.upgrade().map(|inner| SyncEngine { inner })
    }

    /// Whether both point at the same engine.
    pub fn ptr_eq(&self, other: &WeakSyncEngine) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}
