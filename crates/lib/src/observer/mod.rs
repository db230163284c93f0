//! Bridge from data cell changes back into bindings.
//!
//! One deep observer is attached per bound cell. A notification only marks the key
//! dirty; the refresh itself runs later, when the host drains the queue with
//! [`SyncEngine::process_pending`]. Any number of notifications for a key before that
//! point collapse into one refresh, which reads whatever the cell holds at that time.
//!
//! Refreshed data is written into the binding directly, never through the binding's
//! write path, so a remote change cannot echo back out as a local write. While a
//! refresh is being applied the key is marked remote-applying.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::Notify;
use yrs::Subscription;

use crate::{ElementKey, cell::DataCellStore, engine::SyncEngine};

/// Keys with a scheduled refresh, in scheduling order.
#[derive(Default)]
struct RefreshQueue {
    scheduled: HashSet<ElementKey>,
    order: VecDeque<ElementKey>,
}

impl RefreshQueue {
    fn schedule(&mut self, key: &ElementKey) -> bool {
        if !self.scheduled.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key.clone());
        true
    }

    fn cancel(&mut self, key: &ElementKey) {
        if self.scheduled.remove(key) {
            self.order.retain(|queued| queued != key);
        }
    }

    fn take(&mut self) -> Vec<ElementKey> {
        self.scheduled.clear();
        self.order.drain(..).collect()
    }
}

#[derive(Default)]
pub(crate) struct ObserverBridge {
    queue: Arc<Mutex<RefreshQueue>>,
    notify: Arc<Notify>,
    subscriptions: Mutex<HashMap<ElementKey, Subscription>>,
    applying: Mutex<HashSet<ElementKey>>,
    refreshes: AtomicU64,
}

impl ObserverBridge {
    /// Start observing the cell for `key`. Observing twice keeps one observer.
    pub(crate) fn observe(&self, store: &DataCellStore, key: &ElementKey) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions.contains_key(key) {
            return;
        }

        let queue = Arc::clone(&self.queue);
        let notify = Arc::clone(&self.notify);
        let scheduled_key = key.clone();
        let subscription = store.observe_cell(key, move || {
            if queue.lock().unwrap().schedule(&scheduled_key) {
                tracing::debug!(key = %scheduled_key, "scheduled refresh");
                notify.notify_one();
            }
        });
        subscriptions.insert(key.clone(), subscription);
    }

    /// Detach the observer for `key` and drop any refresh scheduled for it.
    pub(crate) fn unobserve(&self, key: &ElementKey) -> bool {
        let removed = self.subscriptions.lock().unwrap().remove(key).is_some();
        self.queue.lock().unwrap().cancel(key);
        removed
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().unwrap().order.len()
    }

    /// Resolves once at least one refresh is scheduled.
    pub(crate) async fn wait_for_pending(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending() > 0 {
                return;
            }
            notified.await;
        }
    }

    /// Run every scheduled refresh. Returns how many bindings were refreshed.
    ///
    /// Keys scheduled while this runs are left for the next call.
    pub(crate) fn flush(&self, engine: &SyncEngine) -> usize {
        let keys = self.queue.lock().unwrap().take();
        keys.iter()
            .filter(|key| self.refresh(engine, key))
            .count()
    }

    /// Re-read one cell into its binding.
    fn refresh(&self, engine: &SyncEngine, key: &ElementKey) -> bool {
        let Some((cell, capability, element)) = engine.bindings().with(key, |binding| {
            (
                binding.cell.clone(),
                binding.capability.clone(),
                binding.element.clone(),
            )
        }) else {
            return false;
        };

        let store = engine.store();
        let snapshot = match store.read_snapshot(&cell) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                // A bound element always has a cell; recreate it from the default.
                tracing::info!(%key, "data cell removed remotely, recreating");
                let default = capability.default_for(&element);
                match store.ensure_cell(key, &default) {
                    Ok(_) => default,
                    Err(e) => {
                        tracing::error!(%key, "failed to recreate data cell: {e}");
                        return false;
                    }
                }
            }
            Err(e) => {
                tracing::error!(%key, "failed to read data cell: {e}");
                return false;
            }
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        let _applying = self.begin_remote_apply(key);
        let changed = engine
            .bindings()
            .with_mut(key, |binding| {
                if binding.data == snapshot {
                    return false;
                }
                binding.data = snapshot;
                true
            })
            .unwrap_or(false);

        if changed {
            tracing::debug!(%key, "applied remote refresh");
            engine.render(key);
        }
        true
    }

    /// Number of snapshot refreshes performed so far.
    pub(crate) fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub(crate) fn is_remote_applying(&self, key: &ElementKey) -> bool {
        self.applying.lock().unwrap().contains(key)
    }

    /// Mark `key` remote-applying until the guard drops.
    fn begin_remote_apply(&self, key: &ElementKey) -> RemoteApplyGuard<'_> {
        let inserted = self.applying.lock().unwrap().insert(key.clone());
        RemoteApplyGuard {
            applying: &self.applying,
            key: inserted.then(|| key.clone()),
        }
    }
}

/// Clears a remote-applying marker on drop.
struct RemoteApplyGuard<'a> {
    applying: &'a Mutex<HashSet<ElementKey>>,
    /// `None` when an outer guard owns the marker
    key: Option<ElementKey>,
}

impl Drop for RemoteApplyGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = &self.key {
            self.applying.lock().unwrap().remove(key);
        }
    }
}
