//! Presence channel abstraction and an in-process implementation.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use tokio::sync::broadcast;

use crate::Result;

/// Transport-level, session-scoped client identifier.
pub type ClientId = u64;

/// Which clients' presence records changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
}

impl PresenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Every client mentioned by the change.
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.added
            .iter()
            .chain(&self.updated)
            .chain(&self.removed)
            .copied()
    }
}

/// Ephemeral per-client state shared between connected clients.
pub trait PresenceChannel: Send + Sync {
    /// This client's id.
    fn local_client_id(&self) -> ClientId;

    /// Current record of every connected client, including this one.
    fn states(&self) -> BTreeMap<ClientId, Value>;

    /// Set one top-level field of this client's record.
    fn set_local_state_field(&self, field: &str, value: Value) -> Result<()>;
}

/// In-process presence channel shared by several clients.
///
/// Changes are fanned out to every subscriber over a broadcast channel. Useful for
/// hosts that run several engines in one process and for tests.
pub struct PresenceHub {
    states: Mutex<BTreeMap<ClientId, JsonMap<String, Value>>>,
    tx: broadcast::Sender<PresenceChange>,
}

impl PresenceHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self {
            states: Mutex::new(BTreeMap::new()),
            tx,
        })
    }

    /// Receive every change made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.tx.subscribe()
    }

    /// The presence channel of one client.
    pub fn client(self: &Arc<Self>, id: ClientId) -> Arc<HubClient> {
        Arc::new(HubClient {
            hub: Arc::clone(self),
            id,
        })
    }

    /// Set one field of `client`'s record. Returns the change, empty if nothing changed.
    pub fn set_state_field(&self, client: ClientId, field: &str, value: Value) -> PresenceChange {
        let mut change = PresenceChange::default();
        {
            let mut states = self.states.lock().unwrap();
            match states.get_mut(&client) {
                Some(state) => {
                    if state.get(field) == Some(&value) {
                        return change;
                    }
                    state.insert(field.to_string(), value);
                    change.updated.push(client);
                }
                None => {
                    states.insert(client, JsonMap::from_iter([(field.to_string(), value)]));
                    change.added.push(client);
                }
            }
        }
        self.publish(&change);
        change
    }

    /// Drop `client`'s record, as when its connection closes.
    pub fn disconnect(&self, client: ClientId) -> PresenceChange {
        let mut change = PresenceChange::default();
        if self.states.lock().unwrap().remove(&client).is_some() {
            change.removed.push(client);
            self.publish(&change);
        }
        change
    }

    pub fn states(&self) -> BTreeMap<ClientId, Value> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .map(|(client, state)| (*client, Value::Object(state.clone())))
            .collect()
    }

    fn publish(&self, change: &PresenceChange) {
        // No subscribers is fine; changes are still visible through `states`.
        if self.tx.send(change.clone()).is_err() {
            tracing::debug!(?change, "presence change had no subscribers");
        }
    }
}

impl std::fmt::Debug for PresenceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceHub")
            .field("clients", &self.states.lock().unwrap().len())
            .finish()
    }
}

/// One client's view of a [`PresenceHub`].
#[derive(Debug)]
pub struct HubClient {
    hub: Arc<PresenceHub>,
    id: ClientId,
}

impl HubClient {
    pub fn hub(&self) -> &Arc<PresenceHub> {
        &self.hub
    }

    /// Leave the hub, clearing this client's record.
    pub fn disconnect(&self) -> PresenceChange {
        self.hub.disconnect(self.id)
    }
}

impl PresenceChannel for HubClient {
    fn local_client_id(&self) -> ClientId {
        self.id
    }

    fn states(&self) -> BTreeMap<ClientId, Value> {
        self.hub.states()
    }

    fn set_local_state_field(&self, field: &str, value: Value) -> Result<()> {
        self.hub.set_state_field(self.id, field, value);
        Ok(())
    }
}
