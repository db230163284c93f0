//! Aggregation of per-client presence into per-element views.
//!
//! Each client's presence record holds one top-level field per capability tag, an
//! object from element id to that client's payload for the element. On every presence
//! change the aggregator walks all bound elements and rebuilds their awareness lists
//! from the current records. The [`element_awareness_fingerprint`] tells callers
//! whether anything element-relevant actually changed, so they can skip their own
//! expensive work; the aggregator itself always does its bookkeeping.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use serde::Serialize;
use serde_json::{Map as JsonMap, Value};

use crate::{
    ElementKey, Result, binding::BindingError, config::EngineConfig, constants::STABLE_ID_FIELD,
    engine::SyncEngine,
};

mod fingerprint;
mod presence;

pub use fingerprint::element_awareness_fingerprint;
pub use presence::{ClientId, HubClient, PresenceChange, PresenceChannel, PresenceHub};

/// Result of handling one presence change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwarenessUpdate {
    /// Fingerprint of the element-level presence after the change
    pub fingerprint: String,
    /// Whether the fingerprint differs from the previous change's
    pub structurally_changed: bool,
    /// Number of bindings whose awareness was rebuilt
    pub bindings_updated: usize,
}

/// Awareness views of one element.
#[derive(Debug, Default, PartialEq)]
struct ElementView {
    awareness: Vec<Value>,
    by_stable_id: BTreeMap<String, Value>,
    own: Option<Value>,
}

#[derive(Default)]
pub(crate) struct AwarenessAggregator {
    last_fingerprint: Mutex<Option<String>>,
    /// Clients without an identity that have already been reported
    anonymous: Mutex<HashSet<ClientId>>,
}

impl AwarenessAggregator {
    /// Rebuild the awareness of every binding from the channel's current records.
    pub(crate) fn on_presence_change(
        &self,
        engine: &SyncEngine,
        change: &PresenceChange,
    ) -> AwarenessUpdate {
        let presence = engine.presence();
        let states = presence.states();
        let config = engine.config();

        let fingerprint = element_awareness_fingerprint(&states, &config.reserved_awareness_prefix);
        let structurally_changed = {
            let mut last = self.last_fingerprint.lock().unwrap();
            let changed = last.as_deref() != Some(fingerprint.as_str());
            *last = Some(fingerprint.clone());
            changed
        };

        let local = presence.local_client_id();
        for client in self.newly_anonymous(&states, local, config) {
            tracing::warn!(
                client,
                "client has not published an identity; left out of keyed awareness"
            );
        }

        let keys = engine.bindings().keys();
        let bindings_updated = keys
            .iter()
            .filter(|key| self.apply(engine, key, &states, local, config))
            .count();

        tracing::debug!(
            clients = change.clients().count(),
            structurally_changed,
            bindings_updated,
            "presence change aggregated"
        );
        AwarenessUpdate {
            fingerprint,
            structurally_changed,
            bindings_updated,
        }
    }

    /// Rebuild the awareness of one binding.
    pub(crate) fn refresh_binding(&self, engine: &SyncEngine, key: &ElementKey) -> bool {
        let presence = engine.presence();
        let states = presence.states();
        self.apply(engine, key, &states, presence.local_client_id(), engine.config())
    }

    fn apply(
        &self,
        engine: &SyncEngine,
        key: &ElementKey,
        states: &BTreeMap<ClientId, Value>,
        local: ClientId,
        config: &EngineConfig,
    ) -> bool {
        let view = element_view(key, states, local, config);
        let Some(capability) = engine.bindings().with_mut(key, |binding| {
            binding.awareness = view.awareness;
            binding.awareness_by_stable_id = view.by_stable_id;
            if view.own.is_some() {
                binding.self_awareness = view.own;
            }
            binding.capability.clone()
        }) else {
            return false;
        };

        capability.update_element_awareness(&engine.binding_handle(key));
        true
    }

    /// Clients lacking an identity that were not lacking one at the previous change.
    fn newly_anonymous(
        &self,
        states: &BTreeMap<ClientId, Value>,
        local: ClientId,
        config: &EngineConfig,
    ) -> Vec<ClientId> {
        if config.identity_key.is_none() {
            return Vec::new();
        }
        let current: HashSet<ClientId> = states
            .iter()
            .filter(|(client, state)| {
                **client != local && stable_id(**client, state, config).is_none()
            })
            .map(|(client, _)| *client)
            .collect();

        let mut reported = self.anonymous.lock().unwrap();
        let mut fresh: Vec<ClientId> = current.difference(&reported).copied().collect();
        fresh.sort_unstable();
        *reported = current;
        fresh
    }

    /// Publish this client's payload for `key`, unless its presence record already
    /// holds exactly that payload.
    pub(crate) fn set_my_awareness(
        &self,
        engine: &SyncEngine,
        key: &ElementKey,
        value: Value,
    ) -> Result<bool> {
        if !engine.bindings().contains(key) {
            return Err(BindingError::NotBound {
                key: key.to_string(),
            }
            .into());
        }

        let presence = engine.presence();
        let tag = key.tag.as_str();
        let mut field = presence
            .states()
            .get(&presence.local_client_id())
            .and_then(|state| state.get(tag))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(JsonMap::new);
        if field.get(key.element_id.as_str()) == Some(&value) {
            return Ok(false);
        }
        field.insert(key.element_id.to_string(), value.clone());
        presence.set_local_state_field(tag, Value::Object(field))?;

        engine
            .bindings()
            .with_mut(key, |binding| binding.self_awareness = Some(value));
        Ok(true)
    }
}

fn element_view(
    key: &ElementKey,
    states: &BTreeMap<ClientId, Value>,
    local: ClientId,
    config: &EngineConfig,
) -> ElementView {
    let mut view = ElementView::default();
    for (client, state) in states {
        let Some(payload) = state
            .get(key.tag.as_str())
            .and_then(|field| field.get(key.element_id.as_str()))
        else {
            continue;
        };

        if *client == local {
            view.own = Some(payload.clone());
            continue;
        }

        view.awareness.push(payload.clone());
        if let Some(id) = stable_id(*client, state, config) {
            view.by_stable_id.insert(id, payload.clone());
        }
    }
    view
}

/// The long-lived id of a client, or its connection id when no identity layer is used.
fn stable_id(client: ClientId, state: &Value, config: &EngineConfig) -> Option<String> {
    let Some(identity_key) = &config.identity_key else {
        return Some(client.to_string());
    };
    match state.get(identity_key)? {
        Value::String(id) => Some(id.clone()),
        Value::Object(identity) => identity
            .get(STABLE_ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
