use std::time::Duration;

use elemsync::{
    ElementInfo, ElementKey, EngineConfig,
    awareness::{PresenceChange, PresenceHub},
};
use serde_json::json;

use crate::helpers::*;

fn mover() -> (ElementInfo, ElementKey) {
    (
        ElementInfo::with_id("box").attribute("draggable", ""),
        ElementKey::new("can-move", "box"),
    )
}

/// Three peers with `box` bound everywhere.
fn trio() -> (std::sync::Arc<PresenceHub>, [Peer; 3]) {
    let hub = PresenceHub::new(64);
    let peers = [Peer::new(&hub, 1), Peer::new(&hub, 2), Peer::new(&hub, 3)];
    let (element, _) = mover();
    for peer in &peers {
        peer.engine.bind(element.clone(), "can-move").unwrap();
    }
    (hub, peers)
}

#[test]
fn awareness_collects_other_clients_in_client_order() {
    let (_hub, [a, b, c]) = trio();
    let (_, key) = mover();

    c.engine
        .binding(&key)
        .unwrap()
        .set_my_awareness(json!({ "dragging": "three" }))
        .unwrap();
    b.engine
        .binding(&key)
        .unwrap()
        .set_my_awareness(json!({ "dragging": "two" }))
        .unwrap();
    let mine = a.engine.binding(&key).unwrap();
    assert!(mine.set_my_awareness(json!({ "dragging": "one" })).unwrap());

    let update = a.engine.on_presence_change(&PresenceChange::default());
    assert_eq!(update.bindings_updated, 1);

    assert_eq!(
        mine.awareness(),
        vec![json!({ "dragging": "two" }), json!({ "dragging": "three" })]
    );
    assert_eq!(mine.self_awareness(), Some(json!({ "dragging": "one" })));
    let keyed = mine.awareness_by_stable_id();
    assert_eq!(keyed.keys().collect::<Vec<_>>(), vec!["2", "3"]);
    assert_eq!(keyed["3"], json!({ "dragging": "three" }));
}

#[test]
fn republishing_the_same_payload_is_a_no_op() {
    let (hub, [a, _b, _c]) = trio();
    let (_, key) = mover();
    let mine = a.engine.binding(&key).unwrap();
    let mut changes = hub.subscribe();

    assert!(mine.set_my_awareness(json!({ "x": 1 })).unwrap());
    assert!(changes.try_recv().is_ok());

    assert!(!mine.set_my_awareness(json!({ "x": 1 })).unwrap());
    assert!(changes.try_recv().is_err());
}

#[test]
fn payloads_are_republished_after_the_record_is_cleared() {
    let (hub, [a, _b, _c]) = trio();
    let (_, key) = mover();
    let mine = a.engine.binding(&key).unwrap();
    assert!(mine.set_my_awareness(json!({ "x": 1 })).unwrap());

    a.presence.disconnect();
    let mut changes = hub.subscribe();
    assert!(mine.set_my_awareness(json!({ "x": 1 })).unwrap());
    assert_eq!(changes.try_recv().unwrap().added, vec![1]);
    assert_eq!(hub.states()[&1]["can-move"]["box"], json!({ "x": 1 }));
}

#[test]
fn other_elements_keep_their_payloads() {
    let (_hub, [a, b, _c]) = trio();
    let (_, key) = mover();
    let other = ElementKey::new("can-move", "crate");
    a.engine
        .bind(ElementInfo::with_id("crate").attribute("draggable", ""), "can-move")
        .unwrap();

    a.engine.binding(&key).unwrap().set_my_awareness("box").unwrap();
    a.engine.binding(&other).unwrap().set_my_awareness("crate").unwrap();

    assert_eq!(
        a.presence.hub().states()[&1],
        json!({ "can-move": { "box": "box", "crate": "crate" } })
    );
    b.engine.on_presence_change(&PresenceChange::default());
    assert_eq!(b.engine.binding(&key).unwrap().awareness(), vec![json!("box")]);
}

#[test]
fn fingerprint_ignores_reserved_fields() {
    let (hub, [a, b, _c]) = trio();
    let (_, key) = mover();

    b.engine.binding(&key).unwrap().set_my_awareness("here").unwrap();
    let first = a.engine.on_presence_change(&PresenceChange::default());
    assert!(first.structurally_changed);

    let cursor = hub.set_state_field(2, "__cursor", json!([10, 20]));
    let second = a.engine.on_presence_change(&cursor);
    assert!(!second.structurally_changed);
    assert_eq!(second.fingerprint, first.fingerprint);
    // Bookkeeping still ran.
    assert_eq!(second.bindings_updated, 1);

    hub.set_state_field(3, "can-move", json!({ "box": "also here" }));
    let third = a.engine.on_presence_change(&PresenceChange::default());
    assert!(third.structurally_changed);
    assert_eq!(a.engine.binding(&key).unwrap().awareness().len(), 2);
}

#[test]
fn identity_layer_keys_by_stable_id() {
    let hub = PresenceHub::new(16);
    let config = EngineConfig {
        identity_key: Some("__identity".to_string()),
        ..Default::default()
    };
    let a = Peer::with_config(&hub, 1, config);
    let (element, key) = mover();
    let mine = a.engine.bind(element, "can-move").unwrap();

    hub.set_state_field(2, "__identity", json!({ "stableId": "bob", "name": "Bob" }));
    hub.set_state_field(2, "can-move", json!({ "box": "bob's" }));
    hub.set_state_field(3, "can-move", json!({ "box": "anonymous" }));
    a.engine.on_presence_change(&PresenceChange::default());

    // Unidentified clients still show up, just not keyed.
    assert_eq!(mine.awareness().len(), 2);
    let keyed = mine.awareness_by_stable_id();
    assert_eq!(keyed.len(), 1);
    assert_eq!(keyed["bob"], json!("bob's"));
}

#[test]
fn disconnected_clients_drop_out() {
    let (_hub, [a, b, _c]) = trio();
    let (_, key) = mover();
    b.engine.binding(&key).unwrap().set_my_awareness("here").unwrap();
    a.engine.on_presence_change(&PresenceChange::default());
    assert_eq!(a.engine.binding(&key).unwrap().awareness().len(), 1);

    let change = b.presence.disconnect();
    assert_eq!(change.removed, vec![2]);
    let update = a.engine.on_presence_change(&change);
    assert!(update.structurally_changed);
    assert!(a.engine.binding(&key).unwrap().awareness().is_empty());
}

#[test]
fn awareness_callbacks_run_per_change() {
    let (_hub, [a, b, _c]) = trio();
    let (_, key) = mover();
    // Binding renders awareness once.
    assert_eq!(a.log.awareness_renders(&key), 1);

    b.engine.binding(&key).unwrap().set_my_awareness("here").unwrap();
    a.engine.on_presence_change(&PresenceChange::default());
    a.engine.on_presence_change(&PresenceChange::default());
    assert_eq!(a.log.awareness_renders(&key), 3);
}

#[tokio::test]
async fn presence_changes_drive_the_engine() {
    let (hub, [a, b, _c]) = trio();
    let (_, key) = mover();
    let changes = hub.subscribe();

    b.engine.binding(&key).unwrap().set_my_awareness("first").unwrap();
    b.engine.binding(&key).unwrap().set_my_awareness("second").unwrap();

    // Runs until the buffered changes are drained, then waits for more.
    let run = tokio::time::timeout(
        Duration::from_millis(50),
        a.engine.clone().run_presence(changes),
    )
    .await;
    assert!(run.is_err());
    assert_eq!(
        a.engine.binding(&key).unwrap().awareness(),
        vec![json!("second")]
    );
}

#[tokio::test]
async fn presence_loop_stops_with_the_engine() {
    let (hub, [a, _b, _c]) = trio();
    let changes = hub.subscribe();
    hub.set_state_field(9, "can-move", json!({ "box": "late" }));

    let engine = a.engine.clone();
    drop(a);
    let run = tokio::time::timeout(Duration::from_secs(1), engine.run_presence(changes)).await;
    assert!(run.is_ok());
}
