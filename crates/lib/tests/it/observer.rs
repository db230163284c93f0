use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use elemsync::{
    ElementInfo, ElementKey,
    binding::{WriteContext, WriteSource},
};
use serde_json::json;

use crate::helpers::*;

/// Binds `element` on `a`, ships the new cell to `b` and binds it there too.
fn bind_both(a: &Peer, b: &Peer, element: ElementInfo, tag: &str) {
    a.engine.bind(element.clone(), tag).unwrap();
    deliver(a, b);
    b.engine.bind(element, tag).unwrap();
}

#[test]
fn remote_writes_reach_the_binding() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    bind_both(&a, &b, element, "can-toggle");
    let lamp_a = a.engine.binding(&key).unwrap();
    let lamp_b = b.engine.binding(&key).unwrap();
    assert_eq!(b.log.renders(&key), 1);

    lamp_a.set_data(json!({ "on": true })).unwrap();
    deliver(&a, &b);

    // Nothing happens until the host drains the queue.
    assert_eq!(lamp_b.data(), json!({ "on": false }));
    assert_eq!(b.engine.pending_refreshes(), 1);

    assert_eq!(b.engine.process_pending(), 1);
    assert_eq!(lamp_b.data(), json!({ "on": true }));
    assert_eq!(b.log.renders(&key), 2);
    assert_eq!(b.log.last_render(&key), Some(json!({ "on": true })));
}

#[test]
fn cells_of_one_tag_created_on_both_peers_before_syncing_survive() {
    let (_hub, a, b) = pair();
    let (lamp, lamp_key) = toggle("lamp");
    let (fan, fan_key) = toggle("fan");

    a.engine.bind(lamp, "can-toggle").unwrap();
    b.engine.bind(fan, "can-toggle").unwrap();
    a.engine
        .binding(&lamp_key)
        .unwrap()
        .set_data(json!({ "on": true }))
        .unwrap();
    b.engine
        .binding(&fan_key)
        .unwrap()
        .set_data(json!({ "on": true }))
        .unwrap();

    sync(&a, &b);
    a.engine.process_pending();
    b.engine.process_pending();

    let expected = json!({ "can-toggle": { "fan": { "on": true }, "lamp": { "on": true } } });
    assert_eq!(a.engine.store().snapshot_all(), expected);
    assert_eq!(b.engine.store().snapshot_all(), expected);
    assert_eq!(
        b.engine.binding(&fan_key).unwrap().data(),
        json!({ "on": true })
    );
    assert_eq!(
        a.engine.binding(&lamp_key).unwrap().data(),
        json!({ "on": true })
    );
}

#[test]
fn refreshes_do_not_echo_back_as_writes() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    bind_both(&a, &b, element, "can-toggle");
    let mutations = b.engine.store().mutation_count();
    let transactions = b.engine.store().transaction_count();

    a.engine
        .binding(&key)
        .unwrap()
        .set_data(json!({ "on": true }))
        .unwrap();
    deliver(&a, &b);
    b.engine.process_pending();

    assert_eq!(b.engine.store().mutation_count(), mutations);
    assert_eq!(b.engine.store().transaction_count(), transactions);

    // And nothing flows back to `a`.
    let update = b
        .engine
        .store()
        .encode_state_as_update(Some(&a.engine.store().state_vector()))
        .unwrap();
    let before = a.engine.refresh_count();
    a.engine.store().apply_remote_update(&update).unwrap();
    a.engine.process_pending();
    assert_eq!(a.engine.binding(&key).unwrap().data(), json!({ "on": true }));
    assert!(a.engine.refresh_count() <= before + 1);
    assert_eq!(a.log.renders(&key), 2);
}

#[test]
fn bursts_collapse_into_one_refresh() {
    let (_hub, a, b) = pair();
    bind_both(&a, &b, ElementInfo::with_id("pad"), "can-draw");
    let key = ElementKey::new("can-draw", "pad");
    let strokes = a.engine.binding(&key).unwrap();
    let before = b.engine.refresh_count();

    for stroke in ["a", "b", "c"] {
        strokes.update_data(|cell| cell.push("", stroke)).unwrap();
        deliver(&a, &b);
    }

    assert_eq!(b.engine.pending_refreshes(), 1);
    assert_eq!(b.engine.process_pending(), 1);
    assert_eq!(b.engine.refresh_count(), before + 1);
    assert_eq!(
        b.engine.binding(&key).unwrap().data(),
        json!(["a", "b", "c"])
    );
    assert_eq!(b.log.renders(&key), 2);
}

#[test]
fn writes_from_a_remote_render_are_tagged_remote() {
    let (_hub, a, b) = pair();
    let key = ElementKey::new("can-echo", "ping");
    bind_both(&a, &b, ElementInfo::with_id("ping"), "can-echo");

    let sources = Arc::new(Mutex::new(Vec::new()));
    let seen = sources.clone();
    b.engine.add_write_guard(move |context: &WriteContext| {
        seen.lock().unwrap().push(context.source);
        true
    });

    // Written straight into `a`'s store, so `a` renders nothing and does not answer.
    let cell = a.engine.store().cell(&key).unwrap();
    a.engine
        .store()
        .replace(&cell, &json!({ "ack": false }))
        .unwrap();
    deliver(&a, &b);

    assert_eq!(b.engine.process_pending(), 1);
    assert_eq!(*sources.lock().unwrap(), vec![WriteSource::Remote]);
    assert!(!b.engine.is_remote_applying(&key));
    assert_eq!(
        b.engine.binding(&key).unwrap().data(),
        json!({ "ack": true })
    );

    // The acknowledgement itself touched the cell; draining again changes nothing.
    b.engine.process_pending();
    assert_eq!(sources.lock().unwrap().len(), 1);

    deliver(&b, &a);
    a.engine.process_pending();
    assert_eq!(
        a.engine.store().read_snapshot(&cell).unwrap(),
        json!({ "ack": true })
    );
}

#[test]
fn unbound_elements_are_not_refreshed() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    bind_both(&a, &b, element, "can-toggle");

    a.engine
        .binding(&key)
        .unwrap()
        .set_data(json!({ "on": true }))
        .unwrap();
    deliver(&a, &b);
    assert!(b.engine.unbind(&key));

    assert_eq!(b.engine.pending_refreshes(), 0);
    assert_eq!(b.engine.process_pending(), 0);
    assert_eq!(b.log.renders(&key), 1);

    // The cell itself still converged.
    let cell = b.engine.store().cell(&key).unwrap();
    assert_eq!(
        b.engine.store().read_snapshot(&cell).unwrap(),
        json!({ "on": true })
    );
}

#[test]
fn remotely_deleted_cells_come_back_as_default() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    bind_both(&a, &b, element, "can-toggle");

    a.engine
        .binding(&key)
        .unwrap()
        .set_data(json!({ "on": true }))
        .unwrap();
    deliver(&a, &b);
    b.engine.process_pending();

    assert!(a.engine.delete_element_data(&key).unwrap());
    assert!(!a.engine.store().contains(&key));
    deliver(&a, &b);

    assert_eq!(b.engine.process_pending(), 1);
    assert!(b.engine.store().contains(&key));
    assert_eq!(
        b.engine.binding(&key).unwrap().data(),
        json!({ "on": false })
    );
}

#[tokio::test]
async fn waiting_for_pending_refreshes() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    bind_both(&a, &b, element, "can-toggle");

    let idle = tokio::time::timeout(Duration::from_millis(20), b.engine.wait_for_pending()).await;
    assert!(idle.is_err());

    a.engine
        .binding(&key)
        .unwrap()
        .set_data(json!({ "on": true }))
        .unwrap();
    deliver(&a, &b);

    tokio::time::timeout(Duration::from_secs(1), b.engine.wait_for_pending())
        .await
        .expect("refresh was scheduled");
    assert_eq!(b.engine.process_pending(), 1);
}
