use elemsync::{
    Capability, ElementInfo, ElementKey,
    binding::{ChannelMutationListener, WriteContext, WriteSource},
    cell::CellEdit,
};
use serde_json::json;

use crate::helpers::*;

#[test]
fn rebinding_keeps_the_cell_and_the_data() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let (element, key) = toggle("lamp");

    let first = engine.bind(element.clone(), "can-toggle").unwrap();
    first.set_data(json!({ "on": true })).unwrap();
    let transactions = engine.store().transaction_count();

    let second = engine.bind(element, "can-toggle").unwrap();
    assert_eq!(first, second);
    assert_eq!(second.data(), json!({ "on": true }));
    assert_eq!(engine.store().keys(), vec![key.clone()]);
    assert_eq!(engine.bound_keys(), vec![key]);
    assert_eq!(engine.store().transaction_count(), transactions);
}

#[test]
fn rebinding_picks_up_a_replaced_descriptor() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let (element, key) = toggle("lamp");
    engine.bind(element.clone(), "can-toggle").unwrap();

    let hot = RenderLog::default();
    engine.capabilities().register(logged(
        Capability::builder("can-toggle").default_data(json!({ "on": "reloaded" })),
        &hot,
    ));
    let handle = engine.bind(element, "can-toggle").unwrap();
    assert_eq!(hot.renders(&key), 1);

    handle.set_data(json!({ "on": true })).unwrap();
    assert_eq!(hot.last_render(&key), Some(json!({ "on": true })));

    // The new default applies from now on, the data is untouched until reset.
    handle.reset().unwrap();
    assert_eq!(handle.data(), json!({ "on": "reloaded" }));
}

#[test]
fn set_data_and_mutators_agree() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;

    let lamp = engine.bind(ElementInfo::with_id("lamp"), "can-toggle").unwrap();
    lamp.set_data(json!({ "on": true })).unwrap();
    assert_eq!(lamp.data(), json!({ "on": true }));

    let pushed = engine.bind(ElementInfo::with_id("pushed"), "can-draw").unwrap();
    pushed
        .update_data(|cell| {
            cell.push("", "x")?;
            cell.push("", "y")
        })
        .unwrap();
    let replaced = engine.bind(ElementInfo::with_id("replaced"), "can-draw").unwrap();
    replaced.set_data(json!(["x", "y"])).unwrap();

    assert_eq!(pushed.data(), json!(["x", "y"]));
    assert_eq!(pushed.data(), replaced.data());
}

#[test]
fn unsupported_array_edits_fail_loudly() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let strokes = engine.bind(ElementInfo::with_id("pad"), "can-draw").unwrap();
    strokes.set_data(json!(["a", "b"])).unwrap();
    let mutations = engine.store().mutation_count();

    let err = strokes.update_data(|cell| cell.set("0", "z")).unwrap_err();
    assert!(err.is_unsupported_operation());

    let err = strokes
        .update_data(|cell| cell.shift("").map(|_| ()))
        .unwrap_err();
    assert!(err.is_unsupported_operation());

    let err = strokes
        .update_data(|cell| cell.pop("").map(|_| ()))
        .unwrap_err();
    assert!(err.is_unsupported_operation());

    assert_eq!(strokes.data(), json!(["a", "b"]));
    assert_eq!(engine.store().mutation_count(), mutations);
}

#[test]
fn denied_writes_are_silent_no_ops() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let (element, key) = toggle("lamp");
    let lamp = engine.bind(element, "can-toggle").unwrap();
    engine.add_write_guard(|context: &WriteContext| context.source == WriteSource::Remote);
    let mutations = engine.store().mutation_count();

    lamp.set_data(json!({ "on": true })).unwrap();
    lamp.reset().unwrap();

    assert_eq!(lamp.data(), json!({ "on": false }));
    assert_eq!(engine.store().mutation_count(), mutations);
    assert!(!engine.is_remote_applying(&key));
}

#[test]
fn reset_restores_the_element_default() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let slider = engine
        .bind(
            ElementInfo::with_id("slider")
                .attribute("draggable", "")
                .attribute("x", "40"),
            "can-move",
        )
        .unwrap();
    assert_eq!(slider.data(), json!({ "x": 40 }));

    slider.update_data(|cell| cell.set("x", 90)).unwrap();
    slider.reset().unwrap();
    assert_eq!(slider.data(), json!({ "x": 40 }));
}

#[test]
fn listeners_hear_about_applied_writes() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let (listener, mut rx) = ChannelMutationListener::channel(1);
    engine.add_mutation_listener(listener);
    let (element, key) = toggle("lamp");
    let lamp = engine.bind(element, "can-toggle").unwrap();

    lamp.update_data(|cell| cell.set("on", true)).unwrap();
    let event = rx.try_recv().unwrap();
    assert_eq!(event.key, key);
    assert_eq!(event.source, WriteSource::Local);
    assert!(matches!(&event.change[0], CellEdit::Set { value, .. } if *value == json!(true)));

    // Writing the same value again changes nothing and says nothing.
    lamp.set_data(json!({ "on": true })).unwrap();
    assert!(rx.try_recv().is_err());

    // A full channel loses the event but not the write.
    lamp.set_data(json!({ "on": false })).unwrap();
    lamp.set_data(json!({ "on": true })).unwrap();
    assert_eq!(lamp.data(), json!({ "on": true }));
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[test]
fn rejected_writes_are_kept_and_counted() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;
    let (element, key) = toggle("lamp");
    let lamp = engine.bind(element, "can-toggle").unwrap();
    lamp.set_data(json!({ "on": true })).unwrap();

    engine.record_rejected_write(&key, "not allowed");
    assert_eq!(engine.rejected_write_count(), 1);
    assert_eq!(lamp.data(), json!({ "on": true }));
}

#[test]
fn registration_errors_skip_only_that_element() {
    let (_hub, peer, _) = pair();
    let engine = &peer.engine;

    assert!(
        engine
            .bind(ElementInfo::with_id("x"), "can-fly")
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        engine
            .bind(ElementInfo::default(), "can-toggle")
            .unwrap_err()
            .is_registration_error()
    );
    assert!(
        engine
            .bind(ElementInfo::with_id("stuck"), "can-move")
            .unwrap_err()
            .is_registration_error()
    );

    let bound = engine.bind_all(
        "can-toggle",
        [
            ElementInfo::with_id("a"),
            ElementInfo::with_id(" "),
            ElementInfo::from_content("<button>b</button>"),
            ElementInfo::default(),
        ],
    );
    assert_eq!(bound.len(), 2);
    assert_eq!(engine.bound_keys().len(), 2);
    assert!(engine.store().keys().contains(&ElementKey::new("can-toggle", "a")));
}

#[test]
fn content_derived_ids_match_across_peers() {
    let (_hub, a, b) = pair();
    let markup = ElementInfo::from_content("<div can-toggle>lamp</div>");

    let on_a = a.engine.bind(markup.clone(), "can-toggle").unwrap();
    let on_b = b.engine.bind(markup, "can-toggle").unwrap();
    assert_eq!(on_a.key(), on_b.key());
}

#[test]
fn local_data_stays_local() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    let on_a = a.engine.bind(element.clone(), "can-toggle").unwrap();
    let on_b = b.engine.bind(element, "can-toggle").unwrap();

    on_a.set_local_data(json!({ "hover": true })).unwrap();
    assert_eq!(on_a.local_data(), json!({ "hover": true }));
    assert_eq!(a.log.renders(&key), 2);

    sync(&a, &b);
    b.engine.process_pending();
    assert_eq!(on_b.local_data(), serde_json::Value::Null);
    assert_eq!(a.engine.store().snapshot_all()["can-toggle"]["lamp"], json!({ "on": false }));
}
