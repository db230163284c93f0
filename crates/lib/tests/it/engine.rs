use std::io::Write;

use elemsync::{
    ElementKey, EngineConfig,
    awareness::PresenceHub,
    y_crdt::{Doc, GetString, Map, Text, Transact},
};
use serde_json::json;

use crate::helpers::*;

#[test]
fn engines_for_different_documents_are_independent() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");

    let lamp = a.engine.bind(element, "can-toggle").unwrap();
    lamp.set_data(json!({ "on": true })).unwrap();

    assert!(b.engine.bound_keys().is_empty());
    assert!(!b.engine.store().contains(&key));
    assert!(b.engine.binding(&key).is_none());
    assert_eq!(b.engine.pending_refreshes(), 0);
}

#[test]
fn deleting_element_data_unbinds_and_removes_the_cell() {
    let (_hub, a, b) = pair();
    let (element, key) = toggle("lamp");
    a.engine.bind(element, "can-toggle").unwrap();
    deliver(&a, &b);

    assert!(a.engine.delete_element_data(&key).unwrap());
    assert!(a.engine.binding(&key).is_none());
    assert!(!a.engine.store().contains(&key));
    assert!(!a.engine.delete_element_data(&key).unwrap());

    deliver(&a, &b);
    assert!(!b.engine.store().contains(&key));
    assert!(b.engine.store().keys().is_empty());
}

#[test]
fn unknown_keys_are_reported() {
    let (_hub, a, _b) = pair();
    let ghost = ElementKey::new("can-toggle", "ghost");

    assert!(!a.engine.unbind(&ghost));
    assert!(a.engine.store().cell(&ghost).unwrap_err().is_not_found());
}

#[test]
fn config_file_relocates_the_cell_tree() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "cells_root": "elements", "legacy_root": "old-play" }}"#
    )
    .unwrap();
    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.cells_root, "elements");
    assert_eq!(config.migration_marker, "__cells_migrated");

    let hub = PresenceHub::new(8);
    let doc = Doc::new();
    let peer = Peer::with_doc(&hub, 1, config, doc.clone());
    let (element, _) = toggle("lamp");
    peer.engine.bind(element, "can-toggle").unwrap();

    // The host's own content in the same document is untouched.
    let notes = doc.get_or_insert_text("notes");
    notes.insert(&mut doc.transact_mut(), 0, "hello");

    let elements = doc.get_or_insert_map("elements");
    let txn = doc.transact();
    assert_eq!(elements.len(&txn), 1);
    assert_eq!(notes.get_string(&txn), "hello");
}

#[test]
fn bad_config_files_fail_to_load() {
    let missing = EngineConfig::load("/nonexistent/elemsync.json").unwrap_err();
    assert_eq!(missing.module(), "config");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "identity_key": "name" }}"#).unwrap();
    let invalid = EngineConfig::load(file.path()).unwrap_err();
    assert!(matches!(
        invalid,
        elemsync::Error::Config(ref err) if err.is_invalid_field()
    ));
}

#[test]
fn dropping_the_engine_detaches_handles() {
    let (_hub, a, _b) = pair();
    let (element, _) = toggle("lamp");
    let lamp = a.engine.bind(element, "can-toggle").unwrap();
    drop(a);

    assert!(!lamp.is_bound());
    assert!(lamp.set_data(json!({ "on": true })).is_err());
}
