use elemsync::{
    ElementInfo,
    migration::{LegacyStore, MigrationReport},
};
use serde_json::json;

use crate::helpers::*;

fn seed(peer: &Peer) {
    let legacy = peer.engine.legacy_store();
    legacy
        .set("can-toggle", json!({ "lamp": { "on": true }, "fan": { "on": false } }))
        .unwrap();
    legacy.set("can-draw", json!({ "pad": ["a", "b"] })).unwrap();
}

#[test]
fn migration_runs_once_per_document() {
    let (_hub, a, _b) = pair();
    seed(&a);

    let report = a.engine.run_migration(&a.engine.legacy_store()).unwrap();
    assert_eq!(
        report,
        MigrationReport {
            skipped: false,
            tags: 2,
            copied: 3,
            already_present: 0,
            failed: 0,
        }
    );

    let transactions = a.engine.store().transaction_count();
    let again = a.engine.run_migration(&a.engine.legacy_store()).unwrap();
    assert!(again.skipped);
    assert_eq!(a.engine.store().transaction_count(), transactions);
}

#[test]
fn bound_elements_see_migrated_data() {
    let (_hub, a, _b) = pair();
    seed(&a);
    a.engine.run_migration(&a.engine.legacy_store()).unwrap();

    let (element, key) = toggle("lamp");
    let lamp = a.engine.bind(element, "can-toggle").unwrap();
    assert_eq!(lamp.data(), json!({ "on": true }));
    assert_eq!(a.log.last_render(&key), Some(json!({ "on": true })));

    let pad = a.engine.bind(ElementInfo::with_id("pad"), "can-draw").unwrap();
    pad.update_data(|cell| cell.push("", "c")).unwrap();
    assert_eq!(pad.data(), json!(["a", "b", "c"]));

    // The legacy tree is left as it was, apart from the marker.
    let legacy = a.engine.legacy_store().snapshot();
    assert_eq!(legacy["can-draw"], json!({ "pad": ["a", "b"] }));
    assert_eq!(legacy[a.engine.config().migration_marker.as_str()], json!(true));
}

#[test]
fn existing_cells_win_over_legacy_entries() {
    let (_hub, a, _b) = pair();
    seed(&a);
    let (element, _) = toggle("fan");
    a.engine
        .bind(element, "can-toggle")
        .unwrap()
        .set_data(json!({ "on": "spinning" }))
        .unwrap();

    let report = a.engine.run_migration(&a.engine.legacy_store()).unwrap();
    assert_eq!(report.copied, 2);
    assert_eq!(report.already_present, 1);
    assert_eq!(
        a.engine.store().snapshot_all()["can-toggle"]["fan"],
        json!({ "on": "spinning" })
    );
}

#[test]
fn the_marker_replicates_to_peers() {
    let (_hub, a, b) = pair();
    seed(&a);
    a.engine.run_migration(&a.engine.legacy_store()).unwrap();
    deliver(&a, &b);

    let transactions = b.engine.store().transaction_count();
    let report = b.engine.run_migration(&b.engine.legacy_store()).unwrap();
    assert!(report.skipped);
    assert_eq!(b.engine.store().transaction_count(), transactions);
    assert_eq!(b.engine.store().snapshot_all(), a.engine.store().snapshot_all());
}

#[test]
fn concurrent_migrations_converge() {
    let (_hub, a, b) = pair();
    seed(&a);
    deliver(&a, &b);

    a.engine.run_migration(&a.engine.legacy_store()).unwrap();
    let report = b.engine.run_migration(&b.engine.legacy_store()).unwrap();
    assert!(!report.skipped);
    sync(&a, &b);

    let tree = a.engine.store().snapshot_all();
    assert_eq!(tree, b.engine.store().snapshot_all());
    assert_eq!(tree["can-toggle"]["lamp"], json!({ "on": true }));
    assert_eq!(tree["can-draw"]["pad"], json!(["a", "b"]));
    assert!(b.engine.run_migration(&b.engine.legacy_store()).unwrap().skipped);
}
