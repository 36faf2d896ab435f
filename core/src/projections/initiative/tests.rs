//! Regression coverage for this module.

use serde_json::json;

use super::*;
use crate::ledger::Provenance;

fn event(ordinal: i64, event_type: &str, payload: serde_json::Value) -> Event {
    Event {
        event_id: Some(ordinal + 1),
        campaign_id: 1,
        scene_id: None,
        replay_ordinal: ordinal,
        event_type: event_type.to_owned(),
        event_schema_version: 1,
        world_time: ordinal,
        wall_time_utc: chrono::Utc::now(),
        prev_event_hash: crate::hashing::GENESIS_HASH,
        payload_hash: [0u8; 32],
        idempotency_key: [0u8; 16],
        provenance: Provenance::default(),
        payload,
        migrator_applied_from: None,
    }
}

#[test]
fn set_replaces_the_whole_table_sorted_descending() {
    let events = vec![event(
        0,
        "initiative.set",
        json!({"entries": [
            {"id": "a", "init": 10},
            {"id": "b", "init": 15},
            {"id": "c", "init": 15},
        ]}),
    )];
    let order = fold_initiative(&events).expect("fold succeeds");
    let ids: Vec<&str> = order.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "a"]);
}

#[test]
fn update_patches_one_entry_and_resorts() {
    let events = vec![
        event(0, "initiative.set", json!({"entries": [{"id": "a", "init": 10}, {"id": "b", "init": 5}]})),
        event(1, "initiative.update", json!({"id": "b", "init": 20})),
    ];
    let order = fold_initiative(&events).expect("fold succeeds");
    let ids: Vec<&str> = order.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[test]
fn remove_deletes_one_entry() {
    let events = vec![
        event(0, "initiative.set", json!({"entries": [{"id": "a", "init": 10}, {"id": "b", "init": 5}]})),
        event(1, "initiative.remove", json!({"id": "a"})),
    ];
    let order = fold_initiative(&events).expect("fold succeeds");
    assert_eq!(order.len(), 1);
    assert_eq!(order[0].id, "b");
}
