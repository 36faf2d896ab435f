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
fn damage_and_heal_net_out_per_target() {
    let events = vec![
        event(0, "apply_damage", json!({"target": "goblin-1", "amount": 10})),
        event(1, "heal", json!({"target": "goblin-1", "amount": 4})),
        event(2, "apply_damage", json!({"target": "goblin-2", "amount": 3})),
    ];

    let totals = fold_hp(&events).expect("fold succeeds");
    assert_eq!(totals.get("goblin-1").expect("present").delta, -6);
    assert_eq!(totals.get("goblin-2").expect("present").delta, -3);
}

#[test]
fn unrelated_event_types_are_ignored() {
    let events = vec![event(0, "tool.execute", json!({"anything": true}))];
    let totals = fold_hp(&events).expect("fold succeeds");
    assert!(totals.is_empty());
}

#[test]
fn malformed_payload_is_reported() {
    let events = vec![event(0, "apply_damage", json!({"target": "goblin-1"}))];
    let error = fold_hp(&events).expect_err("missing amount should fail");
    assert!(matches!(error, ProjectionError::MalformedPayload { .. }));
}
