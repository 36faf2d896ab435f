//! Regression coverage for this module.

use serde_json::json;

use super::*;
use crate::hashing;
use crate::ledger::Provenance;

fn idempotency_key_byte(ordinal: i64) -> [u8; 16] {
    #[expect(
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        reason = "test helper; ordinal is always a small non-negative index"
    )]
    let byte = ordinal as u8;
    [byte; 16]
}

fn event(
    ordinal: i64,
    prev_hash: PayloadHash,
    payload: serde_json::Value,
) -> Event {
    let payload_hash = hashing::payload_hash(&payload).expect("hash succeeds");
    Event {
        event_id: Some(ordinal + 1),
        campaign_id: 1,
        scene_id: None,
        replay_ordinal: ordinal,
        event_type: "tool.execute".to_owned(),
        event_schema_version: 1,
        world_time: ordinal,
        wall_time_utc: chrono::Utc::now(),
        prev_event_hash: prev_hash,
        payload_hash,
        idempotency_key: idempotency_key_byte(ordinal),
        provenance: Provenance::default(),
        payload,
        migrator_applied_from: None,
    }
}

fn chain(length: usize) -> Vec<Event> {
    let mut events = Vec::with_capacity(length);
    let mut prev_hash = GENESIS_HASH;
    for index in 0..length {
        #[expect(clippy::cast_possible_wrap, reason = "test helper, bounded by caller")]
        let ordinal = index as i64;
        let evt = event(ordinal, prev_hash, json!({"n": index}));
        prev_hash = evt.payload_hash;
        events.push(evt);
    }
    events
}

#[test]
fn a_well_formed_chain_verifies_as_consistent() {
    let events = chain(5);
    let outcome = verify(1, &events).expect("verification runs");
    match outcome {
        VerifyOutcome::Consistent(report) => {
            assert_eq!(report.event_count, 5);
            assert_eq!(report.head_hash, events.last().expect("non-empty").payload_hash);
        }
        VerifyOutcome::Mismatched(mismatches) => panic!("unexpected mismatches: {mismatches:?}"),
    }
}

#[test]
fn verification_is_order_independent_in_input() {
    let mut events = chain(4);
    events.reverse();
    let outcome = verify(1, &events).expect("verification runs");
    assert!(matches!(outcome, VerifyOutcome::Consistent(_)));
}

#[test]
fn first_event_must_chain_from_genesis() {
    let mut events = chain(1);
    events[0].prev_event_hash = [0xAB; 32];
    let outcome = verify(1, &events).expect("verification runs");
    let VerifyOutcome::Mismatched(mismatches) = outcome else {
        panic!("expected a mismatch");
    };
    assert!(mismatches
        .iter()
        .any(|m| matches!(m.kind, MismatchKind::MissingGenesis)));
}

#[test]
fn a_broken_link_is_detected() {
    let mut events = chain(3);
    events[2].prev_event_hash = [0x11; 32];
    let outcome = verify(1, &events).expect("verification runs");
    let VerifyOutcome::Mismatched(mismatches) = outcome else {
        panic!("expected a mismatch");
    };
    assert!(mismatches
        .iter()
        .any(|m| matches!(m.kind, MismatchKind::BrokenLink { .. })));
}

#[test]
fn an_ordinal_gap_is_detected() {
    let mut events = chain(3);
    events[2].replay_ordinal = 5;
    let outcome = verify(1, &events).expect("verification runs");
    let VerifyOutcome::Mismatched(mismatches) = outcome else {
        panic!("expected a mismatch");
    };
    assert!(mismatches
        .iter()
        .any(|m| matches!(m.kind, MismatchKind::OrdinalGap { .. })));
}

#[test]
fn a_tampered_payload_is_detected_via_hash_mismatch() {
    let mut events = chain(2);
    events[1].payload = json!({"n": 999});
    let outcome = verify(1, &events).expect("verification runs");
    let VerifyOutcome::Mismatched(mismatches) = outcome else {
        panic!("expected a mismatch");
    };
    assert!(mismatches
        .iter()
        .any(|m| matches!(m.kind, MismatchKind::PayloadHashMismatch { .. })));
}

#[tokio::test]
async fn verify_and_record_increments_hash_mismatch_for_the_first_defect_only() {
    let mut events = chain(3);
    events[1].prev_event_hash = [0x22; 32];
    events[2].payload = json!({"n": 999});

    let metrics = crate::metrics::InMemoryMetricsSink::new();
    let outcome = verify_and_record(1, &events, &metrics)
        .await
        .expect("verification runs");
    let VerifyOutcome::Mismatched(mismatches) = outcome else {
        panic!("expected a mismatch");
    };
    assert_eq!(mismatches.len(), 1, "verification must fail fast at the first defect");
    assert!(matches!(mismatches[0].kind, MismatchKind::BrokenLink { .. }));
    assert_eq!(metrics.events_hash_mismatch(), 1);
}

#[test]
fn verification_stops_at_the_first_defect_and_does_not_scan_further() {
    let mut events = chain(4);
    events[1].prev_event_hash = [0x22; 32];
    events[3].payload = json!({"n": 999});

    let outcome = verify(1, &events).expect("verification runs");
    let VerifyOutcome::Mismatched(mismatches) = outcome else {
        panic!("expected a mismatch");
    };
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].replay_ordinal, 1);
    assert!(matches!(mismatches[0].kind, MismatchKind::BrokenLink { .. }));
}
