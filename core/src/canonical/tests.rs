//! Regression coverage for this module.

use super::*;
use serde_json::json;
use sha2::{Digest, Sha256};

#[test]
fn genesis_payload_is_two_bytes() {
    let bytes = canonical_bytes(&json!({})).expect("empty object canonicalizes");
    assert_eq!(bytes, b"{}");
}

#[test]
fn genesis_hash_matches_golden_vector() {
    let bytes = canonical_bytes(&json!({})).expect("empty object canonicalizes");
    let digest = Sha256::digest(&bytes);
    assert_eq!(
        hex::encode(digest),
        "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8"
    );
}

#[test]
fn key_ordering_is_invariant_under_permutation() {
    let a = json!({"z": 1, "a": 2, "m": 3});
    let b = json!({"a": 2, "m": 3, "z": 1});

    let bytes_a = canonical_bytes(&a).expect("canonicalizes");
    let bytes_b = canonical_bytes(&b).expect("canonicalizes");

    assert_eq!(bytes_a, bytes_b);
    assert_eq!(bytes_a, br#"{"a":2,"m":3,"z":1}"#);
}

#[test]
fn null_fields_are_elided_but_array_nulls_are_preserved() {
    let value = json!({"keep": "v", "drop": null, "arr": [1, null, 3]});
    let bytes = canonical_bytes(&value).expect("canonicalizes");
    assert_eq!(bytes, br#"{"arr":[1,null,3],"keep":"v"}"#);
}

#[test]
fn strings_are_normalized_to_nfc() {
    // "café" spelled with a combining acute accent (NFD).
    let nfd = json!({"name": "cafe\u{0301}"});
    let nfc = json!({"name": "café"});

    let bytes_nfd = canonical_bytes(&nfd).expect("canonicalizes");
    let bytes_nfc = canonical_bytes(&nfc).expect("canonicalizes");

    assert_eq!(bytes_nfd, bytes_nfc);
    assert_eq!(
        Sha256::digest(&bytes_nfd).as_slice(),
        Sha256::digest(&bytes_nfc).as_slice()
    );
}

#[test]
fn integer_valued_floats_are_coerced() {
    let value = json!({"amount": 42.0});
    let bytes = canonical_bytes(&value).expect("canonicalizes");
    assert_eq!(bytes, br#"{"amount":42}"#);
}

#[test]
fn non_integer_floats_are_rejected() {
    let value = json!({"amount": 1.5});
    let err = canonical_bytes(&value).expect_err("fractional floats must fail");
    assert!(matches!(err, CanonicalError::Float { .. }));
}

#[test]
fn out_of_range_integers_are_rejected() {
    let value = json!({"amount": u64::MAX});
    let err = canonical_bytes(&value).expect_err("u64::MAX exceeds i64 range");
    assert!(matches!(err, CanonicalError::OutOfRange { .. }));
}

#[test]
fn nested_objects_sort_keys_at_every_level() {
    let value = json!({"outer": {"z": 1, "a": {"y": 2, "b": 3}}});
    let bytes = canonical_bytes(&value).expect("canonicalizes");
    assert_eq!(bytes, br#"{"outer":{"a":{"b":3,"y":2},"z":1}}"#);
}

#[test]
fn booleans_are_lowercase() {
    let value = json!({"ok": true, "bad": false});
    let bytes = canonical_bytes(&value).expect("canonicalizes");
    assert_eq!(bytes, br#"{"bad":false,"ok":true}"#);
}

#[test]
fn keys_that_normalize_to_the_same_string_are_rejected() {
    // "café" once spelled with a combining acute accent (NFD), once precomposed (NFC).
    let value = json!({"cafe\u{0301}": 1, "café": 2});
    let err = canonical_bytes(&value).expect_err("colliding normalized keys must fail");
    assert!(matches!(err, CanonicalError::DuplicateKey { .. }));
}

#[test]
fn arrays_preserve_element_order() {
    let value = json!([3, 1, 2]);
    let bytes = canonical_bytes(&value).expect("canonicalizes");
    assert_eq!(bytes, b"[3,1,2]");
}
