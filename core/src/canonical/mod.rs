//! Canonical JSON encoding (`§4.1`).
//!
//! This module produces a unique byte representation for any JSON-shaped
//! value, such that logically equal values yield byte-equal output
//! regardless of source key order, whitespace, or Unicode normal form. The
//! canonical bytes are the substrate every hash in this crate is computed
//! over; any drift here breaks every downstream hash.
//!
//! Rules (applied recursively):
//!
//! - object keys are NFC-normalized and sorted by Unicode code point;
//! - string values are NFC-normalized;
//! - object fields with a `null` value are elided; `null` elements inside
//!   arrays are preserved;
//! - arrays preserve insertion order;
//! - numbers must be integers in the signed 64-bit range (integer-valued
//!   floats such as `42.0` are coerced; anything else is rejected);
//! - output is compact UTF-8 with no BOM and no insignificant whitespace.

mod error;
#[cfg(test)]
mod tests;

pub use error::CanonicalError;

use serde_json::{Map, Number, Value};
use unicode_normalization::UnicodeNormalization;

/// Canonicalize a JSON-shaped value into a new [`Value`] with deterministic
/// key order, NFC-normalized strings, null elision, and integer-only
/// numbers.
///
/// This is the pure transform step; call [`canonical_bytes`] to additionally
/// serialize the result to its canonical byte form.
///
/// # Errors
///
/// Returns [`CanonicalError`] if `value` contains a non-integer float, a
/// `NaN`/infinite number, an out-of-range integer, or an unsupported type.
pub fn canonicalize(value: &Value) -> Result<Value, CanonicalError> {
    canonicalize_at(value, "$")
}

/// Canonicalize `value` and serialize it to its canonical UTF-8 byte form.
///
/// # Errors
///
/// See [`canonicalize`].
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let canonical = canonicalize(value)?;
    // `Value` serialization is infallible for the value shapes `canonicalize`
    // produces (no maps with non-string keys, no NaN/Infinity floats).
    Ok(serde_json::to_vec(&canonical).unwrap_or_default())
}

fn canonicalize_at(value: &Value, path: &str) -> Result<Value, CanonicalError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Number(number) => canonicalize_number(number, path).map(Value::Number),
        Value::String(s) => Ok(Value::String(s.nfc().collect())),
        Value::Array(items) => {
            let mut canonical_items = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let child_path = format!("{path}[{index}]");
                canonical_items.push(canonicalize_at(item, &child_path)?);
            }
            Ok(Value::Array(canonical_items))
        }
        Value::Object(fields) => canonicalize_object(fields, path).map(Value::Object),
    }
}

fn canonicalize_object(fields: &Map<String, Value>, path: &str) -> Result<Map<String, Value>, CanonicalError> {
    let mut entries: Vec<(String, Value)> = Vec::with_capacity(fields.len());
    for (key, field_value) in fields {
        if field_value.is_null() {
            continue;
        }
        let normalized_key: String = key.nfc().collect();
        let child_path = format!("{path}.{normalized_key}");
        let canonical_value = canonicalize_at(field_value, &child_path)?;
        entries.push((normalized_key, canonical_value));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut map = Map::with_capacity(entries.len());
    for (key, field_value) in entries {
        if map.contains_key(&key) {
            return Err(CanonicalError::DuplicateKey { path: path.to_owned(), key });
        }
        map.insert(key, field_value);
    }
    Ok(map)
}

fn canonicalize_number(number: &Number, path: &str) -> Result<Number, CanonicalError> {
    if let Some(signed) = number.as_i64() {
        return Ok(Number::from(signed));
    }
    if let Some(unsigned) = number.as_u64() {
        return i64::try_from(unsigned)
            .map(Number::from)
            .map_err(|_| CanonicalError::OutOfRange { path: path.to_owned() });
    }
    let Some(float) = number.as_f64() else {
        return Err(CanonicalError::UnsupportedType { path: path.to_owned() });
    };
    if float.is_nan() {
        return Err(CanonicalError::NaN { path: path.to_owned() });
    }
    if float.is_infinite() {
        return Err(CanonicalError::Infinite { path: path.to_owned() });
    }
    if float.fract() != 0.0 {
        return Err(CanonicalError::Float {
            path: path.to_owned(),
            value: float.to_string(),
        });
    }
    // Saturating float-to-int cast, then a round-trip comparison: this
    // rejects magnitudes outside i64 range without relying on boundary float
    // literals (which cannot represent i64::MAX exactly).
    #[expect(
        clippy::cast_possible_truncation,
        reason = "the round-trip comparison below rejects any value the cast could not represent exactly"
    )]
    let candidate = float as i64;
    #[expect(
        clippy::cast_precision_loss,
        reason = "used only to verify round-trip exactness, not for computation"
    )]
    if (candidate as f64) != float {
        return Err(CanonicalError::OutOfRange { path: path.to_owned() });
    }
    Ok(Number::from(candidate))
}
