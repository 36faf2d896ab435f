//! Payload hashing and idempotency keys (`§4.2`).
//!
//! `payload_hash` is the SHA-256 digest of an event's canonical bytes; it is
//! the value chained from one event to the next. `idempotency_key_v2` is a
//! 16-byte prefix of a SHA-256 digest computed over a length-framed
//! concatenation of six labeled components, so that two adjacent components
//! can never be confused with one field containing a delimiter character.


use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{self, CanonicalError};

/// A 32-byte SHA-256 digest over an event payload's canonical bytes.
pub type PayloadHash = [u8; 32];

/// A 16-byte idempotency key identifying one logical append operation.
pub type IdempotencyKey = [u8; 16];

/// The genesis hash: 32 zero bytes, used as `prev_event_hash` for the first
/// event in a campaign.
pub const GENESIS_HASH: PayloadHash = [0u8; 32];

/// Compute the SHA-256 digest of `payload`'s canonical bytes.
///
/// # Errors
///
/// Propagates [`CanonicalError`] if `payload` cannot be canonicalized.
pub fn payload_hash(payload: &Value) -> Result<PayloadHash, CanonicalError> {
    let bytes = canonical::canonical_bytes(payload)?;
    Ok(Sha256::digest(&bytes).into())
}

/// The six labeled components that make up an [`idempotency_key_v2`] input,
/// in the fixed order required by `§4.2`.
#[derive(Debug, Clone)]
pub struct IdempotencyInputs<'a> {
    /// The originating plan identifier, if any.
    pub plan_id: Option<&'a str>,
    /// The owning campaign.
    pub campaign_id: i64,
    /// The event type tag (e.g. `"tool.execute"`).
    pub event_type: &'a str,
    /// The tool invoked, if this event represents a tool call.
    pub tool_name: Option<&'a str>,
    /// The ruleset version in effect, if any.
    pub ruleset_version: Option<&'a str>,
    /// The arguments passed to the logical operation, canonicalized before
    /// hashing. `None` is treated identically to `Some(json!({}))`.
    pub args_json: Option<&'a Value>,
}

/// Compute the v2 idempotency key: a 16-byte prefix of SHA-256 over a
/// length-framed concatenation of six labeled components.
///
/// Each component is serialized as `label_bytes || length_u32_be(value) ||
/// value_bytes`. Length framing prevents delimiter-collision ambiguity
/// between adjacent fields.
///
/// # Errors
///
/// Propagates [`CanonicalError`] if `args_json` cannot be canonicalized.
pub fn idempotency_key_v2(inputs: &IdempotencyInputs<'_>) -> Result<IdempotencyKey, CanonicalError> {
    let empty_args = Value::Object(serde_json::Map::new());
    let args = inputs.args_json.unwrap_or(&empty_args);
    let args_bytes = canonical::canonical_bytes(args)?;

    let mut hasher = Sha256::new();
    frame_component(&mut hasher, b"plan_id", inputs.plan_id.unwrap_or("").as_bytes());
    frame_component(
        &mut hasher,
        b"campaign_id",
        inputs.campaign_id.to_string().as_bytes(),
    );
    frame_component(&mut hasher, b"event_type", inputs.event_type.as_bytes());
    frame_component(&mut hasher, b"tool_name", inputs.tool_name.unwrap_or("").as_bytes());
    frame_component(
        &mut hasher,
        b"ruleset_version",
        inputs.ruleset_version.unwrap_or("").as_bytes(),
    );
    frame_component(&mut hasher, b"args_json", &args_bytes);

    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    Ok(key)
}

/// Frame one labeled component as `label || length_u32_be(value) ||
/// value` and feed it into `hasher`.
fn frame_component(hasher: &mut Sha256, label: &[u8], value: &[u8]) {
    hasher.update(label);
    #[expect(
        clippy::cast_possible_truncation,
        reason = "component payloads are bounded well under u32::MAX in practice; truncation would only \
                   shorten the length prefix, which changes the digest rather than corrupting memory"
    )]
    let length = value.len() as u32;
    hasher.update(length.to_be_bytes());
    hasher.update(value);
}

/// Legacy v1 idempotency key, retained only so pre-migration events remain
/// verifiable. New appends must use [`idempotency_key_v2`]; see
/// `DESIGN.md` for the rationale.
///
/// The v1 scheme hashes a delimiter-joined string without length framing,
/// which is why it must never be produced for new events: two components
/// differing only in where a delimiter falls can collide.
#[must_use]
pub fn legacy_idempotency_key_v1(
    plan_id: Option<&str>,
    campaign_id: i64,
    event_type: &str,
    tool_name: Option<&str>,
) -> IdempotencyKey {
    let joined = format!(
        "{}|{}|{}|{}",
        plan_id.unwrap_or(""),
        campaign_id,
        event_type,
        tool_name.unwrap_or("")
    );
    let digest = Sha256::digest(joined.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}
