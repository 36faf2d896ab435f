//! HP fold (`§4.5`): net hit-point delta per target, accumulated from
//! `apply_damage` and `heal` events.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ledger::{CoreEventType, Event};

use super::ProjectionError;

#[derive(Debug, Clone, Deserialize)]
struct DamagePayload {
    target: String,
    amount: i64,
}

/// Net HP delta accumulated for one target.
///
/// Negative for net damage, positive for net healing; callers apply this on
/// top of whatever baseline HP value they track outside the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpDelta {
    /// The running total, positive or negative.
    pub delta: i64,
}

/// Fold `events` into a map from target reference to net HP delta.
///
/// Events whose `event_type` is neither `apply_damage` nor `heal` are
/// ignored.
///
/// # Errors
///
/// Returns [`ProjectionError::MalformedPayload`] if an `apply_damage` or
/// `heal` event's payload does not contain `target` and `amount`.
pub fn fold_hp(events: &[Event]) -> Result<HashMap<String, HpDelta>, ProjectionError> {
    let mut totals: HashMap<String, i64> = HashMap::new();

    for event in events {
        let sign = if event.event_type == CoreEventType::ApplyDamage.as_str() {
            -1
        } else if event.event_type == CoreEventType::Heal.as_str() {
            1
        } else {
            continue;
        };

        let payload: DamagePayload =
            serde_json::from_value(event.payload.clone()).map_err(|source| {
                ProjectionError::MalformedPayload {
                    event_id: event.event_id,
                    event_type: event.event_type.clone(),
                    source,
                }
            })?;

        *totals.entry(payload.target).or_insert(0) += sign * payload.amount;
    }

    Ok(totals
        .into_iter()
        .map(|(target, delta)| (target, HpDelta { delta }))
        .collect())
}
