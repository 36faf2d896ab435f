//! Conditions fold (`§4.5`): per-target condition stacks and durations.


use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ledger::{CoreEventType, Event};

use super::ProjectionError;

#[derive(Debug, Clone, Deserialize)]
struct AppliedPayload {
    target: String,
    condition: String,
    duration: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemovedPayload {
    target: String,
    condition: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ClearedPayload {
    target: String,
    condition: String,
}

/// Stack count and remaining duration for one condition on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionState {
    /// How many times this condition has been applied without being
    /// cleared, floored at zero by `condition.removed`.
    pub stacks: u32,
    /// Rounds remaining, if the condition is timed. `None` if indefinite or
    /// not set.
    pub duration: Option<i64>,
}

/// Fold `events` into a map from target to its active conditions.
///
/// # Errors
///
/// Returns [`ProjectionError::MalformedPayload`] if a condition event's
/// payload does not match its expected shape.
pub fn fold_conditions(
    events: &[Event],
) -> Result<HashMap<String, HashMap<String, ConditionState>>, ProjectionError> {
    let mut table: HashMap<String, HashMap<String, ConditionState>> = HashMap::new();

    for event in events {
        if event.event_type == CoreEventType::ConditionApplied.as_str() {
            let payload: AppliedPayload =
                deserialize(event).map_err(|source| malformed(event, source))?;
            let entry = table
                .entry(payload.target)
                .or_default()
                .entry(payload.condition)
                .or_insert(ConditionState { stacks: 0, duration: None });
            entry.stacks += 1;
            entry.duration = payload.duration;
        } else if event.event_type == CoreEventType::ConditionRemoved.as_str() {
            let payload: RemovedPayload =
                deserialize(event).map_err(|source| malformed(event, source))?;
            if let Some(conditions) = table.get_mut(&payload.target) {
                if let Some(state) = conditions.get_mut(&payload.condition) {
                    state.stacks = state.stacks.saturating_sub(1);
                }
            }
        } else if event.event_type == CoreEventType::ConditionCleared.as_str() {
            let payload: ClearedPayload =
                deserialize(event).map_err(|source| malformed(event, source))?;
            let entry = table
                .entry(payload.target)
                .or_default()
                .entry(payload.condition)
                .or_insert(ConditionState { stacks: 0, duration: None });
            entry.stacks = 0;
            entry.duration = None;
        }
    }

    Ok(table)
}

fn deserialize<T: serde::de::DeserializeOwned>(event: &Event) -> Result<T, serde_json::Error> {
    serde_json::from_value(event.payload.clone())
}

fn malformed(event: &Event, source: serde_json::Error) -> ProjectionError {
    ProjectionError::MalformedPayload {
        event_id: event.event_id,
        event_type: event.event_type.clone(),
        source,
    }
}
