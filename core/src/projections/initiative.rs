//! Initiative fold (`§4.5`): the current turn order, replacing or patching
//! one entry at a time.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ledger::{CoreEventType, Event};

use super::ProjectionError;

/// One combatant's turn-order entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    /// Stable combatant identifier.
    pub id: String,
    /// Initiative roll/score; higher acts first.
    pub init: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct SetPayload {
    entries: Vec<InitiativeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct UpdatePayload {
    id: String,
    init: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct RemovePayload {
    id: String,
}

/// Fold `events` into the current turn order, sorted by descending `init`
/// with ties broken by ascending `id`.
///
/// # Errors
///
/// Returns [`ProjectionError::MalformedPayload`] if an initiative event's
/// payload does not match its expected shape.
pub fn fold_initiative(events: &[Event]) -> Result<Vec<InitiativeEntry>, ProjectionError> {
    let mut table: HashMap<String, i64> = HashMap::new();

    for event in events {
        if event.event_type == CoreEventType::InitiativeSet.as_str() {
            let payload: SetPayload =
                deserialize(event).map_err(|source| malformed(event, source))?;
            table.clear();
            for entry in payload.entries {
                table.insert(entry.id, entry.init);
            }
        } else if event.event_type == CoreEventType::InitiativeUpdate.as_str() {
            let payload: UpdatePayload =
                deserialize(event).map_err(|source| malformed(event, source))?;
            table.insert(payload.id, payload.init);
        } else if event.event_type == CoreEventType::InitiativeRemove.as_str() {
            let payload: RemovePayload =
                deserialize(event).map_err(|source| malformed(event, source))?;
            table.remove(&payload.id);
        }
    }

    let mut entries: Vec<InitiativeEntry> = table
        .into_iter()
        .map(|(id, init)| InitiativeEntry { id, init })
        .collect();
    entries.sort_by(|a, b| b.init.cmp(&a.init).then_with(|| a.id.cmp(&b.id)));
    Ok(entries)
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
