//! Internal Diesel row structs. Implementation details of this adapter;
//! never exposed outside `outbound::postgres`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::ledger::{Event, ImportAction, ImportLogEntry, Provenance};

use super::schema::{events, import_log};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct EventRow {
    pub event_id: i64,
    pub campaign_id: i64,
    pub scene_id: Option<i64>,
    pub replay_ordinal: i64,
    pub event_type: String,
    pub event_schema_version: i32,
    pub world_time: i64,
    pub wall_time_utc: DateTime<Utc>,
    pub prev_event_hash: Vec<u8>,
    pub payload_hash: Vec<u8>,
    pub idempotency_key: Vec<u8>,
    pub actor_id: Option<String>,
    pub plan_id: Option<String>,
    pub execution_request_id: Option<String>,
    pub approved_by: Option<String>,
    pub payload: serde_json::Value,
    pub migrator_applied_from: Option<i32>,
}

/// Error converting a stored row into a domain type.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum RowConversionError {
    /// A fixed-width hash column did not contain the expected number of
    /// bytes.
    #[error("column {column} contained {actual} bytes, expected {expected}")]
    HashWidth {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The `action` column held a value outside [`ImportAction`]'s closed
    /// set.
    #[error("column action contained unrecognized value {value:?}")]
    UnknownAction { value: String },
}

impl TryFrom<EventRow> for Event {
    type Error = RowConversionError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let prev_event_hash = <[u8; 32]>::try_from(row.prev_event_hash.as_slice())
            .map_err(|_| RowConversionError::HashWidth {
                column: "prev_event_hash",
                expected: 32,
                actual: row.prev_event_hash.len(),
            })?;
        let payload_hash = <[u8; 32]>::try_from(row.payload_hash.as_slice()).map_err(|_| {
            RowConversionError::HashWidth {
                column: "payload_hash",
                expected: 32,
                actual: row.payload_hash.len(),
            }
        })?;
        let idempotency_key = <[u8; 16]>::try_from(row.idempotency_key.as_slice()).map_err(|_| {
            RowConversionError::HashWidth {
                column: "idempotency_key",
                expected: 16,
                actual: row.idempotency_key.len(),
            }
        })?;

        Ok(Event {
            event_id: Some(row.event_id),
            campaign_id: row.campaign_id,
            scene_id: row.scene_id,
            replay_ordinal: row.replay_ordinal,
            event_type: row.event_type,
            event_schema_version: row.event_schema_version,
            world_time: row.world_time,
            wall_time_utc: row.wall_time_utc,
            prev_event_hash,
            payload_hash,
            idempotency_key,
            provenance: Provenance {
                actor_id: row.actor_id,
                plan_id: row.plan_id,
                execution_request_id: row.execution_request_id,
                approved_by: row.approved_by,
            },
            payload: row.payload,
            migrator_applied_from: row.migrator_applied_from,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = events)]
pub(crate) struct NewEventRow<'a> {
    pub campaign_id: i64,
    pub scene_id: Option<i64>,
    pub replay_ordinal: i64,
    pub event_type: &'a str,
    pub event_schema_version: i32,
    pub world_time: i64,
    pub wall_time_utc: DateTime<Utc>,
    pub prev_event_hash: &'a [u8],
    pub payload_hash: &'a [u8],
    pub idempotency_key: &'a [u8],
    pub actor_id: Option<&'a str>,
    pub plan_id: Option<&'a str>,
    pub execution_request_id: Option<&'a str>,
    pub approved_by: Option<&'a str>,
    pub payload: &'a serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = import_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ImportLogRow {
    pub run_id: Uuid,
    pub sequence: i32,
    pub phase: String,
    pub stable_id: Option<String>,
    pub file_hash: Option<Vec<u8>>,
    pub action: String,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<ImportLogRow> for ImportLogEntry {
    type Error = RowConversionError;

    fn try_from(row: ImportLogRow) -> Result<Self, Self::Error> {
        let file_hash = row
            .file_hash
            .map(|bytes| {
                let len = bytes.len();
                <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| RowConversionError::HashWidth {
                    column: "file_hash",
                    expected: 32,
                    actual: len,
                })
            })
            .transpose()?;

        let action = match row.action.as_str() {
            "validated" => ImportAction::Validated,
            "created" => ImportAction::Created,
            "skipped_idempotent" => ImportAction::SkippedIdempotent,
            "completed" => ImportAction::Completed,
            other => {
                return Err(RowConversionError::UnknownAction {
                    value: other.to_owned(),
                });
            }
        };

        Ok(ImportLogEntry {
            run_id: row.run_id,
            phase: row.phase,
            sequence: row.sequence,
            stable_id: row.stable_id,
            file_hash,
            action,
            metadata: row.metadata,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = import_log)]
pub(crate) struct NewImportLogRow<'a> {
    pub run_id: Uuid,
    pub sequence: i32,
    pub phase: &'a str,
    pub stable_id: Option<&'a str>,
    pub file_hash: Option<&'a [u8]>,
    pub action: &'a str,
    pub metadata: Option<&'a serde_json::Value>,
}
