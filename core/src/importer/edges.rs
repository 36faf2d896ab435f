//! Edge phase (`§4.6`, phase c).

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::append::{AppendOutcome, AppendRequest};
use crate::hashing::{self, PayloadHash};
use crate::ledger::{ImportAction, Provenance, SeedEventType};
use crate::ports::LedgerStorage;

use super::package::PackageDir;
use super::schemas::{self, SchemaKind};
use super::{Importer, ImporterError, RegisteredObject};

const EDGES_DIR: &str = "edges";

#[derive(Debug, Clone)]
struct EdgeRecord {
    stable_id: String,
    raw: Value,
    content_hash: PayloadHash,
    file_hash: PayloadHash,
}

/// Result of running the edge phase.
pub struct EdgePhaseOutcome {
    pub(super) registered: Vec<RegisteredObject>,
    /// Count of newly created edge events.
    pub created_count: usize,
    /// Count of edges skipped as idempotent re-imports.
    pub skipped_idempotent_count: usize,
}

/// Two edge files declared the same `stable_id` with different content, a
/// dangling reference, or an inverted validity window.
#[derive(Debug, Error)]
pub enum EdgeCollisionError {
    /// Conflicting content under the same `stable_id`.
    #[error("edge stable_id {stable_id} declared with conflicting content")]
    Collision {
        /// The conflicting `stable_id`.
        stable_id: String,
    },
    /// `src_ref` or `dst_ref` did not resolve to a registered entity.
    #[error("edge {stable_id} references unknown entity {dangling_ref}")]
    DanglingReference {
        /// The offending edge.
        stable_id: String,
        /// The reference that did not resolve.
        dangling_ref: String,
    },
    /// `validity.end_event_id` preceded `validity.start_event_id`.
    #[error("edge {stable_id} has an inverted validity window")]
    InvertedValidity {
        /// The offending edge.
        stable_id: String,
    },
}

pub(super) async fn run_phase<S>(
    package: &PackageDir,
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    known_entities: &HashSet<String>,
    importer: &Importer<S>,
) -> Result<EdgePhaseOutcome, ImporterError>
where
    S: LedgerStorage,
{
    let files = package.list_sorted_files(EDGES_DIR)?;

    let mut by_stable_id: HashMap<String, EdgeRecord> = HashMap::new();
    for path in &files {
        let (bytes, file_hash) = package.read_with_hash(path)?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|error| ImporterError::Phase {
            phase: "edge",
            reason: format!("{path} is not valid JSON: {error}"),
        })?;
        schemas::validate(SchemaKind::Edge, &raw).map_err(|error| ImporterError::Phase {
            phase: "edge",
            reason: format!("{path} failed schema validation: {error}"),
        })?;

        let stable_id = raw
            .get("stable_id")
            .and_then(Value::as_str)
            .ok_or(ImporterError::Phase {
                phase: "edge",
                reason: format!("{path} missing stable_id"),
            })?
            .to_owned();
        let src_ref = raw
            .get("src_ref")
            .and_then(Value::as_str)
            .ok_or(ImporterError::Phase {
                phase: "edge",
                reason: format!("{path} missing src_ref"),
            })?
            .to_owned();
        let dst_ref = raw
            .get("dst_ref")
            .and_then(Value::as_str)
            .ok_or(ImporterError::Phase {
                phase: "edge",
                reason: format!("{path} missing dst_ref"),
            })?
            .to_owned();

        if !known_entities.contains(&src_ref) {
            return Err(EdgeCollisionError::DanglingReference {
                stable_id,
                dangling_ref: src_ref,
            }
            .into());
        }
        if !known_entities.contains(&dst_ref) {
            return Err(EdgeCollisionError::DanglingReference {
                stable_id,
                dangling_ref: dst_ref,
            }
            .into());
        }

        if let Some(validity) = raw.get("validity") {
            let start = validity.get("start_event_id").and_then(Value::as_i64);
            let end = validity.get("end_event_id").and_then(Value::as_i64);
            if let (Some(start), Some(end)) = (start, end) {
                if end < start {
                    return Err(EdgeCollisionError::InvertedValidity { stable_id }.into());
                }
            }
        }

        let content_hash = hashing::payload_hash(&raw).map_err(|error| ImporterError::Phase {
            phase: "edge",
            reason: format!("{path} could not be canonicalized: {error}"),
        })?;

        let record = EdgeRecord {
            stable_id: stable_id.clone(),
            raw,
            content_hash,
            file_hash,
        };

        match by_stable_id.get(&stable_id) {
            None => {
                by_stable_id.insert(stable_id, record);
            }
            Some(existing) if existing.content_hash == record.content_hash => {}
            Some(_) => return Err(EdgeCollisionError::Collision { stable_id }.into()),
        }
    }

    let mut records: Vec<EdgeRecord> = by_stable_id.into_values().collect();
    records.sort_by(|a, b| a.stable_id.cmp(&b.stable_id));

    let mut registered = Vec::with_capacity(records.len());
    let mut created_count = 0usize;
    let mut skipped_idempotent_count = 0usize;

    for record in records {
        let idempotency = hashing::IdempotencyInputs {
            plan_id: None,
            campaign_id,
            event_type: SeedEventType::EdgeCreated.as_str(),
            tool_name: None,
            ruleset_version: None,
            args_json: Some(&Value::String(record.stable_id.clone())),
        };
        let request = AppendRequest {
            campaign_id,
            scene_id: None,
            event_type: SeedEventType::EdgeCreated.as_str().to_owned(),
            event_schema_version: 1,
            payload: record.raw.clone(),
            provenance: Provenance::default(),
            idempotency,
        };
        let outcome = importer.coordinator.append(request).await?;

        let action = match outcome {
            AppendOutcome::Applied(_) => {
                created_count += 1;
                ImportAction::Created
            }
            AppendOutcome::IdempotentReuse(event) => {
                if event.payload_hash != record.content_hash {
                    return Err(EdgeCollisionError::Collision {
                        stable_id: record.stable_id,
                    }
                    .into());
                }
                skipped_idempotent_count += 1;
                ImportAction::SkippedIdempotent
            }
        };

        importer
            .log(
                sequence,
                run_id,
                "edge",
                Some(record.stable_id.clone()),
                Some(record.file_hash),
                action,
                None,
            )
            .await?;

        registered.push(RegisteredObject {
            stable_id: record.stable_id,
            content_hash: record.content_hash,
        });
    }

    Ok(EdgePhaseOutcome {
        registered,
        created_count,
        skipped_idempotent_count,
    })
}
