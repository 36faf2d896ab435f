//! Entity phase (`§4.6`, phase b).

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

const ENTITIES_DIR: &str = "entities";

/// Canonical category order: locations before NPCs before items; anything
/// else sorts after, alphabetically.
fn category_rank(kind: &str) -> (u8, &str) {
    match kind {
        "location" => (0, ""),
        "npc" => (1, ""),
        "item" => (2, ""),
        other => (3, other),
    }
}

#[derive(Debug, Clone)]
struct EntityRecord {
    stable_id: String,
    kind: String,
    raw: Value,
    content_hash: PayloadHash,
    file_hash: PayloadHash,
}

/// Result of running the entity phase.
pub struct EntityPhaseOutcome {
    /// Every `stable_id` registered, for the edge phase's reference check.
    pub(super) stable_ids: HashSet<String>,
    /// Objects registered this run, for the finalize phase.
    pub(super) registered: Vec<RegisteredObject>,
    /// Count of newly created entity events.
    pub created_count: usize,
    /// Count of entities skipped as idempotent re-imports.
    pub skipped_idempotent_count: usize,
}

/// Two entity files declared the same `stable_id` with different content,
/// either within this package or against a previously imported campaign.
#[derive(Debug, Error)]
#[error("entity stable_id {stable_id} declared with conflicting content")]
pub struct EntityCollisionError {
    /// The conflicting `stable_id`.
    pub stable_id: String,
}

pub(super) async fn run_phase<S>(
    package: &PackageDir,
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    importer: &Importer<S>,
) -> Result<EntityPhaseOutcome, ImporterError>
where
    S: LedgerStorage,
{
    let files = package.list_sorted_files(ENTITIES_DIR)?;

    let mut by_stable_id: HashMap<String, EntityRecord> = HashMap::new();
    for path in &files {
        let (bytes, file_hash) = package.read_with_hash(path)?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|error| ImporterError::Phase {
            phase: "entity",
            reason: format!("{path} is not valid JSON: {error}"),
        })?;
        schemas::validate(SchemaKind::Entity, &raw).map_err(|error| ImporterError::Phase {
            phase: "entity",
            reason: format!("{path} failed schema validation: {error}"),
        })?;

        let stable_id = raw
            .get("stable_id")
            .and_then(Value::as_str)
            .ok_or(ImporterError::Phase {
                phase: "entity",
                reason: format!("{path} missing stable_id"),
            })?
            .to_owned();
        let kind = raw
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ImporterError::Phase {
                phase: "entity",
                reason: format!("{path} missing kind"),
            })?
            .to_owned();

        let content_hash =
            hashing::payload_hash(&raw).map_err(|error| ImporterError::Phase {
                phase: "entity",
                reason: format!("{path} could not be canonicalized: {error}"),
            })?;

        let record = EntityRecord {
            stable_id: stable_id.clone(),
            kind,
            raw,
            content_hash,
            file_hash,
        };

        match by_stable_id.get(&stable_id) {
            None => {
                by_stable_id.insert(stable_id, record);
            }
            Some(existing) if existing.content_hash == record.content_hash => {
                // Identical duplicate within the package; not registered
                // twice.
            }
            Some(_) => return Err(EntityCollisionError { stable_id }.into()),
        }
    }

    let mut records: Vec<EntityRecord> = by_stable_id.into_values().collect();
    records.sort_by(|a, b| {
        category_rank(&a.kind)
            .cmp(&category_rank(&b.kind))
            .then_with(|| a.stable_id.cmp(&b.stable_id))
    });

    let mut stable_ids = HashSet::with_capacity(records.len());
    let mut registered = Vec::with_capacity(records.len());
    let mut created_count = 0usize;
    let mut skipped_idempotent_count = 0usize;

    for record in records {
        stable_ids.insert(record.stable_id.clone());

        let idempotency = hashing::IdempotencyInputs {
            plan_id: None,
            campaign_id,
            event_type: SeedEventType::EntityCreated.as_str(),
            tool_name: None,
            ruleset_version: None,
            args_json: Some(&Value::String(record.stable_id.clone())),
        };
        let request = AppendRequest {
            campaign_id,
            scene_id: None,
            event_type: SeedEventType::EntityCreated.as_str().to_owned(),
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
                    return Err(EntityCollisionError {
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
                "entity",
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

    Ok(EntityPhaseOutcome {
        stable_ids,
        registered,
        created_count,
        skipped_idempotent_count,
    })
}
