//! Ontology phase (`§4.6`, phase d): tag and affordance registries.

use std::collections::HashMap;

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

const TAGS_DIR: &str = "ontology/tags";
const AFFORDANCES_DIR: &str = "ontology/affordances";

/// A normalized tag definition.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Normalized, lowercase dotted/kebab identifier.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Normalized, deduplicated, lowercase synonyms.
    pub synonyms: Vec<String>,
}

/// A normalized affordance definition; shape mirrors [`Tag`].
#[derive(Debug, Clone)]
pub struct Affordance {
    /// Normalized, lowercase dotted/kebab identifier.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Normalized, deduplicated, lowercase synonyms.
    pub synonyms: Vec<String>,
}

/// Result of running the ontology phase.
pub struct OntologyPhaseOutcome {
    pub(super) registered: Vec<RegisteredObject>,
    /// Every normalized tag registered this run.
    pub tags: Vec<Tag>,
    /// Every normalized affordance registered this run.
    pub affordances: Vec<Affordance>,
    /// Count of newly created tag/affordance events.
    pub created_count: usize,
    /// Count of tags/affordances skipped as idempotent re-imports.
    pub skipped_idempotent_count: usize,
}

/// Two definitions shared an id but normalized to different canonical
/// forms.
#[derive(Debug, Error)]
#[error("{category} id {id} has conflicting definitions")]
pub struct OntologyConflictError {
    /// `"tag"` or `"affordance"`.
    pub category: &'static str,
    /// The conflicting id.
    pub id: String,
}

struct NormalizedDef {
    id: String,
    raw: Value,
    content_hash: PayloadHash,
    file_hash: PayloadHash,
}

fn normalize_slug(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "-")
}

#[expect(clippy::too_many_arguments, reason = "phase helper threading run-scoped context")]
fn normalize_and_validate(
    path: &str,
    bytes: &[u8],
    file_hash: PayloadHash,
    category: &'static str,
    schema: SchemaKind,
) -> Result<NormalizedDef, ImporterError> {
    let mut raw: Value = serde_json::from_slice(bytes).map_err(|error| ImporterError::Phase {
        phase: "ontology",
        reason: format!("{path} is not valid JSON: {error}"),
    })?;

    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or(ImporterError::Phase {
            phase: "ontology",
            reason: format!("{path} missing id"),
        })?
        .to_owned();
    let normalized_id = normalize_slug(&id);

    let mut synonyms: Vec<String> = raw
        .get("synonyms")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_slug)
                .collect()
        })
        .unwrap_or_default();
    synonyms.sort();
    synonyms.dedup();

    if let Some(obj) = raw.as_object_mut() {
        obj.insert("id".to_owned(), Value::String(normalized_id.clone()));
        obj.insert(
            "synonyms".to_owned(),
            Value::Array(synonyms.into_iter().map(Value::String).collect()),
        );
    }

    schemas::validate(schema, &raw).map_err(|error| ImporterError::Phase {
        phase: "ontology",
        reason: format!("{path} failed schema validation: {error}"),
    })?;

    let content_hash = hashing::payload_hash(&raw).map_err(|error| ImporterError::Phase {
        phase: "ontology",
        reason: format!("{path} could not be canonicalized: {error}"),
    })?;

    let _ = category;
    Ok(NormalizedDef {
        id: normalized_id,
        raw,
        content_hash,
        file_hash,
    })
}

#[expect(clippy::too_many_arguments, reason = "phase helper threading run-scoped context")]
async fn run_collection<S>(
    package: &PackageDir,
    dir: &str,
    category: &'static str,
    schema: SchemaKind,
    event_type: SeedEventType,
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    importer: &Importer<S>,
) -> Result<(Vec<NormalizedDef>, Vec<RegisteredObject>, usize, usize), ImporterError>
where
    S: LedgerStorage,
{
    let files = package.list_sorted_files(dir)?;

    let mut by_id: HashMap<String, NormalizedDef> = HashMap::new();
    for path in &files {
        let (bytes, file_hash) = package.read_with_hash(path)?;
        let def = normalize_and_validate(path, &bytes, file_hash, category, schema)?;

        match by_id.get(&def.id) {
            None => {
                by_id.insert(def.id.clone(), def);
            }
            Some(existing) if existing.content_hash == def.content_hash => {}
            Some(_) => {
                return Err(OntologyConflictError {
                    category,
                    id: def.id,
                }
                .into());
            }
        }
    }

    let mut defs: Vec<NormalizedDef> = by_id.into_values().collect();
    defs.sort_by(|a, b| a.id.cmp(&b.id));

    let mut registered = Vec::with_capacity(defs.len());
    let mut created_count = 0usize;
    let mut skipped_idempotent_count = 0usize;

    for def in &defs {
        let idempotency = hashing::IdempotencyInputs {
            plan_id: None,
            campaign_id,
            event_type: event_type.as_str(),
            tool_name: None,
            ruleset_version: None,
            args_json: Some(&Value::String(def.id.clone())),
        };
        let request = AppendRequest {
            campaign_id,
            scene_id: None,
            event_type: event_type.as_str().to_owned(),
            event_schema_version: 1,
            payload: def.raw.clone(),
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
                if event.payload_hash != def.content_hash {
                    return Err(OntologyConflictError {
                        category,
                        id: def.id.clone(),
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
                "ontology",
                Some(def.id.clone()),
                Some(def.file_hash),
                action,
                None,
            )
            .await?;

        registered.push(RegisteredObject {
            stable_id: def.id.clone(),
            content_hash: def.content_hash,
        });
    }

    Ok((defs, registered, created_count, skipped_idempotent_count))
}

pub(super) async fn run_phase<S>(
    package: &PackageDir,
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    importer: &Importer<S>,
) -> Result<OntologyPhaseOutcome, ImporterError>
where
    S: LedgerStorage,
{
    let (tag_defs, mut registered, tags_created, tags_skipped) = run_collection(
        package,
        TAGS_DIR,
        "tag",
        SchemaKind::Tag,
        SeedEventType::TagRegistered,
        campaign_id,
        run_id,
        sequence,
        importer,
    )
    .await?;

    let (affordance_defs, affordance_registered, affordances_created, affordances_skipped) =
        run_collection(
            package,
            AFFORDANCES_DIR,
            "affordance",
            SchemaKind::Affordance,
            SeedEventType::AffordanceRegistered,
            campaign_id,
            run_id,
            sequence,
            importer,
        )
        .await?;

    registered.extend(affordance_registered);

    let tags = tag_defs
        .into_iter()
        .map(|def| Tag {
            id: def.id,
            label: def
                .raw
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            synonyms: def
                .raw
                .get("synonyms")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    let affordances = affordance_defs
        .into_iter()
        .map(|def| Affordance {
            id: def.id,
            label: def
                .raw
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            synonyms: def
                .raw
                .get("synonyms")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    Ok(OntologyPhaseOutcome {
        registered,
        tags,
        affordances,
        created_count: tags_created + affordances_created,
        skipped_idempotent_count: tags_skipped + affordances_skipped,
    })
}
