//! Finalize phase (`§4.6`, phase f): state digest, sequence audit, summary
//! event.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::append::{AppendOutcome, AppendRequest};
use crate::hashing::{self, PayloadHash};
use crate::ledger::{ImportAction, Provenance, SeedEventType};
use crate::ports::LedgerStorage;

use super::edges::EdgePhaseOutcome;
use super::entities::EntityPhaseOutcome;
use super::lore::LorePhaseOutcome;
use super::manifest::Manifest;
use super::ontology::OntologyPhaseOutcome;
use super::{Importer, ImporterError, RegisteredObject};

/// Every phase's output, gathered for the finalize phase.
pub struct FinalizeInputs<'a> {
    /// Manifest phase output.
    pub manifest: &'a Manifest,
    /// Entity phase output.
    pub entities: &'a EntityPhaseOutcome,
    /// Edge phase output.
    pub edges: &'a EdgePhaseOutcome,
    /// Ontology phase output.
    pub ontology: &'a OntologyPhaseOutcome,
    /// Lore phase output.
    pub lore: &'a LorePhaseOutcome,
    /// Wall-clock duration of the run so far, in milliseconds.
    pub duration_ms: u64,
}

/// The summary emitted on `seed.import.complete` and returned to the
/// caller of [`super::Importer::run`].
#[derive(Debug, Clone)]
pub struct ImportSummary {
    /// The imported package's ULID identity.
    pub package_id: ulid::Ulid,
    /// Canonical hash of the manifest document.
    pub manifest_hash: PayloadHash,
    /// Entities created or confirmed idempotent this run.
    pub entity_count: usize,
    /// Edges created or confirmed idempotent this run.
    pub edge_count: usize,
    /// Tags created or confirmed idempotent this run.
    pub tag_count: usize,
    /// Affordances created or confirmed idempotent this run.
    pub affordance_count: usize,
    /// Lore chunks created or confirmed idempotent this run.
    pub chunk_count: usize,
    /// Hash of every registered object across all phases, sorted by
    /// `(phase, stable_id, content_hash)`.
    pub state_digest: PayloadHash,
    /// Wall-clock duration of the run, in milliseconds.
    pub import_duration_ms: u64,
}

fn state_digest(
    phases: &[(&'static str, &[RegisteredObject])],
) -> Result<PayloadHash, ImporterError> {
    let mut components: Vec<Value> = Vec::new();
    for (phase, objects) in phases {
        for object in *objects {
            components.push(json!({
                "phase": phase,
                "stable_id": object.stable_id,
                "content_hash": hex::encode(object.content_hash),
            }));
        }
    }
    components.sort_by(|a, b| {
        let key = |value: &Value| {
            (
                value["phase"].as_str().unwrap_or_default().to_owned(),
                value["stable_id"].as_str().unwrap_or_default().to_owned(),
                value["content_hash"].as_str().unwrap_or_default().to_owned(),
            )
        };
        key(a).cmp(&key(b))
    });

    hashing::payload_hash(&json!({ "state_components": components })).map_err(|error| {
        ImporterError::Phase {
            phase: "finalize",
            reason: format!("state digest could not be canonicalized: {error}"),
        }
    })
}

async fn check_sequence_gap_free<S>(
    storage: &S,
    run_id: Uuid,
    expected_len: i32,
) -> Result<(), ImporterError>
where
    S: LedgerStorage,
{
    let mut entries = storage.list_import_log(run_id).await?;
    entries.sort_by_key(|entry| entry.sequence);

    #[expect(
        clippy::cast_sign_loss,
        reason = "sequence counters are non-negative by construction"
    )]
    let expected_len = expected_len as usize;
    if entries.len() != expected_len {
        return Err(ImporterError::Phase {
            phase: "finalize",
            reason: "import_log_sequence_gap_detected".to_owned(),
        });
    }
    for (index, entry) in entries.iter().enumerate() {
        #[expect(
            clippy::cast_possible_wrap,
            reason = "run-scoped sequence counts stay well under i32::MAX"
        )]
        let expected_sequence = index as i32;
        if entry.sequence != expected_sequence {
            return Err(ImporterError::Phase {
                phase: "finalize",
                reason: "import_log_sequence_gap_detected".to_owned(),
            });
        }
    }
    Ok(())
}

pub(super) async fn run_phase<S>(
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    inputs: FinalizeInputs<'_>,
    importer: &Importer<S>,
) -> Result<ImportSummary, ImporterError>
where
    S: LedgerStorage,
{
    check_sequence_gap_free(importer.storage.as_ref(), run_id, *sequence).await?;

    let manifest_object = RegisteredObject {
        stable_id: inputs.manifest.package_id.to_string(),
        content_hash: inputs.manifest.manifest_hash,
    };
    let manifest_slice = std::slice::from_ref(&manifest_object);

    let digest = state_digest(&[
        ("manifest", manifest_slice),
        ("entity", &inputs.entities.registered),
        ("edge", &inputs.edges.registered),
        ("ontology", &inputs.ontology.registered),
        ("lore", &inputs.lore.registered),
    ])?;

    let summary = ImportSummary {
        package_id: inputs.manifest.package_id,
        manifest_hash: inputs.manifest.manifest_hash,
        entity_count: inputs.entities.registered.len(),
        edge_count: inputs.edges.registered.len(),
        tag_count: inputs.ontology.tags.len(),
        affordance_count: inputs.ontology.affordances.len(),
        chunk_count: inputs.lore.registered.len(),
        state_digest: digest,
        import_duration_ms: inputs.duration_ms,
    };

    let payload = json!({
        "package_id": summary.package_id.to_string(),
        "manifest_hash": hex::encode(summary.manifest_hash),
        "entity_count": summary.entity_count,
        "edge_count": summary.edge_count,
        "tag_count": summary.tag_count,
        "affordance_count": summary.affordance_count,
        "chunk_count": summary.chunk_count,
        "state_digest": hex::encode(summary.state_digest),
        "import_duration_ms": summary.import_duration_ms,
    });

    // Keyed on the package's stable identity, not `run_id`: `run_id` is
    // minted fresh on every call to `Importer::run` (`mod.rs`), so keying on
    // it would make a repeat import of the same package always look like a
    // new completion event instead of being recognized as idempotent.
    let idempotency = hashing::IdempotencyInputs {
        plan_id: None,
        campaign_id,
        event_type: SeedEventType::ImportComplete.as_str(),
        tool_name: None,
        ruleset_version: None,
        args_json: Some(&Value::String(summary.package_id.to_string())),
    };
    let request = AppendRequest {
        campaign_id,
        scene_id: None,
        event_type: SeedEventType::ImportComplete.as_str().to_owned(),
        event_schema_version: 1,
        payload,
        provenance: Provenance::default(),
        idempotency,
    };
    let outcome = importer.coordinator.append(request).await?;
    let action = match outcome {
        AppendOutcome::Applied(_) => ImportAction::Created,
        AppendOutcome::IdempotentReuse(_) => ImportAction::SkippedIdempotent,
    };

    importer
        .log(
            sequence,
            run_id,
            "finalize",
            None,
            None,
            action,
            None,
        )
        .await?;
    importer
        .log(
            sequence,
            run_id,
            "finalize",
            None,
            None,
            ImportAction::Completed,
            None,
        )
        .await?;

    Ok(summary)
}
