//! The ledger's core entities (`§3`): campaigns, scenes, events, and the
//! import audit trail.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hashing::{IdempotencyKey, PayloadHash};

/// Isolation boundary for ordinals and hash chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Integer surrogate identity.
    pub campaign_id: i64,
    /// Human-readable display name.
    pub display_name: String,
}

/// A sub-context within a campaign (for example, a chat channel).
///
/// Ordinals are per-campaign, not per-scene; `Scene` exists purely to scope
/// provenance, not ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Integer surrogate identity.
    pub scene_id: i64,
    /// The owning campaign.
    pub campaign_id: i64,
    /// Channel identifier, unique per scene.
    pub channel_id: String,
}

/// Provenance fields threaded through an append but not required for the
/// hash chain itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// The actor (player, GM, system) responsible for this event.
    pub actor_id: Option<String>,
    /// The plan this event was generated from, if any.
    pub plan_id: Option<String>,
    /// The execution request that produced this event, if any.
    pub execution_request_id: Option<String>,
    /// Who approved this event, for actions requiring approval.
    pub approved_by: Option<String>,
}

/// One row of the append-only event ledger (`§3`).
///
/// ## Invariants
/// - `UNIQUE(campaign_id, replay_ordinal)`
/// - `UNIQUE(campaign_id, idempotency_key)`
/// - for `replay_ordinal > 0`: `prev_event_hash` equals the previous event's
///   `payload_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Surrogate primary key. `None` until the row has been persisted.
    pub event_id: Option<i64>,
    /// The owning campaign.
    pub campaign_id: i64,
    /// The scene this event was raised in, if any.
    pub scene_id: Option<i64>,
    /// Dense, per-campaign, zero-based sequence number.
    pub replay_ordinal: i64,
    /// Short string tag identifying the event's shape.
    pub event_type: String,
    /// Schema version for `payload`, bumped when its shape changes.
    pub event_schema_version: i32,
    /// Logical clock. Currently always equal to `replay_ordinal`.
    pub world_time: i64,
    /// Observational timestamp. Not part of the hash chain.
    pub wall_time_utc: DateTime<Utc>,
    /// 32-byte hash of the previous event's payload, or [`GENESIS_HASH`] for
    /// the first event in a campaign.
    ///
    /// [`GENESIS_HASH`]: crate::hashing::GENESIS_HASH
    #[serde(with = "hash_32_hex")]
    pub prev_event_hash: PayloadHash,
    /// SHA-256 of the canonical bytes of `payload`.
    #[serde(with = "hash_32_hex")]
    pub payload_hash: PayloadHash,
    /// 16-byte key unique per `(campaign_id, idempotency_key)`.
    #[serde(with = "hash_16_hex")]
    pub idempotency_key: IdempotencyKey,
    /// Provenance fields, not part of the hash chain.
    #[serde(flatten)]
    pub provenance: Provenance,
    /// The structured event payload.
    pub payload: Value,
    /// Set when a schema migrator rewrote this event from an earlier
    /// version.
    pub migrator_applied_from: Option<i32>,
}

mod hash_32_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod hash_16_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 16], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        <[u8; 16]>::try_from(bytes.as_slice())
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

/// The closed set of core (non-importer) event types (`§6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreEventType {
    /// Damage applied to a target.
    ApplyDamage,
    /// Healing applied to a target.
    Heal,
    /// A condition was applied to a target.
    ConditionApplied,
    /// A condition was removed from a target.
    ConditionRemoved,
    /// All conditions were cleared from a target.
    ConditionCleared,
    /// The initiative table was replaced.
    InitiativeSet,
    /// One initiative entry was updated.
    InitiativeUpdate,
    /// One initiative entry was removed.
    InitiativeRemove,
    /// A rules check was performed.
    CheckPerformed,
    /// A tool was executed.
    ToolExecute,
}

impl CoreEventType {
    /// The wire-level string tag for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApplyDamage => "apply_damage",
            Self::Heal => "heal",
            Self::ConditionApplied => "condition.applied",
            Self::ConditionRemoved => "condition.removed",
            Self::ConditionCleared => "condition.cleared",
            Self::InitiativeSet => "initiative.set",
            Self::InitiativeUpdate => "initiative.update",
            Self::InitiativeRemove => "initiative.remove",
            Self::CheckPerformed => "check.performed",
            Self::ToolExecute => "tool.execute",
        }
    }
}

/// The closed set of seed event types emitted by the importer (`§6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedEventType {
    /// The package manifest was validated.
    ManifestValidated,
    /// One entity was created.
    EntityCreated,
    /// One edge was created.
    EdgeCreated,
    /// One tag was registered.
    TagRegistered,
    /// One affordance was registered.
    AffordanceRegistered,
    /// One lore content chunk was ingested.
    ContentChunkIngested,
    /// The import run completed.
    ImportComplete,
}

impl SeedEventType {
    /// The wire-level string tag for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ManifestValidated => "seed.manifest.validated",
            Self::EntityCreated => "seed.entity_created",
            Self::EdgeCreated => "seed.edge_created",
            Self::TagRegistered => "seed.tag_registered",
            Self::AffordanceRegistered => "seed.affordance_registered",
            Self::ContentChunkIngested => "seed.content_chunk_ingested",
            Self::ImportComplete => "seed.import.complete",
        }
    }
}

/// Audit-trail action recorded per imported object (`§3`, `ImportLog`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    /// The object passed validation.
    Validated,
    /// A new seed event was created for the object.
    Created,
    /// An identical object already existed; no new event was created.
    SkippedIdempotent,
    /// The phase finished (terminal marker, one per phase).
    Completed,
}

/// One row of the importer's per-run audit trail (`§3`, `ImportLog`).
///
/// Sequence numbers are dense per `run_id`; gaps indicate a bug in the
/// importer's bookkeeping and fail finalization (`§4.6`, phase f).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    /// The import run this entry belongs to.
    pub run_id: uuid::Uuid,
    /// Phase name (`manifest`, `entity`, `edge`, `ontology`, `lore`,
    /// `finalize`).
    pub phase: String,
    /// Dense, zero-based sequence number within `run_id`.
    pub sequence: i32,
    /// Stable id of the affected object, if any.
    pub stable_id: Option<String>,
    /// SHA-256 of the source file, if any.
    #[serde(with = "option_hash_32_hex")]
    pub file_hash: Option<PayloadHash>,
    /// The action taken for this object.
    pub action: ImportAction,
    /// Free-form metadata (e.g. collision details).
    pub metadata: Option<Value>,
}

mod option_hash_32_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<[u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 32]>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|text| {
            let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
        })
        .transpose()
    }
}
