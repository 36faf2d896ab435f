//! Storage port defining the edge of the hexagon between core logic and
//! durable storage.
//!
//! Mirrors the teacher's `domain::ports` style: a single trait with a
//! strongly typed error enum, so adapters (PostgreSQL, in-memory) map their
//! own failures into predictable variants instead of leaking driver errors.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::hashing::IdempotencyKey;
use crate::ledger::{Event, ImportLogEntry, Provenance};
use serde_json::Value;

/// A not-yet-persisted event, as constructed by the append coordinator
/// before a `event_id` has been assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// The owning campaign.
    pub campaign_id: i64,
    /// The scene this event was raised in, if any.
    pub scene_id: Option<i64>,
    /// Dense, per-campaign, zero-based sequence number.
    pub replay_ordinal: i64,
    /// Short string tag identifying the event's shape.
    pub event_type: String,
    /// Schema version for `payload`.
    pub event_schema_version: i32,
    /// Logical clock value, equal to `replay_ordinal`.
    pub world_time: i64,
    /// Observational timestamp.
    pub wall_time_utc: chrono::DateTime<chrono::Utc>,
    /// Hash of the previous event in this campaign's chain.
    pub prev_event_hash: [u8; 32],
    /// SHA-256 of the canonical bytes of `payload`.
    pub payload_hash: [u8; 32],
    /// 16-byte idempotency key.
    pub idempotency_key: IdempotencyKey,
    /// Provenance fields.
    pub provenance: Provenance,
    /// The structured event payload.
    pub payload: Value,
}

/// Errors surfaced by the [`LedgerStorage`] port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The storage backend is unreachable or the connection pool is
    /// exhausted.
    #[error("storage connection failed: {message}")]
    Connection {
        /// Adapter-supplied diagnostic message.
        message: String,
    },
    /// `UNIQUE(campaign_id, idempotency_key)` was violated on insert.
    #[error("idempotency key conflict for campaign {campaign_id}")]
    IdempotencyConflict {
        /// The campaign the conflicting insert targeted.
        campaign_id: i64,
    },
    /// `UNIQUE(campaign_id, replay_ordinal)` was violated on insert.
    #[error("ordinal conflict for campaign {campaign_id} at ordinal {ordinal}")]
    OrdinalConflict {
        /// The campaign the conflicting insert targeted.
        campaign_id: i64,
        /// The ordinal that was already occupied.
        ordinal: i64,
    },
    /// A write failed for a reason other than a uniqueness violation.
    #[error("storage write failed: {message}")]
    Write {
        /// Adapter-supplied diagnostic message.
        message: String,
    },
    /// An operation that requires an open import transaction was attempted
    /// without one.
    #[error("no active import transaction")]
    NoActiveTransaction,
    /// A second import transaction was started while one was already open.
    #[error("an import transaction is already active")]
    TransactionAlreadyActive,
}

impl StorageError {
    /// Helper for connection-level adapter errors.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Helper for generic write-path adapter errors.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write { message: message.into() }
    }
}

/// The storage port: persistence for events and the importer's audit trail.
///
/// Implementations must guarantee `UNIQUE(campaign_id, replay_ordinal)` and
/// `UNIQUE(campaign_id, idempotency_key)` at the storage layer itself (for
/// PostgreSQL, via the schema in `migrations/`), not merely in application
/// code — a second writer bypassing the append coordinator must still be
/// rejected.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Fetch the highest-ordinal event for `campaign_id`, if any.
    async fn latest_event(&self, campaign_id: i64) -> Result<Option<Event>, StorageError>;

    /// Fetch the event uniquely identified by `(campaign_id,
    /// idempotency_key)`, if one exists.
    async fn find_by_idempotency_key(
        &self,
        campaign_id: i64,
        key: IdempotencyKey,
    ) -> Result<Option<Event>, StorageError>;

    /// Insert `new_event`, assigning it a surrogate `event_id`.
    ///
    /// Returns [`StorageError::IdempotencyConflict`] or
    /// [`StorageError::OrdinalConflict`] when the corresponding uniqueness
    /// constraint is violated; callers interpret these as recoverable
    /// (`§4.3`).
    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StorageError>;

    /// List every event for `campaign_id`, in storage order (ordinal
    /// ascending; callers should not assume this and should sort
    /// defensively per `§4.4`).
    async fn list_campaign_events(&self, campaign_id: i64) -> Result<Vec<Event>, StorageError>;

    /// Append one row to the importer's audit trail.
    async fn append_import_log(&self, entry: ImportLogEntry) -> Result<(), StorageError>;

    /// List every audit-trail row for `run_id`, in sequence order.
    async fn list_import_log(&self, run_id: Uuid) -> Result<Vec<ImportLogEntry>, StorageError>;

    /// Open the single transaction scope an import run executes inside.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionAlreadyActive`] if one is already
    /// open.
    async fn begin_import_transaction(&self) -> Result<(), StorageError>;

    /// Commit the open import transaction, making its events and audit-trail
    /// rows durable.
    async fn commit_import_transaction(&self) -> Result<(), StorageError>;

    /// Roll back the open import transaction, discarding every event and
    /// audit-trail row written since [`begin_import_transaction`] was
    /// called.
    ///
    /// [`begin_import_transaction`]: Self::begin_import_transaction
    async fn rollback_import_transaction(&self) -> Result<(), StorageError>;
}
