//! In-memory [`LedgerStorage`] adapter.
//!
//! Used by the integration tests and by callers that want to exercise the
//! append coordinator, verifier, or importer without a PostgreSQL instance.
//! Import transactions are modeled as a snapshot taken at
//! [`begin_import_transaction`](LedgerStorage::begin_import_transaction) and
//! restored on rollback.

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::hashing::IdempotencyKey;
use crate::ledger::{Event, ImportLogEntry};
use crate::ports::{LedgerStorage, NewEvent, StorageError};

#[derive(Debug, Clone, Default)]
struct State {
    events: Vec<Event>,
    import_log: Vec<ImportLogEntry>,
}

/// In-memory, process-local [`LedgerStorage`].
#[derive(Debug, Default)]
pub struct InMemoryLedgerStorage {
    state: Mutex<State>,
    snapshot: Mutex<Option<State>>,
}

impl InMemoryLedgerStorage {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStorage for InMemoryLedgerStorage {
    async fn latest_event(&self, campaign_id: i64) -> Result<Option<Event>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.campaign_id == campaign_id)
            .max_by_key(|event| event.replay_ordinal)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        campaign_id: i64,
        key: IdempotencyKey,
    ) -> Result<Option<Event>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .find(|event| event.campaign_id == campaign_id && event.idempotency_key == key)
            .cloned())
    }

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StorageError> {
        let mut state = self.state.lock().await;
        if state.events.iter().any(|event| {
            event.campaign_id == new_event.campaign_id
                && event.idempotency_key == new_event.idempotency_key
        }) {
            return Err(StorageError::IdempotencyConflict {
                campaign_id: new_event.campaign_id,
            });
        }
        if state.events.iter().any(|event| {
            event.campaign_id == new_event.campaign_id
                && event.replay_ordinal == new_event.replay_ordinal
        }) {
            return Err(StorageError::OrdinalConflict {
                campaign_id: new_event.campaign_id,
                ordinal: new_event.replay_ordinal,
            });
        }

        #[expect(
            clippy::cast_possible_wrap,
            reason = "in-memory surrogate key, never approaches i64::MAX"
        )]
        let event_id = state.events.len() as i64 + 1;
        let event = Event {
            event_id: Some(event_id),
            campaign_id: new_event.campaign_id,
            scene_id: new_event.scene_id,
            replay_ordinal: new_event.replay_ordinal,
            event_type: new_event.event_type,
            event_schema_version: new_event.event_schema_version,
            world_time: new_event.world_time,
            wall_time_utc: new_event.wall_time_utc,
            prev_event_hash: new_event.prev_event_hash,
            payload_hash: new_event.payload_hash,
            idempotency_key: new_event.idempotency_key,
            provenance: new_event.provenance,
            payload: new_event.payload,
            migrator_applied_from: None,
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn list_campaign_events(&self, campaign_id: i64) -> Result<Vec<Event>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn append_import_log(&self, entry: ImportLogEntry) -> Result<(), StorageError> {
        self.state.lock().await.import_log.push(entry);
        Ok(())
    }

    async fn list_import_log(&self, run_id: Uuid) -> Result<Vec<ImportLogEntry>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .import_log
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn begin_import_transaction(&self) -> Result<(), StorageError> {
        let mut snapshot = self.snapshot.lock().await;
        if snapshot.is_some() {
            return Err(StorageError::TransactionAlreadyActive);
        }
        *snapshot = Some(self.state.lock().await.clone());
        Ok(())
    }

    async fn commit_import_transaction(&self) -> Result<(), StorageError> {
        let mut snapshot = self.snapshot.lock().await;
        if snapshot.take().is_none() {
            return Err(StorageError::NoActiveTransaction);
        }
        Ok(())
    }

    async fn rollback_import_transaction(&self) -> Result<(), StorageError> {
        let mut snapshot = self.snapshot.lock().await;
        let Some(saved) = snapshot.take() else {
            return Err(StorageError::NoActiveTransaction);
        };
        *self.state.lock().await = saved;
        Ok(())
    }
}
