//! PostgreSQL-backed [`LedgerStorage`], ported from the teacher's
//! `DieselIdempotencyRepository` adapter: connection errors and unique
//! violations are mapped into the port's own error enum so callers never see
//! a raw Diesel type.
//!
//! Ordinary reads and writes use the `bb8` pool in [`super::pool::DbPool`].
//! An import run's transaction scope cannot be modeled as a pooled
//! connection held across the discrete `begin`/`commit`/`rollback` calls
//! this trait exposes (a `bb8::PooledConnection` borrows its pool and
//! cannot outlive one call), so it uses a single dedicated
//! [`AsyncPgConnection`] established directly from `database_url` and held
//! behind a mutex for the run's duration.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::hashing::IdempotencyKey;
use crate::ledger::{Event, ImportAction, ImportLogEntry};
use crate::ports::{LedgerStorage, NewEvent, StorageError};

use super::models::{EventRow, ImportLogRow, NewEventRow, NewImportLogRow};
use super::pool::{DbPool, PoolError};
use super::schema::{events, import_log};

/// Diesel-backed implementation of [`LedgerStorage`].
pub struct PostgresLedgerStorage {
    pool: DbPool,
    database_url: String,
    transaction: Mutex<Option<AsyncPgConnection>>,
}

impl PostgresLedgerStorage {
    /// Create a new adapter over `pool`, establishing a dedicated
    /// connection to `database_url` on demand for import transactions.
    #[must_use]
    pub fn new(pool: DbPool, database_url: impl Into<String>) -> Self {
        Self {
            pool,
            database_url: database_url.into(),
            transaction: Mutex::new(None),
        }
    }
}

fn map_pool_error(error: PoolError) -> StorageError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            StorageError::connection(message)
        }
    }
}

fn map_diesel_error(campaign_id: i64, ordinal: Option<i64>, error: diesel::result::Error) -> StorageError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(error = %error, "diesel operation failed"),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            if info.constraint_name() == Some("ux_events_campaign_idempotency") {
                StorageError::IdempotencyConflict { campaign_id }
            } else {
                StorageError::OrdinalConflict {
                    campaign_id,
                    ordinal: ordinal.unwrap_or_default(),
                }
            }
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            StorageError::connection("database connection error")
        }
        other => StorageError::write(other.to_string()),
    }
}

async fn do_latest_event(
    conn: &mut AsyncPgConnection,
    campaign_id: i64,
) -> Result<Option<Event>, StorageError> {
    let row: Option<EventRow> = events::table
        .filter(events::campaign_id.eq(campaign_id))
        .order(events::replay_ordinal.desc())
        .select(EventRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(|error| map_diesel_error(campaign_id, None, error))?;

    row.map(Event::try_from)
        .transpose()
        .map_err(|error| StorageError::write(error.to_string()))
}

async fn do_find_by_idempotency_key(
    conn: &mut AsyncPgConnection,
    campaign_id: i64,
    key: IdempotencyKey,
) -> Result<Option<Event>, StorageError> {
    let row: Option<EventRow> = events::table
        .filter(
            events::campaign_id
                .eq(campaign_id)
                .and(events::idempotency_key.eq(key.to_vec())),
        )
        .select(EventRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(|error| map_diesel_error(campaign_id, None, error))?;

    row.map(Event::try_from)
        .transpose()
        .map_err(|error| StorageError::write(error.to_string()))
}

async fn do_insert_event(
    conn: &mut AsyncPgConnection,
    new_event: NewEvent,
) -> Result<Event, StorageError> {
    let row = NewEventRow {
        campaign_id: new_event.campaign_id,
        scene_id: new_event.scene_id,
        replay_ordinal: new_event.replay_ordinal,
        event_type: &new_event.event_type,
        event_schema_version: new_event.event_schema_version,
        world_time: new_event.world_time,
        wall_time_utc: new_event.wall_time_utc,
        prev_event_hash: &new_event.prev_event_hash,
        payload_hash: &new_event.payload_hash,
        idempotency_key: &new_event.idempotency_key,
        actor_id: new_event.provenance.actor_id.as_deref(),
        plan_id: new_event.provenance.plan_id.as_deref(),
        execution_request_id: new_event.provenance.execution_request_id.as_deref(),
        approved_by: new_event.provenance.approved_by.as_deref(),
        payload: &new_event.payload,
    };

    let inserted: EventRow = diesel::insert_into(events::table)
        .values(&row)
        .returning(EventRow::as_select())
        .get_result(conn)
        .await
        .map_err(|error| {
            map_diesel_error(new_event.campaign_id, Some(new_event.replay_ordinal), error)
        })?;

    Event::try_from(inserted).map_err(|error| StorageError::write(error.to_string()))
}

async fn do_list_campaign_events(
    conn: &mut AsyncPgConnection,
    campaign_id: i64,
) -> Result<Vec<Event>, StorageError> {
    let rows: Vec<EventRow> = events::table
        .filter(events::campaign_id.eq(campaign_id))
        .order(events::replay_ordinal.asc())
        .select(EventRow::as_select())
        .load(conn)
        .await
        .map_err(|error| map_diesel_error(campaign_id, None, error))?;

    rows.into_iter()
        .map(Event::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| StorageError::write(error.to_string()))
}

fn action_str(action: ImportAction) -> &'static str {
    match action {
        ImportAction::Validated => "validated",
        ImportAction::Created => "created",
        ImportAction::SkippedIdempotent => "skipped_idempotent",
        ImportAction::Completed => "completed",
    }
}

async fn do_append_import_log(
    conn: &mut AsyncPgConnection,
    entry: ImportLogEntry,
) -> Result<(), StorageError> {
    let row = NewImportLogRow {
        run_id: entry.run_id,
        sequence: entry.sequence,
        phase: &entry.phase,
        stable_id: entry.stable_id.as_deref(),
        file_hash: entry.file_hash.as_ref().map(<[u8]>::as_ref),
        action: action_str(entry.action),
        metadata: entry.metadata.as_ref(),
    };

    diesel::insert_into(import_log::table)
        .values(&row)
        .execute(conn)
        .await
        .map_err(|error| StorageError::write(error.to_string()))?;
    Ok(())
}

async fn do_list_import_log(
    conn: &mut AsyncPgConnection,
    run_id: Uuid,
) -> Result<Vec<ImportLogEntry>, StorageError> {
    let rows: Vec<ImportLogRow> = import_log::table
        .filter(import_log::run_id.eq(run_id))
        .order(import_log::sequence.asc())
        .select(ImportLogRow::as_select())
        .load(conn)
        .await
        .map_err(|error| StorageError::write(error.to_string()))?;

    rows.into_iter()
        .map(ImportLogEntry::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| StorageError::write(error.to_string()))
}

#[async_trait]
impl LedgerStorage for PostgresLedgerStorage {
    async fn latest_event(&self, campaign_id: i64) -> Result<Option<Event>, StorageError> {
        let mut guard = self.transaction.lock().await;
        if let Some(conn) = guard.as_mut() {
            return do_latest_event(conn, campaign_id).await;
        }
        drop(guard);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        do_latest_event(&mut conn, campaign_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        campaign_id: i64,
        key: IdempotencyKey,
    ) -> Result<Option<Event>, StorageError> {
        let mut guard = self.transaction.lock().await;
        if let Some(conn) = guard.as_mut() {
            return do_find_by_idempotency_key(conn, campaign_id, key).await;
        }
        drop(guard);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        do_find_by_idempotency_key(&mut conn, campaign_id, key).await
    }

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StorageError> {
        let mut guard = self.transaction.lock().await;
        if let Some(conn) = guard.as_mut() {
            return do_insert_event(conn, new_event).await;
        }
        drop(guard);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        do_insert_event(&mut conn, new_event).await
    }

    async fn list_campaign_events(&self, campaign_id: i64) -> Result<Vec<Event>, StorageError> {
        let mut guard = self.transaction.lock().await;
        if let Some(conn) = guard.as_mut() {
            return do_list_campaign_events(conn, campaign_id).await;
        }
        drop(guard);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        do_list_campaign_events(&mut conn, campaign_id).await
    }

    async fn append_import_log(&self, entry: ImportLogEntry) -> Result<(), StorageError> {
        let mut guard = self.transaction.lock().await;
        if let Some(conn) = guard.as_mut() {
            return do_append_import_log(conn, entry).await;
        }
        drop(guard);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        do_append_import_log(&mut conn, entry).await
    }

    async fn list_import_log(&self, run_id: Uuid) -> Result<Vec<ImportLogEntry>, StorageError> {
        let mut guard = self.transaction.lock().await;
        if let Some(conn) = guard.as_mut() {
            return do_list_import_log(conn, run_id).await;
        }
        drop(guard);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        do_list_import_log(&mut conn, run_id).await
    }

    async fn begin_import_transaction(&self) -> Result<(), StorageError> {
        let mut guard = self.transaction.lock().await;
        if guard.is_some() {
            return Err(StorageError::TransactionAlreadyActive);
        }
        let mut conn = AsyncPgConnection::establish(&self.database_url)
            .await
            .map_err(|error| StorageError::connection(error.to_string()))?;
        diesel::sql_query("BEGIN")
            .execute(&mut conn)
            .await
            .map_err(|error| StorageError::write(error.to_string()))?;
        *guard = Some(conn);
        Ok(())
    }

    async fn commit_import_transaction(&self) -> Result<(), StorageError> {
        let mut guard = self.transaction.lock().await;
        let Some(mut conn) = guard.take() else {
            return Err(StorageError::NoActiveTransaction);
        };
        diesel::sql_query("COMMIT")
            .execute(&mut conn)
            .await
            .map_err(|error| StorageError::write(error.to_string()))?;
        Ok(())
    }

    async fn rollback_import_transaction(&self) -> Result<(), StorageError> {
        let mut guard = self.transaction.lock().await;
        let Some(mut conn) = guard.take() else {
            return Err(StorageError::NoActiveTransaction);
        };
        diesel::sql_query("ROLLBACK")
            .execute(&mut conn)
            .await
            .map_err(|error| StorageError::write(error.to_string()))?;
        Ok(())
    }
}
