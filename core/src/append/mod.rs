//! Event append coordinator (`§4.3`).
//!
//! Owns the only path by which new rows are added to the event ledger:
//! compute the idempotency key, take the per-campaign critical section,
//! resolve the next dense ordinal and chain link, and insert. Concurrent
//! identical appends collapse to exactly one applied event; concurrent
//! distinct appends for the same campaign serialize through the lock so the
//! ordinal/chain-link race never reaches storage in the common case, and is
//! still handled correctly (by retrying) when it does.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::canonical::CanonicalError;
use crate::hashing::{self, IdempotencyInputs, GENESIS_HASH};
use crate::ledger::{Event, Provenance};
use crate::metrics::MetricsSink;
use crate::ports::{LedgerStorage, NewEvent, StorageError};

/// Default bounded exponential backoff applied between ordinal-conflict
/// retries, used when a coordinator is built with [`AppendCoordinator::new`]
/// rather than [`AppendCoordinator::with_retry_policy`].
const DEFAULT_BACKOFF_BASE_MS: u64 = 50;
const DEFAULT_BACKOFF_FACTOR: u32 = 2;
const DEFAULT_MAX_ORDINAL_RETRIES: u32 = 5;

/// Tunable parameters for the ordinal-conflict retry loop (`§9`, carried
/// from [`crate::config::LedgerSettings`]).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of ordinal-conflict retries before giving up.
    pub max_ordinal_retries: u32,
    /// Base delay, in milliseconds, for the exponential backoff.
    pub backoff_base_ms: u64,
    /// Multiplicative factor applied to the backoff delay after each retry.
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_ordinal_retries: DEFAULT_MAX_ORDINAL_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Everything needed to construct one new event, short of the ordinal and
/// hash-chain link the coordinator resolves itself.
#[derive(Debug, Clone)]
pub struct AppendRequest<'a> {
    /// The owning campaign.
    pub campaign_id: i64,
    /// The scene this event was raised in, if any.
    pub scene_id: Option<i64>,
    /// Short string tag identifying the event's shape.
    pub event_type: String,
    /// Schema version for `payload`.
    pub event_schema_version: i32,
    /// The structured event payload.
    pub payload: serde_json::Value,
    /// Provenance fields, not part of the hash chain.
    pub provenance: Provenance,
    /// The components hashed into this append's idempotency key.
    pub idempotency: IdempotencyInputs<'a>,
}

/// Outcome of a successful [`AppendCoordinator::append`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new event was durably appended.
    Applied(Event),
    /// An event with this idempotency key already existed; no new event was
    /// created and the existing one is returned.
    IdempotentReuse(Event),
}

impl AppendOutcome {
    /// The event this outcome carries, whichever variant it is.
    #[must_use]
    pub fn event(&self) -> &Event {
        match self {
            Self::Applied(event) | Self::IdempotentReuse(event) => event,
        }
    }
}

/// Errors surfaced by [`AppendCoordinator::append`].
#[derive(Debug, Error)]
pub enum AppendError {
    /// The payload or idempotency inputs could not be canonicalized.
    #[error("failed to canonicalize append inputs: {0}")]
    Canonical(#[from] CanonicalError),
    /// The storage adapter reported a non-recoverable error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// An idempotency conflict was reported by storage, but no event could
    /// subsequently be found under that key. Indicates a storage adapter
    /// bug or a concurrent delete.
    #[error("idempotency conflict reported but no event found for campaign {campaign_id}")]
    IdempotencyConflictUnresolved {
        /// The campaign the conflicting insert targeted.
        campaign_id: i64,
    },
    /// The ordinal/chain-link race was lost `max_ordinal_retries` times in a
    /// row. Indicates sustained contention far beyond what the per-campaign
    /// lock is expected to allow, most likely multiple coordinator
    /// processes writing to the same campaign without a shared lock.
    #[error("exhausted {max_ordinal_retries} retries resolving an ordinal conflict for campaign {campaign_id}")]
    OrdinalRetriesExhausted {
        /// The campaign the conflicting insert targeted.
        campaign_id: i64,
        /// The retry budget that was exhausted.
        max_ordinal_retries: u32,
    },
}

/// Coordinates appends to the event ledger for all campaigns.
///
/// Holds one [`tokio::sync::Mutex`] per campaign, created lazily, so that
/// concurrent appends to different campaigns never block one another.
pub struct AppendCoordinator<S> {
    storage: Arc<S>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    locks: AsyncMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
    retry_policy: RetryPolicy,
}

impl<S> AppendCoordinator<S>
where
    S: LedgerStorage,
{
    /// Construct a coordinator over `storage`, recording outcomes to
    /// `metrics` and stamping `wall_time_utc` from `clock`, using the
    /// default retry policy. Use [`Self::with_retry_policy`] to apply
    /// `LedgerSettings`-derived tuning.
    pub fn new(storage: Arc<S>, metrics: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>) -> Self {
        Self::with_retry_policy(storage, metrics, clock, RetryPolicy::default())
    }

    /// Construct a coordinator with an explicit [`RetryPolicy`].
    pub fn with_retry_policy(
        storage: Arc<S>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            metrics,
            clock,
            locks: AsyncMutex::new(HashMap::new()),
            retry_policy,
        }
    }

    async fn campaign_lock(&self, campaign_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(campaign_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop `lock` from the map if nothing else references it: `self.locks`
    /// plus the caller's own `Arc` together account for 2; if strong_count
    /// is still 2 once the caller is done with it, no other append is
    /// waiting on it. Without this, the map would grow with every distinct
    /// campaign_id ever appended to, never shrinking.
    async fn release_campaign_lock(&self, campaign_id: i64, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&campaign_id);
        }
    }

    /// Append one event, per the algorithm in `§4.3`.
    ///
    /// # Errors
    ///
    /// See [`AppendError`].
    pub async fn append(&self, request: AppendRequest<'_>) -> Result<AppendOutcome, AppendError> {
        let campaign_id = request.campaign_id;
        let lock = self.campaign_lock(campaign_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(request).await
        };
        self.release_campaign_lock(campaign_id, lock).await;
        result
    }

    async fn append_locked(&self, request: AppendRequest<'_>) -> Result<AppendOutcome, AppendError> {
        let started = std::time::Instant::now();
        let idempotency_key = hashing::idempotency_key_v2(&request.idempotency)?;

        if let Some(existing) = self
            .storage
            .find_by_idempotency_key(request.campaign_id, idempotency_key)
            .await?
        {
            self.metrics.incr_events_idempotent_reuse().await;
            self.record_latency(started).await;
            return Ok(AppendOutcome::IdempotentReuse(existing));
        }

        let payload_hash = hashing::payload_hash(&request.payload)?;

        let mut attempt = 0;
        loop {
            let latest = self.storage.latest_event(request.campaign_id).await?;
            let (replay_ordinal, prev_event_hash) = match &latest {
                Some(event) => (event.replay_ordinal + 1, event.payload_hash),
                None => (0, GENESIS_HASH),
            };

            let new_event = NewEvent {
                campaign_id: request.campaign_id,
                scene_id: request.scene_id,
                replay_ordinal,
                event_type: request.event_type.clone(),
                event_schema_version: request.event_schema_version,
                world_time: replay_ordinal,
                wall_time_utc: self.clock.utc(),
                prev_event_hash,
                payload_hash,
                idempotency_key,
                provenance: request.provenance.clone(),
                payload: request.payload.clone(),
            };

            match self.storage.insert_event(new_event).await {
                Ok(event) => {
                    tracing::info!(
                        campaign_id = request.campaign_id,
                        replay_ordinal,
                        event_type = %request.event_type,
                        "event.applied"
                    );
                    self.metrics.incr_events_applied().await;
                    self.record_latency(started).await;
                    return Ok(AppendOutcome::Applied(event));
                }
                Err(StorageError::IdempotencyConflict { campaign_id }) => {
                    let existing = self
                        .storage
                        .find_by_idempotency_key(campaign_id, idempotency_key)
                        .await?
                        .ok_or(AppendError::IdempotencyConflictUnresolved { campaign_id })?;
                    self.metrics.incr_events_idempotent_reuse().await;
                    self.record_latency(started).await;
                    return Ok(AppendOutcome::IdempotentReuse(existing));
                }
                Err(StorageError::OrdinalConflict { campaign_id, ordinal }) => {
                    self.metrics.incr_events_ordinal_conflict().await;
                    attempt += 1;
                    if attempt >= self.retry_policy.max_ordinal_retries {
                        return Err(AppendError::OrdinalRetriesExhausted {
                            campaign_id,
                            max_ordinal_retries: self.retry_policy.max_ordinal_retries,
                        });
                    }
                    tracing::debug!(campaign_id, ordinal, attempt, "event.ordinal_conflict.retry");
                    tokio::time::sleep(backoff_delay(&self.retry_policy, attempt)).await;
                }
                Err(other) => return Err(AppendError::Storage(other)),
            }
        }
    }

    async fn record_latency(&self, started: std::time::Instant) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "append latency is bounded by the retry budget and cannot realistically exceed u64::MAX ms"
        )]
        let millis = started.elapsed().as_millis() as u64;
        self.metrics.record_apply_latency_ms(millis).await;
    }
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    Duration::from_millis(policy.backoff_base_ms)
        .saturating_mul(policy.backoff_factor.saturating_pow(attempt.saturating_sub(1)))
}
