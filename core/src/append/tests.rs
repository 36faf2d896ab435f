//! Regression coverage for this module, including the retry-storm scenario
//! `§8` requires: many concurrent identical appends collapse to one applied
//! event.

use std::sync::Arc;

use mockable::DefaultClock;
use serde_json::json;
use tokio::sync::Mutex;

use super::*;
use crate::metrics::InMemoryMetricsSink;

/// An in-memory [`LedgerStorage`] stub used only by this module's tests.
///
/// Mirrors the uniqueness semantics a real schema enforces, so the
/// coordinator's conflict-handling paths are exercised the same way they
/// would be against PostgreSQL.
#[derive(Default)]
struct MemoryStorage {
    events: Mutex<Vec<Event>>,
    import_log: Mutex<Vec<crate::ledger::ImportLogEntry>>,
    in_transaction: Mutex<bool>,
}

#[async_trait::async_trait]
impl LedgerStorage for MemoryStorage {
    async fn latest_event(&self, campaign_id: i64) -> Result<Option<Event>, StorageError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|event| event.campaign_id == campaign_id)
            .max_by_key(|event| event.replay_ordinal)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        campaign_id: i64,
        key: crate::hashing::IdempotencyKey,
    ) -> Result<Option<Event>, StorageError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .find(|event| event.campaign_id == campaign_id && event.idempotency_key == key)
            .cloned())
    }

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StorageError> {
        let mut events = self.events.lock().await;
        if events.iter().any(|event| {
            event.campaign_id == new_event.campaign_id
                && event.idempotency_key == new_event.idempotency_key
        }) {
            return Err(StorageError::IdempotencyConflict {
                campaign_id: new_event.campaign_id,
            });
        }
        if events.iter().any(|event| {
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
            reason = "test-only in-memory surrogate key, never approaches i64::MAX"
        )]
        let event_id = events.len() as i64 + 1;
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
        events.push(event.clone());
        Ok(event)
    }

    async fn list_campaign_events(&self, campaign_id: i64) -> Result<Vec<Event>, StorageError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|event| event.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn append_import_log(
        &self,
        entry: crate::ledger::ImportLogEntry,
    ) -> Result<(), StorageError> {
        self.import_log.lock().await.push(entry);
        Ok(())
    }

    async fn list_import_log(
        &self,
        run_id: uuid::Uuid,
    ) -> Result<Vec<crate::ledger::ImportLogEntry>, StorageError> {
        let log = self.import_log.lock().await;
        Ok(log.iter().filter(|entry| entry.run_id == run_id).cloned().collect())
    }

    async fn begin_import_transaction(&self) -> Result<(), StorageError> {
        let mut flag = self.in_transaction.lock().await;
        if *flag {
            return Err(StorageError::TransactionAlreadyActive);
        }
        *flag = true;
        Ok(())
    }

    async fn commit_import_transaction(&self) -> Result<(), StorageError> {
        let mut flag = self.in_transaction.lock().await;
        if !*flag {
            return Err(StorageError::NoActiveTransaction);
        }
        *flag = false;
        Ok(())
    }

    async fn rollback_import_transaction(&self) -> Result<(), StorageError> {
        let mut flag = self.in_transaction.lock().await;
        if !*flag {
            return Err(StorageError::NoActiveTransaction);
        }
        *flag = false;
        Ok(())
    }
}

fn coordinator() -> AppendCoordinator<MemoryStorage> {
    AppendCoordinator::new(
        Arc::new(MemoryStorage::default()),
        Arc::new(InMemoryMetricsSink::new()),
        Arc::new(DefaultClock),
    )
}

fn request<'a>(campaign_id: i64, plan_id: &'a str, args: &'a serde_json::Value) -> AppendRequest<'a> {
    AppendRequest {
        campaign_id,
        scene_id: None,
        event_type: "tool.execute".to_owned(),
        event_schema_version: 1,
        payload: json!({"sides": 20}),
        provenance: Provenance::default(),
        idempotency: IdempotencyInputs {
            plan_id: Some(plan_id),
            campaign_id,
            event_type: "tool.execute",
            tool_name: Some("dice_roll"),
            ruleset_version: Some("rs-v1"),
            args_json: Some(args),
        },
    }
}

#[tokio::test]
async fn first_append_starts_at_ordinal_zero_with_genesis_link() {
    let coordinator = coordinator();
    let args = json!({"sides": 20});
    let outcome = coordinator
        .append(request(1, "plan-1", &args))
        .await
        .expect("append succeeds");

    let AppendOutcome::Applied(event) = outcome else {
        panic!("expected a newly applied event");
    };
    assert_eq!(event.replay_ordinal, 0);
    assert_eq!(event.prev_event_hash, GENESIS_HASH);
}

#[tokio::test]
async fn second_distinct_append_chains_from_the_first() {
    let coordinator = coordinator();
    let args = json!({"sides": 20});
    let first = coordinator
        .append(request(1, "plan-1", &args))
        .await
        .expect("append succeeds");
    let second = coordinator
        .append(request(1, "plan-2", &args))
        .await
        .expect("append succeeds");

    let AppendOutcome::Applied(second_event) = second else {
        panic!("expected a newly applied event");
    };
    assert_eq!(second_event.replay_ordinal, 1);
    assert_eq!(second_event.prev_event_hash, first.event().payload_hash);
}

#[tokio::test]
async fn repeated_identical_append_is_idempotent_reuse() {
    let coordinator = coordinator();
    let args = json!({"sides": 20});
    let first = coordinator
        .append(request(1, "plan-1", &args))
        .await
        .expect("append succeeds");
    let second = coordinator
        .append(request(1, "plan-1", &args))
        .await
        .expect("append succeeds");

    assert!(matches!(second, AppendOutcome::IdempotentReuse(_)));
    assert_eq!(first.event().event_id, second.event().event_id);
}

#[tokio::test]
async fn concurrent_identical_appends_collapse_to_one_applied_event() {
    let coordinator = Arc::new(coordinator());
    let args = Arc::new(json!({"sides": 20}));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let coordinator = Arc::clone(&coordinator);
        let args = Arc::clone(&args);
        handles.push(tokio::spawn(async move {
            coordinator.append(request(1, "plan-storm", &args)).await
        }));
    }

    let mut applied = 0;
    let mut reused = 0;
    for handle in handles {
        match handle.await.expect("task does not panic").expect("append succeeds") {
            AppendOutcome::Applied(_) => applied += 1,
            AppendOutcome::IdempotentReuse(_) => reused += 1,
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(reused, 19);
}

#[tokio::test]
async fn distinct_campaigns_do_not_contend_for_the_same_lock() {
    let coordinator = coordinator();
    let args = json!({"sides": 6});

    let first = coordinator
        .append(request(1, "plan-a", &args))
        .await
        .expect("append succeeds");
    let second = coordinator
        .append(request(2, "plan-b", &args))
        .await
        .expect("append succeeds");

    assert_eq!(first.event().replay_ordinal, 0);
    assert_eq!(second.event().replay_ordinal, 0);
}

#[tokio::test]
async fn the_per_campaign_lock_is_released_once_an_append_completes() {
    let coordinator = coordinator();
    let args = json!({"sides": 6});

    for campaign_id in 1..=5 {
        coordinator
            .append(request(campaign_id, "plan-a", &args))
            .await
            .expect("append succeeds");
    }

    let locks = coordinator.locks.lock().await;
    assert_eq!(
        locks.len(),
        0,
        "lock map must not retain entries for campaigns with no in-flight append"
    );
}

/// A storage double that reports an ordinal conflict on every insert, for
/// exercising the retry-exhaustion path deterministically.
#[derive(Default)]
struct AlwaysOrdinalConflictStorage;

#[async_trait::async_trait]
impl LedgerStorage for AlwaysOrdinalConflictStorage {
    async fn latest_event(&self, _campaign_id: i64) -> Result<Option<Event>, StorageError> {
        Ok(None)
    }

    async fn find_by_idempotency_key(
        &self,
        _campaign_id: i64,
        _key: crate::hashing::IdempotencyKey,
    ) -> Result<Option<Event>, StorageError> {
        Ok(None)
    }

    async fn insert_event(&self, new_event: NewEvent) -> Result<Event, StorageError> {
        Err(StorageError::OrdinalConflict {
            campaign_id: new_event.campaign_id,
            ordinal: new_event.replay_ordinal,
        })
    }

    async fn list_campaign_events(&self, _campaign_id: i64) -> Result<Vec<Event>, StorageError> {
        Ok(Vec::new())
    }

    async fn append_import_log(
        &self,
        _entry: crate::ledger::ImportLogEntry,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn list_import_log(
        &self,
        _run_id: uuid::Uuid,
    ) -> Result<Vec<crate::ledger::ImportLogEntry>, StorageError> {
        Ok(Vec::new())
    }

    async fn begin_import_transaction(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn commit_import_transaction(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn rollback_import_transaction(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn a_custom_retry_policy_governs_the_ordinal_retry_budget() {
    let coordinator = AppendCoordinator::with_retry_policy(
        Arc::new(AlwaysOrdinalConflictStorage),
        Arc::new(InMemoryMetricsSink::new()) as Arc<dyn MetricsSink>,
        Arc::new(DefaultClock),
        RetryPolicy {
            max_ordinal_retries: 1,
            backoff_base_ms: 1,
            backoff_factor: 1,
        },
    );

    let args = json!({"sides": 8});
    let error = coordinator
        .append(request(1, "plan-b", &args))
        .await
        .expect_err("every insert conflicts, so the reduced retry budget must be exhausted");

    assert!(matches!(
        error,
        AppendError::OrdinalRetriesExhausted { max_ordinal_retries: 1, .. }
    ));
}
