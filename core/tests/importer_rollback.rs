//! Integration coverage for the content importer's six-phase pipeline
//! (`§4.6`): the happy path, idempotent re-runs, and rollback on a
//! mid-pipeline collision.

use std::path::PathBuf;
use std::sync::Arc;

use ledger_core::append::AppendCoordinator;
use ledger_core::importer::{ImportRunConfig, Importer, ImporterFeatures};
use ledger_core::metrics::{InMemoryMetricsSink, MetricsSink};
use ledger_core::outbound::memory::InMemoryLedgerStorage;
use mockable::DefaultClock;
use rand::SeedableRng;
use rand::rngs::SmallRng;

const CAMPAIGN_ID: i64 = 1;

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/demo-package")
}

fn build_importer() -> (Arc<InMemoryLedgerStorage>, Importer<InMemoryLedgerStorage>) {
    let storage = Arc::new(InMemoryLedgerStorage::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetricsSink::default());
    let coordinator = Arc::new(AppendCoordinator::new(
        storage.clone(),
        metrics.clone(),
        Arc::new(DefaultClock),
    ));
    let importer = Importer::new(storage.clone(), coordinator, metrics, Arc::new(DefaultClock));
    (storage, importer)
}

fn run_config() -> ImportRunConfig {
    ImportRunConfig {
        campaign_id: CAMPAIGN_ID,
        package_root: fixture_root(),
        features: ImporterFeatures::default(),
    }
}

#[tokio::test]
async fn a_clean_run_registers_every_phase_object() {
    let (storage, importer) = build_importer();
    let mut rng = SmallRng::seed_from_u64(1);

    let summary = importer
        .run(&run_config(), &mut rng)
        .await
        .expect("import run should succeed");

    assert_eq!(summary.entity_count, 3);
    assert_eq!(summary.edge_count, 2);
    assert_eq!(summary.tag_count, 2);
    assert_eq!(summary.affordance_count, 2);
    assert_eq!(summary.chunk_count, 2);

    let events = storage
        .list_campaign_events(CAMPAIGN_ID)
        .await
        .expect("list events");
    // manifest + 3 entities + 2 edges + 2 tags + 2 affordances + 2 chunks + completion.
    assert_eq!(events.len(), 13);
}

#[tokio::test]
async fn a_second_run_of_the_same_package_is_fully_idempotent() {
    let (storage, importer) = build_importer();
    let mut rng = SmallRng::seed_from_u64(2);

    importer
        .run(&run_config(), &mut rng)
        .await
        .expect("first run should succeed");
    let events_after_first = storage
        .list_campaign_events(CAMPAIGN_ID)
        .await
        .expect("list events")
        .len();

    let mut rng = SmallRng::seed_from_u64(3);
    let summary = importer
        .run(&run_config(), &mut rng)
        .await
        .expect("second run should also succeed, as a no-op");

    assert_eq!(summary.entity_count, 3);
    let events_after_second = storage
        .list_campaign_events(CAMPAIGN_ID)
        .await
        .expect("list events")
        .len();
    assert_eq!(
        events_after_first, events_after_second,
        "idempotent re-import must not create new events"
    );
}

#[tokio::test]
async fn a_feature_gated_phase_aborts_and_rolls_back() {
    let (storage, importer) = build_importer();
    let mut config = run_config();
    config.features.entities = false;

    let mut rng = SmallRng::seed_from_u64(4);
    let error = importer
        .run(&config, &mut rng)
        .await
        .expect_err("entity phase should be refused");

    assert!(error.to_string().contains("entities"));
    let events = storage
        .list_campaign_events(CAMPAIGN_ID)
        .await
        .expect("list events");
    assert!(
        events.is_empty(),
        "a rolled-back run must leave no events behind, even the manifest's"
    );
    let log = storage
        .list_import_log(uuid::Uuid::nil())
        .await
        .expect("list import log");
    assert!(log.is_empty());
}

#[tokio::test]
async fn a_missing_package_root_fails_before_any_phase_runs() {
    let (storage, importer) = build_importer();
    let config = ImportRunConfig {
        campaign_id: CAMPAIGN_ID,
        package_root: fixture_root().join("does-not-exist"),
        features: ImporterFeatures::default(),
    };

    let mut rng = SmallRng::seed_from_u64(5);
    importer
        .run(&config, &mut rng)
        .await
        .expect_err("missing package root should fail");

    let events = storage
        .list_campaign_events(CAMPAIGN_ID)
        .await
        .expect("list events");
    assert!(events.is_empty());
}
