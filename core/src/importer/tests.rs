//! Phase-level edge cases not exercised by the end-to-end integration test
//! in `core/tests/importer_rollback.rs`: conflicting content under one
//! identifier, a dangling edge reference, an inverted validity window, and
//! an ontology conflicting definition.

use std::collections::HashSet;
use std::sync::Arc;

use mockable::DefaultClock;
use uuid::Uuid;

use crate::append::AppendCoordinator;
use crate::metrics::{InMemoryMetricsSink, MetricsSink};
use crate::outbound::memory::InMemoryLedgerStorage;

use super::package::PackageDir;
use super::{edges, entities, lore, ontology, Importer, ImporterError};

const CAMPAIGN_ID: i64 = 1;

fn build_importer() -> Importer<InMemoryLedgerStorage> {
    let storage = Arc::new(InMemoryLedgerStorage::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetricsSink::default());
    let coordinator = Arc::new(AppendCoordinator::new(
        storage.clone(),
        metrics.clone(),
        Arc::new(DefaultClock),
    ));
    Importer::new(storage, coordinator, metrics, Arc::new(DefaultClock))
}

fn write(dir: &std::path::Path, relative: &str, contents: &str) {
    let full = dir.join(relative);
    std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
    std::fs::write(full, contents).expect("write fixture");
}

#[tokio::test]
async fn entity_phase_rejects_conflicting_content_under_one_stable_id() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "entities/a.json",
        r#"{"stable_id":"01J8Z1N3K2M9P6R3T0V7W4X1YD","kind":"npc","name":"Alice","tags":[],"affordances":[]}"#,
    );
    write(
        temp.path(),
        "entities/b.json",
        r#"{"stable_id":"01J8Z1N3K2M9P6R3T0V7W4X1YD","kind":"npc","name":"Bob","tags":[],"affordances":[]}"#,
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;

    let error = entities::run_phase(&package, CAMPAIGN_ID, Uuid::nil(), &mut sequence, &importer)
        .await
        .expect_err("conflicting entity content must fail the phase");

    assert!(matches!(error, ImporterError::EntityCollision(_)));
}

#[tokio::test]
async fn edge_phase_rejects_a_dangling_reference() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "edges/a.json",
        r#"{"stable_id":"01J8Z1N3K2M9P6R3T0V7W4X1YE","type":"owns","src_ref":"01J8Z1N3K2M9P6R3T0V7W4X1YD","dst_ref":"01J8Z1N3K2M9P6R3T0V7W4X1YF","attributes":{"acquired":"found it"}}"#,
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;
    let known_entities: HashSet<String> = HashSet::new();

    let error = edges::run_phase(
        &package,
        CAMPAIGN_ID,
        Uuid::nil(),
        &mut sequence,
        &known_entities,
        &importer,
    )
    .await
    .expect_err("a reference to an unregistered entity must fail the phase");

    assert!(matches!(
        error,
        ImporterError::EdgeCollision(edges::EdgeCollisionError::DanglingReference { .. })
    ));
}

#[tokio::test]
async fn edge_phase_rejects_an_inverted_validity_window() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "edges/a.json",
        r#"{"stable_id":"01J8Z1N3K2M9P6R3T0V7W4X1YE","type":"owns","src_ref":"01J8Z1N3K2M9P6R3T0V7W4X1YD","dst_ref":"01J8Z1N3K2M9P6R3T0V7W4X1YF","attributes":{"acquired":"found it"},"validity":{"start_event_id":10,"end_event_id":1}}"#,
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;
    let mut known_entities: HashSet<String> = HashSet::new();
    known_entities.insert("01J8Z1N3K2M9P6R3T0V7W4X1YD".to_owned());
    known_entities.insert("01J8Z1N3K2M9P6R3T0V7W4X1YF".to_owned());

    let error = edges::run_phase(
        &package,
        CAMPAIGN_ID,
        Uuid::nil(),
        &mut sequence,
        &known_entities,
        &importer,
    )
    .await
    .expect_err("an inverted validity window must fail the phase");

    assert!(matches!(
        error,
        ImporterError::EdgeCollision(edges::EdgeCollisionError::InvertedValidity { .. })
    ));
}

#[tokio::test]
async fn edge_phase_enforces_the_required_attribute_subset_for_the_edge_type() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "edges/a.json",
        r#"{"stable_id":"01J8Z1N3K2M9P6R3T0V7W4X1YE","type":"owns","src_ref":"01J8Z1N3K2M9P6R3T0V7W4X1YD","dst_ref":"01J8Z1N3K2M9P6R3T0V7W4X1YF","attributes":{}}"#,
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;
    let mut known_entities: HashSet<String> = HashSet::new();
    known_entities.insert("01J8Z1N3K2M9P6R3T0V7W4X1YD".to_owned());
    known_entities.insert("01J8Z1N3K2M9P6R3T0V7W4X1YF".to_owned());

    let error = edges::run_phase(
        &package,
        CAMPAIGN_ID,
        Uuid::nil(),
        &mut sequence,
        &known_entities,
        &importer,
    )
    .await
    .expect_err("an owns edge missing its required acquired attribute must fail schema validation");

    assert!(matches!(error, ImporterError::Phase { phase: "edge", .. }));
}

#[tokio::test]
async fn ontology_phase_rejects_conflicting_tag_definitions() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "ontology/tags/a.json",
        r#"{"id":"coastal","label":"Coastal"}"#,
    );
    write(
        temp.path(),
        "ontology/tags/b.json",
        r#"{"id":"Coastal","label":"Shoreline"}"#,
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;

    let error = ontology::run_phase(&package, CAMPAIGN_ID, Uuid::nil(), &mut sequence, &importer)
        .await
        .expect_err("two tags normalizing to the same id with different labels must fail the phase");

    assert!(matches!(error, ImporterError::OntologyConflict(_)));
}

#[tokio::test]
async fn lore_phase_splits_on_heading_levels_up_to_six() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "lore/deep.md",
        "---\nchunk_id: DEEP\ntitle: Deep\naudience: Player\ntags: []\n---\n## Intro\n\nSome intro text.\n\n#### Deep dive\n\nA level-four heading must still start a new chunk.\n",
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;

    let outcome = lore::run_phase(&package, CAMPAIGN_ID, Uuid::nil(), &mut sequence, false, &importer)
        .await
        .expect("lore phase should succeed");

    assert_eq!(
        outcome.registered.len(),
        2,
        "a level-four heading must split into its own chunk, not fold into the preceding section"
    );
}

#[tokio::test]
async fn lore_phase_rejects_conflicting_chunk_content_across_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    write(
        temp.path(),
        "lore/one.md",
        "---\nchunk_id: DUP\ntitle: One\naudience: Player\ntags: []\n---\nFirst body.\n",
    );
    write(
        temp.path(),
        "lore/two.md",
        "---\nchunk_id: DUP\ntitle: One\naudience: Player\ntags: []\n---\nSecond, different body.\n",
    );

    let package = PackageDir::open(temp.path()).expect("open package");
    let importer = build_importer();
    let mut sequence = 0i32;

    let error = lore::run_phase(&package, CAMPAIGN_ID, Uuid::nil(), &mut sequence, false, &importer)
        .await
        .expect_err("two files producing the same chunk_id with different content must fail the phase");

    assert!(matches!(error, ImporterError::LoreCollision(_)));
}
