//! Content importer pipeline (`§4.6`).
//!
//! Runs a package through six phases — manifest, entity, edge, ontology,
//! lore, finalize — inside a single storage transaction. Every phase emits
//! `ImportLog` rows and, where applicable, seed events through the append
//! coordinator (`§4.3`); any phase failure aborts the run, rolls back the
//! transaction, and increments a phase-scoped rollback counter.

mod edges;
mod entities;
mod finalize;
mod lore;
mod manifest;
mod ontology;
mod package;
mod schemas;

#[cfg(test)]
mod tests;

pub use edges::{EdgeCollisionError, EdgePhaseOutcome};
pub use entities::{EntityCollisionError, EntityPhaseOutcome};
pub use finalize::{FinalizeInputs, ImportSummary};
pub use lore::{LoreChunk, LoreCollisionError, LorePhaseOutcome};
pub use manifest::{Manifest, ManifestValidationError};
pub use ontology::{Affordance, OntologyConflictError, OntologyPhaseOutcome, Tag};
pub use package::PackageError;

use std::sync::Arc;

use mockable::Clock;
use rand::RngCore;
use thiserror::Error;
use uuid::Uuid;

use crate::append::{AppendCoordinator, AppendError};
use crate::hashing::PayloadHash;
use crate::ledger::ImportAction;
use crate::metrics::MetricsSink;
use crate::ports::{LedgerStorage, StorageError};

use package::PackageDir;

/// One object registered during an import run, tracked for the finalize
/// phase's state-digest computation (`§4.6`, phase f).
#[derive(Debug, Clone)]
pub(super) struct RegisteredObject {
    pub(super) stable_id: String,
    pub(super) content_hash: PayloadHash,
}

/// Feature flags gating the importer and its phases (`§4.6`).
#[derive(Debug, Clone, Copy)]
pub struct ImporterFeatures {
    /// Master gate. When `false`, every phase refuses with
    /// [`ImporterError::FeatureDisabled`].
    pub importer: bool,
    /// Gate for the entity phase.
    pub entities: bool,
    /// Gate for the edge phase.
    pub edges: bool,
    /// Whether `embedding_hint` participates in lore chunk content hashes.
    pub embeddings: bool,
}

impl Default for ImporterFeatures {
    fn default() -> Self {
        Self {
            importer: true,
            entities: true,
            edges: true,
            embeddings: false,
        }
    }
}

/// One import run's configuration.
pub struct ImportRunConfig {
    /// Campaign the run's seed events are appended to.
    pub campaign_id: i64,
    /// Root directory of the package on disk.
    pub package_root: std::path::PathBuf,
    /// Feature flags in effect for this run.
    pub features: ImporterFeatures,
}

/// Errors that abort an import run (`§7`).
#[derive(Debug, Error)]
pub enum ImporterError {
    /// The master or a phase feature flag was disabled.
    #[error("importer feature {feature} is disabled")]
    FeatureDisabled {
        /// The flag that refused the run.
        feature: &'static str,
    },
    /// Filesystem or sandboxing failure reading the package.
    #[error(transparent)]
    Package(#[from] PackageError),
    /// Manifest phase failure.
    #[error(transparent)]
    Manifest(#[from] ManifestValidationError),
    /// Entity phase failure.
    #[error(transparent)]
    EntityCollision(#[from] EntityCollisionError),
    /// Edge phase failure.
    #[error(transparent)]
    EdgeCollision(#[from] EdgeCollisionError),
    /// Ontology phase failure.
    #[error(transparent)]
    OntologyConflict(#[from] OntologyConflictError),
    /// Lore phase failure.
    #[error(transparent)]
    LoreCollision(#[from] LoreCollisionError),
    /// A generic phase-level failure: sequence gaps, malformed JSON, and so
    /// on.
    #[error("importer phase {phase} failed: {reason}")]
    Phase {
        /// The phase that failed.
        phase: &'static str,
        /// Human-readable failure detail.
        reason: String,
    },
    /// An append through the coordinator failed.
    #[error(transparent)]
    Append(#[from] AppendError),
    /// The storage adapter reported a failure outside the append path (log
    /// rows, transaction control).
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ImporterError {
    /// The phase name used for the `importer.rollback.<phase>` counter, or
    /// `None` for run-level failures not attributable to one phase.
    #[must_use]
    pub fn phase_name(&self) -> Option<&'static str> {
        match self {
            Self::Manifest(_) => Some("manifest"),
            Self::EntityCollision(_) => Some("entity"),
            Self::EdgeCollision(_) => Some("edge"),
            Self::OntologyConflict(_) => Some("ontology"),
            Self::LoreCollision(_) => Some("lore"),
            Self::Phase { phase, .. } => Some(phase),
            Self::FeatureDisabled { .. } | Self::Package(_) | Self::Append(_) | Self::Storage(_) => {
                None
            }
        }
    }
}

/// Drives one import run end to end.
pub struct Importer<S> {
    storage: Arc<S>,
    coordinator: Arc<AppendCoordinator<S>>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl<S> Importer<S>
where
    S: LedgerStorage,
{
    /// Construct an importer over `storage`, reusing `coordinator` for seed
    /// event appends.
    pub fn new(
        storage: Arc<S>,
        coordinator: Arc<AppendCoordinator<S>>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            coordinator,
            metrics,
            clock,
        }
    }

    /// Run one import, using `rng` to mint this run's `run_id`.
    ///
    /// # Errors
    ///
    /// See [`ImporterError`]. On any error the caller observes, the run's
    /// transaction has already been rolled back and the rollback counter for
    /// the failing phase (if attributable) has already been incremented.
    pub async fn run(
        &self,
        config: &ImportRunConfig,
        rng: &mut dyn RngCore,
    ) -> Result<ImportSummary, ImporterError> {
        if !config.features.importer {
            return Err(ImporterError::FeatureDisabled { feature: "importer" });
        }

        let run_id = Uuid::from_bytes({
            let mut bytes = [0u8; 16];
            rng.fill_bytes(&mut bytes);
            bytes
        });

        self.storage.begin_import_transaction().await?;
        match self.run_inner(config, run_id).await {
            Ok(summary) => {
                self.storage.commit_import_transaction().await?;
                Ok(summary)
            }
            Err(error) => {
                let _ = self.storage.rollback_import_transaction().await;
                if let Some(phase) = error.phase_name() {
                    self.metrics
                        .incr_importer_counter(rollback_counter_name(phase))
                        .await;
                    tracing::warn!(
                        phase,
                        run_id = %run_id,
                        outcome = %error,
                        "importer.run.rollback"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run_inner(
        &self,
        config: &ImportRunConfig,
        run_id: Uuid,
    ) -> Result<ImportSummary, ImporterError> {
        let started = std::time::Instant::now();
        let package = PackageDir::open(&config.package_root)?;

        let mut sequence: i32 = 0;

        let manifest =
            manifest::run_phase(&package, config.campaign_id, run_id, &mut sequence, self).await?;

        if !config.features.entities {
            return Err(ImporterError::FeatureDisabled { feature: "entities" });
        }
        let entity_outcome =
            entities::run_phase(&package, config.campaign_id, run_id, &mut sequence, self).await?;

        if !config.features.edges {
            return Err(ImporterError::FeatureDisabled { feature: "edges" });
        }
        let edge_outcome = edges::run_phase(
            &package,
            config.campaign_id,
            run_id,
            &mut sequence,
            &entity_outcome.stable_ids,
            self,
        )
        .await?;

        let ontology_outcome =
            ontology::run_phase(&package, config.campaign_id, run_id, &mut sequence, self).await?;

        let lore_outcome = lore::run_phase(
            &package,
            config.campaign_id,
            run_id,
            &mut sequence,
            config.features.embeddings,
            self,
        )
        .await?;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "import runs are bounded well under u64::MAX ms by any realistic package size"
        )]
        let duration_ms = started.elapsed().as_millis() as u64;

        let summary = finalize::run_phase(
            config.campaign_id,
            run_id,
            &mut sequence,
            finalize::FinalizeInputs {
                manifest: &manifest,
                entities: &entity_outcome,
                edges: &edge_outcome,
                ontology: &ontology_outcome,
                lore: &lore_outcome,
                duration_ms,
            },
            self,
        )
        .await?;

        self.metrics.record_importer_duration_ms(duration_ms).await;
        Ok(summary)
    }

    /// Append one `ImportLog` row, consuming the next value of the run's
    /// shared sequence counter. Sequence numbers must be dense across the
    /// whole run, not per phase (`§3`, finalize phase gap check).
    async fn log(
        &self,
        sequence: &mut i32,
        run_id: Uuid,
        phase: &'static str,
        stable_id: Option<String>,
        file_hash: Option<[u8; 32]>,
        action: ImportAction,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StorageError> {
        let this_sequence = *sequence;
        *sequence += 1;
        self.storage
            .append_import_log(crate::ledger::ImportLogEntry {
                run_id,
                phase: phase.to_owned(),
                sequence: this_sequence,
                stable_id,
                file_hash,
                action,
                metadata,
            })
            .await
    }
}

fn rollback_counter_name(phase: &'static str) -> &'static str {
    match phase {
        "manifest" => "importer.rollback.manifest",
        "entity" => "importer.rollback.entity",
        "edge" => "importer.rollback.edge",
        "ontology" => "importer.rollback.ontology",
        "lore" => "importer.rollback.lore",
        "finalize" => "importer.rollback.finalize",
        _ => "importer.rollback.unknown",
    }
}
