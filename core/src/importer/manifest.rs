//! Manifest phase (`§4.6`, phase a).

use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

use crate::canonical::CanonicalError;
use crate::hashing::{self, PayloadHash};
use crate::ledger::{ImportAction, SeedEventType};
use crate::ports::LedgerStorage;

use super::package::{PackageDir, PackageError};
use super::{ImporterError, Importer};

const MANIFEST_PATH: &str = "manifest.json";

/// One `content_index` entry: a package-relative path and its expected
/// SHA-256 digest.
#[derive(Debug, Clone)]
pub struct ContentIndexEntry {
    /// Package-relative path.
    pub path: String,
    /// Expected SHA-256 digest, as recorded in the manifest.
    pub expected_sha256: PayloadHash,
}

/// A validated package manifest (`§3`).
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The package's ULID identity.
    pub package_id: Ulid,
    /// Every entry in `content_index`, sorted by path.
    pub content_index: Vec<ContentIndexEntry>,
    /// Canonical hash of the manifest document itself.
    pub manifest_hash: PayloadHash,
    /// The manifest's raw JSON, used as the `seed.manifest.validated`
    /// payload.
    pub raw: Value,
}

/// Failures validating a package manifest.
#[derive(Debug, Error)]
pub enum ManifestValidationError {
    /// The manifest file could not be read.
    #[error(transparent)]
    Package(#[from] PackageError),
    /// The manifest file was not valid JSON.
    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A required field was missing or of the wrong shape.
    #[error("manifest field {field} is missing or malformed")]
    MalformedField {
        /// The offending field's name.
        field: &'static str,
    },
    /// `package_id` was not a well-formed ULID.
    #[error("manifest package_id {value:?} is not a well-formed ULID")]
    InvalidPackageId {
        /// The offending raw value.
        value: String,
    },
    /// A `content_index` entry referenced a file that does not exist (or
    /// could not be read for another reason).
    #[error("content_index entry {path} could not be read: {source}")]
    ContentIndexMissingFile {
        /// The offending relative path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: PackageError,
    },
    /// A `content_index` entry's recomputed hash did not match the recorded
    /// one.
    #[error("content_index entry {path} hash mismatch")]
    ContentIndexMismatch {
        /// The offending relative path.
        path: String,
    },
    /// The manifest could not be canonicalized to compute `manifest_hash`.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

pub(super) async fn run_phase<S>(
    package: &PackageDir,
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    importer: &Importer<S>,
) -> Result<Manifest, ImporterError>
where
    S: LedgerStorage,
{
    let manifest = parse_and_validate(package)?;

    let idempotency = hashing::IdempotencyInputs {
        plan_id: None,
        campaign_id,
        event_type: SeedEventType::ManifestValidated.as_str(),
        tool_name: None,
        ruleset_version: None,
        args_json: Some(&Value::String(manifest.package_id.to_string())),
    };
    let request = crate::append::AppendRequest {
        campaign_id,
        scene_id: None,
        event_type: SeedEventType::ManifestValidated.as_str().to_owned(),
        event_schema_version: 1,
        payload: manifest.raw.clone(),
        provenance: crate::ledger::Provenance::default(),
        idempotency,
    };
    importer.coordinator.append(request).await?;

    importer
        .log(
            sequence,
            run_id,
            "manifest",
            Some(manifest.package_id.to_string()),
            Some(manifest.manifest_hash),
            ImportAction::Validated,
            None,
        )
        .await?;

    Ok(manifest)
}

fn parse_and_validate(package: &PackageDir) -> Result<Manifest, ManifestValidationError> {
    let (bytes, _) = package.read_with_hash(MANIFEST_PATH)?;
    let raw: Value = serde_json::from_slice(&bytes)?;

    let package_id_text = raw
        .get("package_id")
        .and_then(Value::as_str)
        .ok_or(ManifestValidationError::MalformedField { field: "package_id" })?;
    let package_id = Ulid::from_string(package_id_text).map_err(|_| {
        ManifestValidationError::InvalidPackageId {
            value: package_id_text.to_owned(),
        }
    })?;

    let content_index_obj = raw
        .get("content_index")
        .and_then(Value::as_object)
        .ok_or(ManifestValidationError::MalformedField { field: "content_index" })?;

    let mut content_index = Vec::with_capacity(content_index_obj.len());
    for (path, expected) in content_index_obj {
        let expected_hex = expected
            .as_str()
            .ok_or(ManifestValidationError::MalformedField { field: "content_index" })?;
        let expected_bytes = hex::decode(expected_hex).map_err(|_| {
            ManifestValidationError::MalformedField { field: "content_index" }
        })?;
        let expected_sha256 = <[u8; 32]>::try_from(expected_bytes.as_slice()).map_err(|_| {
            ManifestValidationError::MalformedField { field: "content_index" }
        })?;
        content_index.push(ContentIndexEntry {
            path: path.clone(),
            expected_sha256,
        });
    }
    content_index.sort_by(|a, b| a.path.cmp(&b.path));

    for entry in &content_index {
        let (_, actual) = package
            .read_with_hash(&entry.path)
            .map_err(|source| ManifestValidationError::ContentIndexMissingFile {
                path: entry.path.clone(),
                source,
            })?;
        if actual != entry.expected_sha256 {
            return Err(ManifestValidationError::ContentIndexMismatch {
                path: entry.path.clone(),
            });
        }
    }

    let manifest_hash = hashing::payload_hash(&raw)?;

    Ok(Manifest {
        package_id,
        content_index,
        manifest_hash,
        raw,
    })
}
