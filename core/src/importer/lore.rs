//! Lore phase (`§4.6`, phase e): Markdown lore chunks with YAML front matter.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::append::{AppendOutcome, AppendRequest};
use crate::hashing::{self, PayloadHash};
use crate::ledger::{ImportAction, Provenance, SeedEventType};
use crate::ports::LedgerStorage;

use super::package::PackageDir;
use super::schemas::{self, SchemaKind};
use super::{Importer, ImporterError, RegisteredObject};

const LORE_DIR: &str = "lore";
const TOKEN_BUDGET: usize = 8000;

/// Front matter required at the top of every lore Markdown file.
#[derive(Debug, Clone, Deserialize)]
struct FrontMatter {
    chunk_id: String,
    title: String,
    audience: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    embedding_hint: Option<String>,
    #[serde(default)]
    provenance: Option<Value>,
}

/// One lore chunk produced by splitting a source Markdown document.
#[derive(Debug, Clone)]
pub struct LoreChunk {
    /// `"<frontmatter.chunk_id>-<nnn>"`, zero-padded.
    pub chunk_id: String,
    /// Carried over from the source document's front matter.
    pub title: String,
    /// Carried over from the source document's front matter.
    pub audience: String,
    /// Sorted, deduplicated tags.
    pub tags: Vec<String>,
    /// NFC-normalized chunk body.
    pub content: String,
    /// Zero-based index within the source document.
    pub chunk_index: usize,
}

struct ChunkRecord {
    chunk: LoreChunk,
    content_hash: PayloadHash,
    file_hash: PayloadHash,
}

/// Result of running the lore phase.
pub struct LorePhaseOutcome {
    pub(super) registered: Vec<RegisteredObject>,
    /// Count of newly created lore chunk events.
    pub created_count: usize,
    /// Count of chunks skipped as idempotent re-imports.
    pub skipped_idempotent_count: usize,
}

/// Two chunks shared a `chunk_id` with different content.
#[derive(Debug, Error)]
#[error("lore chunk_id {chunk_id} declared with conflicting content")]
pub struct LoreCollisionError {
    /// The conflicting `chunk_id`.
    pub chunk_id: String,
}

fn split_front_matter(source: &str) -> Result<(FrontMatter, &str), ImporterError> {
    let rest = source.strip_prefix("---\n").ok_or(ImporterError::Phase {
        phase: "lore",
        reason: "lore document missing YAML front matter".to_owned(),
    })?;
    let end = rest.find("\n---\n").ok_or(ImporterError::Phase {
        phase: "lore",
        reason: "lore document front matter not terminated".to_owned(),
    })?;
    let (yaml, body) = rest.split_at(end);
    let body = &body[5..];
    let front_matter: FrontMatter =
        serde_yaml::from_str(yaml).map_err(|error| ImporterError::Phase {
            phase: "lore",
            reason: format!("lore front matter is not valid YAML: {error}"),
        })?;
    Ok((front_matter, body))
}

/// Split `body` first by level-2+ Markdown headings, then, within each
/// heading section, further by a soft token budget, preferring paragraph
/// and sentence boundaries over hard truncation.
fn split_sections(body: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in body.lines() {
        let is_heading = line.starts_with("## ")
            || line.starts_with("### ")
            || line.starts_with("#### ")
            || line.starts_with("##### ")
            || line.starts_with("###### ");
        if is_heading && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    if sections.is_empty() {
        sections.push(body.to_owned());
    }

    sections
        .into_iter()
        .flat_map(|section| split_by_budget(&section))
        .filter(|section| !section.trim().is_empty())
        .collect()
}

fn split_by_budget(section: &str) -> Vec<String> {
    if section.chars().count() <= TOKEN_BUDGET {
        return vec![section.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut remaining = section;
    while remaining.chars().count() > TOKEN_BUDGET {
        let boundary = find_boundary(remaining, TOKEN_BUDGET);
        let (head, tail) = remaining.split_at(boundary);
        chunks.push(head.to_owned());
        remaining = tail;
    }
    if !remaining.is_empty() {
        chunks.push(remaining.to_owned());
    }
    chunks
}

/// Find a byte offset near `budget` chars into `text`, preferring a
/// paragraph break, then a sentence break, then falling back to the exact
/// char boundary.
fn find_boundary(text: &str, budget: usize) -> usize {
    let char_boundary = text
        .char_indices()
        .nth(budget)
        .map_or(text.len(), |(idx, _)| idx);

    if let Some(offset) = text[..char_boundary].rfind("\n\n") {
        return offset + 2;
    }
    if let Some(offset) = text[..char_boundary].rfind(". ") {
        return offset + 2;
    }
    char_boundary
}

pub(super) async fn run_phase<S>(
    package: &PackageDir,
    campaign_id: i64,
    run_id: Uuid,
    sequence: &mut i32,
    embeddings_enabled: bool,
    importer: &Importer<S>,
) -> Result<LorePhaseOutcome, ImporterError>
where
    S: LedgerStorage,
{
    let files = package.list_sorted_files(LORE_DIR)?;

    let mut by_chunk_id: HashMap<String, ChunkRecord> = HashMap::new();
    for path in &files {
        let (bytes, file_hash) = package.read_with_hash(path)?;
        let source = String::from_utf8(bytes).map_err(|error| ImporterError::Phase {
            phase: "lore",
            reason: format!("{path} is not valid UTF-8: {error}"),
        })?;
        let (front_matter, body) = split_front_matter(&source)?;

        let mut tags = front_matter.tags.clone();
        tags.sort();
        tags.dedup();

        let mut front_matter_doc = serde_json::Map::new();
        front_matter_doc.insert(
            "chunk_id".to_owned(),
            Value::String(front_matter.chunk_id.clone()),
        );
        front_matter_doc.insert("title".to_owned(), Value::String(front_matter.title.clone()));
        front_matter_doc.insert(
            "audience".to_owned(),
            Value::String(front_matter.audience.clone()),
        );
        front_matter_doc.insert(
            "tags".to_owned(),
            Value::Array(tags.iter().cloned().map(Value::String).collect()),
        );
        if let Some(hint) = &front_matter.embedding_hint {
            front_matter_doc.insert("embedding_hint".to_owned(), Value::String(hint.clone()));
        }
        if let Some(provenance) = &front_matter.provenance {
            front_matter_doc.insert("provenance".to_owned(), provenance.clone());
        }
        schemas::validate(SchemaKind::ChunkFrontMatter, &Value::Object(front_matter_doc))
            .map_err(|error| ImporterError::Phase {
                phase: "lore",
                reason: format!("{path} front matter failed schema validation: {error}"),
            })?;

        let normalized_body: String = body.nfc().collect();
        let sections = split_sections(&normalized_body);

        for (chunk_index, content) in sections.iter().enumerate() {
            let chunk_id = format!("{}-{chunk_index:03}", front_matter.chunk_id);
            let content = content.trim().to_owned();

            let mut hash_doc = json!({
                "chunk_id": chunk_id,
                "title": front_matter.title,
                "audience": front_matter.audience,
                "tags": tags,
                "content": content,
                "chunk_index": chunk_index,
            });
            if embeddings_enabled {
                if let Some(hint) = &front_matter.embedding_hint {
                    hash_doc["embedding_hint"] = Value::String(hint.clone());
                }
            }

            let content_hash =
                hashing::payload_hash(&hash_doc).map_err(|error| ImporterError::Phase {
                    phase: "lore",
                    reason: format!("{path} chunk {chunk_id} could not be canonicalized: {error}"),
                })?;

            let record = ChunkRecord {
                chunk: LoreChunk {
                    chunk_id: chunk_id.clone(),
                    title: front_matter.title.clone(),
                    audience: front_matter.audience.clone(),
                    tags: tags.clone(),
                    content,
                    chunk_index,
                },
                content_hash,
                file_hash,
            };

            match by_chunk_id.get(&chunk_id) {
                None => {
                    by_chunk_id.insert(chunk_id, record);
                }
                Some(existing) if existing.content_hash == record.content_hash => {}
                Some(_) => return Err(LoreCollisionError { chunk_id }.into()),
            }
        }
    }

    let mut records: Vec<ChunkRecord> = by_chunk_id.into_values().collect();
    records.sort_by(|a, b| a.chunk.chunk_id.cmp(&b.chunk.chunk_id));

    let mut registered = Vec::with_capacity(records.len());
    let mut created_count = 0usize;
    let mut skipped_idempotent_count = 0usize;

    for record in records {
        let chunk_id = record.chunk.chunk_id.clone();
        let payload = json!({
            "chunk_id": record.chunk.chunk_id,
            "title": record.chunk.title,
            "audience": record.chunk.audience,
            "tags": record.chunk.tags,
            "content": record.chunk.content,
            "chunk_index": record.chunk.chunk_index,
        });

        let idempotency = hashing::IdempotencyInputs {
            plan_id: None,
            campaign_id,
            event_type: SeedEventType::ContentChunkIngested.as_str(),
            tool_name: None,
            ruleset_version: None,
            args_json: Some(&Value::String(chunk_id.clone())),
        };
        let request = AppendRequest {
            campaign_id,
            scene_id: None,
            event_type: SeedEventType::ContentChunkIngested.as_str().to_owned(),
            event_schema_version: 1,
            payload,
            provenance: Provenance::default(),
            idempotency,
        };
        let outcome = importer.coordinator.append(request).await?;

        let action = match outcome {
            AppendOutcome::Applied(_) => {
                created_count += 1;
                ImportAction::Created
            }
            AppendOutcome::IdempotentReuse(event) => {
                if event.payload_hash != record.content_hash {
                    return Err(LoreCollisionError { chunk_id }.into());
                }
                skipped_idempotent_count += 1;
                ImportAction::SkippedIdempotent
            }
        };

        importer
            .log(
                sequence,
                run_id,
                "lore",
                Some(chunk_id.clone()),
                Some(record.file_hash),
                action,
                None,
            )
            .await?;

        registered.push(RegisteredObject {
            stable_id: chunk_id,
            content_hash: record.content_hash,
        });
    }

    Ok(LorePhaseOutcome {
        registered,
        created_count,
        skipped_idempotent_count,
    })
}
