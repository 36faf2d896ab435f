//! Embedded JSON Schema documents and a shared validation helper (`§4.6`).
//!
//! Schemas are compiled once per call rather than cached: import runs are
//! infrequent, operator-triggered events, not a hot path, so the simplicity
//! of recompiling outweighs the cost of a lazily-initialized cache.

use serde_json::Value;
use thiserror::Error;

const ENTITY_SCHEMA: &str = include_str!("../../schemas/entity.v1.json");
const EDGE_SCHEMA: &str = include_str!("../../schemas/edge.v1.json");
const TAG_SCHEMA: &str = include_str!("../../schemas/tag.v1.json");
const AFFORDANCE_SCHEMA: &str = include_str!("../../schemas/affordance.v1.json");
const CHUNK_FRONT_MATTER_SCHEMA: &str =
    include_str!("../../schemas/chunk-front-matter.v1.json");

/// Which embedded schema to validate against.
#[derive(Debug, Clone, Copy)]
pub(super) enum SchemaKind {
    Entity,
    Edge,
    Tag,
    Affordance,
    ChunkFrontMatter,
}

impl SchemaKind {
    const fn source(self) -> &'static str {
        match self {
            Self::Entity => ENTITY_SCHEMA,
            Self::Edge => EDGE_SCHEMA,
            Self::Tag => TAG_SCHEMA,
            Self::Affordance => AFFORDANCE_SCHEMA,
            Self::ChunkFrontMatter => CHUNK_FRONT_MATTER_SCHEMA,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Entity => "entity.v1",
            Self::Edge => "edge.v1",
            Self::Tag => "tag.v1",
            Self::Affordance => "affordance.v1",
            Self::ChunkFrontMatter => "chunk-front-matter.v1",
        }
    }
}

/// A document failed schema validation, or a schema itself failed to
/// compile (a packaging bug, not a content bug).
#[derive(Debug, Error)]
pub(super) enum SchemaError {
    /// The embedded schema document itself is malformed.
    #[error("embedded schema {schema} is invalid: {message}")]
    InvalidSchema { schema: &'static str, message: String },
    /// The instance failed validation against the schema.
    #[error("{schema} validation failed: {message}")]
    Invalid { schema: &'static str, message: String },
}

/// Validate `instance` against the named embedded schema.
pub(super) fn validate(kind: SchemaKind, instance: &Value) -> Result<(), SchemaError> {
    let schema: Value =
        serde_json::from_str(kind.source()).map_err(|error| SchemaError::InvalidSchema {
            schema: kind.name(),
            message: error.to_string(),
        })?;
    let validator = jsonschema::validator_for(&schema).map_err(|error| SchemaError::InvalidSchema {
        schema: kind.name(),
        message: error.to_string(),
    })?;
    validator.validate(instance).map_err(|error| SchemaError::Invalid {
        schema: kind.name(),
        message: error.to_string(),
    })
}
