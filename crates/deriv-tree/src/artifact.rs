//! Stored artifact handles
//!
//! An [`Artifact`] names content that already lives in a storage backend:
//! its identifier, the backend key and a scalar metadata mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Insertion-ordered metadata attached to an artifact
pub type Metadata = Map<String, Value>;

/// Field holding the artifact identifier in plain data
pub const ID_FIELD: &str = "id";
/// Field holding the backend key in plain data
pub const STORAGE_FIELD: &str = "storage";
/// Field holding the metadata mapping in plain data
pub const METADATA_FIELD: &str = "metadata";

/// Handle to stored content
///
/// # Invariants
/// - Immutable after construction; updates produce a new handle
/// - Owned by exactly one tree node at a time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    id: String,
    storage: String,
    #[serde(default)]
    metadata: Metadata,
}

impl Artifact {
    /// Create artifact with empty metadata
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            storage: storage.into(),
            metadata: Metadata::new(),
        }
    }

    /// Replace the metadata mapping
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Identifier inside the storage backend
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key of the storage backend holding the content
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Metadata mapping
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Single metadata value
    #[inline]
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Recorded size in bytes, if any
    #[inline]
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.metadata.get("size").and_then(Value::as_u64)
    }

    /// Plain-data representation: `{"id", "storage", "metadata"}`
    #[must_use]
    pub fn to_plain(&self) -> Value {
        let mut map = Map::with_capacity(3);
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        map.insert(
            STORAGE_FIELD.to_string(),
            Value::String(self.storage.clone()),
        );
        map.insert(
            METADATA_FIELD.to_string(),
            Value::Object(self.metadata.clone()),
        );
        Value::Object(map)
    }

    /// Rebuild an artifact from its plain-data representation
    ///
    /// # Errors
    /// Returns error if the value is not an object, or if `id`/`storage` are
    /// missing or not strings, or `metadata` is present but not an object.
    pub fn from_plain(value: &Value) -> Result<Self, ArtifactError> {
        let object = value.as_object().ok_or(ArtifactError::NotAnObject)?;

        let id = string_field(object, ID_FIELD)?;
        let storage = string_field(object, STORAGE_FIELD)?;
        let metadata = match object.get(METADATA_FIELD) {
            None | Some(Value::Null) => Metadata::new(),
            Some(Value::Object(metadata)) => metadata.clone(),
            Some(_) => return Err(ArtifactError::InvalidField(METADATA_FIELD)),
        };

        Ok(Self {
            id,
            storage,
            metadata,
        })
    }

    /// Structural leaf check used when loading persisted trees
    ///
    /// A mapping with a string `id` is an artifact, whatever else it holds.
    #[inline]
    #[must_use]
    pub fn is_plain_artifact(value: &Value) -> bool {
        value
            .as_object()
            .and_then(|object| object.get(ID_FIELD))
            .is_some_and(Value::is_string)
    }
}

fn string_field(object: &Map<String, Value>, field: &'static str) -> Result<String, ArtifactError> {
    match object.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ArtifactError::InvalidField(field)),
        None => Err(ArtifactError::MissingField(field)),
    }
}

/// Errors related to artifact handles
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    /// Plain data for an artifact was not a mapping
    #[error("artifact data must be an object")]
    NotAnObject,

    /// Required field absent
    #[error("artifact data is missing '{0}'")]
    MissingField(&'static str),

    /// Field present with the wrong type
    #[error("artifact field '{0}' has an invalid type")]
    InvalidField(&'static str),
}
