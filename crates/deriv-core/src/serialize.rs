//! Plain-data persistence of attachments
//!
//! # Current layout
//! ```json
//! { "id": "abc", "storage": "store", "metadata": {},
//!   "derivatives": { "thumb": { "id": "t1", "storage": "store", "metadata": {} } } }
//! ```
//! `derivatives` is omitted when there are none. Without a primary the
//! record is `{"derivatives": ...}`, or `null` when that is empty too.
//!
//! # Legacy layouts
//! A record holding neither `metadata` nor `derivatives` is legacy:
//! - flat: a top-level string `id`; `id`/`storage` form the primary, scalar
//!   siblings become its metadata and container siblings are derivatives
//! - versions: no top-level `id`; `original` holds the primary and every
//!   other key is a derivative
//!
//! Legacy artifacts keep their scalar siblings of `id`/`storage` as metadata.

use crate::error::{DerivativesError, Result};
use deriv_tree::{
    Artifact, DerivativeTree, Metadata, Tree, TreePath, ID_FIELD, METADATA_FIELD, STORAGE_FIELD,
};
use serde_json::{Map, Value};
use tracing::debug;

/// Field holding the derivatives tree in a record
pub const DERIVATIVES_FIELD: &str = "derivatives";

/// Key holding the primary in the legacy versions layout
pub const LEGACY_ORIGINAL_KEY: &str = "original";

/// Layout of a persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Nested layout with reserved `metadata`/`derivatives` fields
    Current,
    /// Primary fields and derivatives as siblings, metadata flattened
    LegacyFlat,
    /// Primary under `original`, derivatives as siblings
    LegacyVersions,
}

impl Format {
    /// Detect the layout of a record object
    #[must_use]
    pub fn detect(record: &Map<String, Value>) -> Self {
        if record.is_empty()
            || record.contains_key(METADATA_FIELD)
            || record.contains_key(DERIVATIVES_FIELD)
        {
            Self::Current
        } else if record.get(ID_FIELD).is_some_and(Value::is_string) {
            Self::LegacyFlat
        } else {
            Self::LegacyVersions
        }
    }

    /// Whether the layout needs upgrading
    #[inline]
    #[must_use]
    pub fn is_legacy(self) -> bool {
        !matches!(self, Self::Current)
    }
}

/// Primary artifact plus its derivatives, the unit that gets persisted
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttachmentData {
    /// Attached primary artifact
    pub primary: Option<Artifact>,
    /// Derivatives of the primary
    pub derivatives: DerivativeTree,
}

impl AttachmentData {
    /// Create attachment data
    #[inline]
    #[must_use]
    pub fn new(primary: Option<Artifact>, derivatives: DerivativeTree) -> Self {
        Self {
            primary,
            derivatives,
        }
    }

    /// Check if neither a primary nor derivatives are present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.derivatives.is_empty()
    }

    /// Plain-data record in the current layout
    #[must_use]
    pub fn to_plain(&self) -> Value {
        let mut record = match self.primary.as_ref().map(Artifact::to_plain) {
            Some(Value::Object(record)) => record,
            _ if self.derivatives.is_empty() => return Value::Null,
            _ => Map::new(),
        };
        if !self.derivatives.is_empty() {
            record.insert(
                DERIVATIVES_FIELD.to_string(),
                derivatives_to_plain(&self.derivatives),
            );
        }
        Value::Object(record)
    }

    /// Load a record in any supported layout
    ///
    /// Strings are parsed as JSON first; `null` is an empty attachment.
    ///
    /// # Errors
    /// `DerivativesError::MalformedPersistedData` for anything else than a
    /// string, mapping or `null`, or when nested data is invalid
    pub fn from_plain(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(json) => Self::from_json_str(json),
            Value::Object(record) => Self::from_record(record),
            other => Err(DerivativesError::malformed(format!(
                "attachment data must be a mapping, got {}",
                value_kind(other)
            ))),
        }
    }

    /// Load a JSON-encoded record
    ///
    /// # Errors
    /// `DerivativesError::MalformedPersistedData` on invalid JSON or layout
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| DerivativesError::malformed(format!("invalid JSON: {e}")))?;
        match value {
            Value::String(_) => Err(DerivativesError::malformed("doubly encoded JSON string")),
            value => Self::from_plain(&value),
        }
    }

    fn from_record(record: &Map<String, Value>) -> Result<Self> {
        let format = Format::detect(record);
        if format.is_legacy() {
            debug!(?format, "Upgrading legacy attachment data");
        }
        match format {
            Format::Current => Self::from_current(record),
            Format::LegacyFlat => Self::from_legacy_flat(record),
            Format::LegacyVersions => Self::from_legacy_versions(record),
        }
    }

    fn from_current(record: &Map<String, Value>) -> Result<Self> {
        let primary = if record.contains_key(ID_FIELD) {
            Some(artifact_from_record(record, false)?)
        } else {
            None
        };
        let derivatives = match record.get(DERIVATIVES_FIELD) {
            None | Some(Value::Null) => Tree::empty(),
            Some(value) => mapping_root(load_tree(value, false)?)?,
        };
        Ok(Self::new(primary, derivatives))
    }

    fn from_legacy_flat(record: &Map<String, Value>) -> Result<Self> {
        let primary = artifact_from_record(record, true)?;
        let derivatives = record
            .iter()
            .filter(|(key, value)| !is_primary_field(key) && holds_artifact(value))
            .map(|(key, value)| Ok((key.clone(), load_tree(value, true)?)))
            .collect::<Result<Tree<Artifact>>>()?;
        Ok(Self::new(Some(primary), derivatives))
    }

    fn from_legacy_versions(record: &Map<String, Value>) -> Result<Self> {
        let primary = match record.get(LEGACY_ORIGINAL_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Object(original)) => Some(artifact_from_record(original, true)?),
            Some(other) => {
                return Err(DerivativesError::malformed(format!(
                    "'{LEGACY_ORIGINAL_KEY}' must be an artifact, got {}",
                    value_kind(other)
                )))
            }
        };
        let derivatives = record
            .iter()
            .filter(|(key, _)| key.as_str() != LEGACY_ORIGINAL_KEY)
            .map(|(key, value)| {
                let path = TreePath::from(key.as_str());
                Ok((key.clone(), load_subtree(value, &path, true)?))
            })
            .collect::<Result<Tree<Artifact>>>()?;
        Ok(Self::new(primary, derivatives))
    }
}

/// Plain-data form of a derivatives tree
///
/// Every artifact becomes `{"id", "storage", "metadata"}`; mappings and
/// lists keep their shape and order.
#[must_use]
pub fn derivatives_to_plain(tree: &DerivativeTree) -> Value {
    Value::from(tree.borrowed().map(|_, artifact| artifact.to_plain()))
}

/// Rebuild a derivatives tree from plain data
///
/// Accepts a mapping, a list, or a JSON string encoding either. Artifacts
/// are recognized structurally: any mapping with a string `id`.
///
/// # Errors
/// `DerivativesError::MalformedPersistedData` for other inputs or when a
/// non-artifact scalar appears where a subtree is expected
pub fn derivatives_from_plain(value: &Value) -> Result<DerivativeTree> {
    match value {
        Value::String(json) => {
            let parsed: Value = serde_json::from_str(json)
                .map_err(|e| DerivativesError::malformed(format!("invalid JSON: {e}")))?;
            if parsed.is_string() {
                return Err(DerivativesError::malformed("doubly encoded JSON string"));
            }
            derivatives_from_plain(&parsed)
        }
        value => load_tree(value, false),
    }
}

fn load_tree(value: &Value, legacy: bool) -> Result<DerivativeTree> {
    match value {
        Value::Object(_) | Value::Array(_) => load_subtree(value, &TreePath::root(), legacy),
        other => Err(DerivativesError::malformed(format!(
            "derivatives must be a mapping or a list, got {}",
            value_kind(other)
        ))),
    }
}

fn load_subtree(value: &Value, prefix: &TreePath, legacy: bool) -> Result<DerivativeTree> {
    Tree::from(value.clone()).map_nodes(prefix, is_artifact_node, |path, node| {
        let plain = Value::from(node);
        let record = plain.as_object().ok_or_else(|| {
            DerivativesError::malformed(format!(
                "expected an artifact at '{path}', got {}",
                value_kind(&plain)
            ))
        })?;
        artifact_from_record(record, legacy)
            .map_err(|e| DerivativesError::malformed(format!("at '{path}': {e}")))
    })
}

fn is_artifact_node(node: &Tree<Value>) -> bool {
    node.as_map()
        .and_then(|entries| entries.get(ID_FIELD))
        .and_then(Tree::as_leaf)
        .is_some_and(Value::is_string)
}

fn artifact_from_record(record: &Map<String, Value>, legacy: bool) -> Result<Artifact> {
    let artifact = Artifact::from_plain(&Value::Object(record.clone()))
        .map_err(|e| DerivativesError::malformed(e.to_string()))?;
    if !legacy || record.contains_key(METADATA_FIELD) {
        return Ok(artifact);
    }
    let metadata: Metadata = record
        .iter()
        .filter(|(key, value)| !is_primary_field(key) && !holds_artifact(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(artifact.with_metadata(metadata))
}

fn mapping_root(tree: DerivativeTree) -> Result<DerivativeTree> {
    match tree {
        Tree::Map(_) => Ok(tree),
        other => Err(DerivativesError::malformed(format!(
            "'{DERIVATIVES_FIELD}' must be a mapping, got a {}",
            other.kind()
        ))),
    }
}

fn is_primary_field(key: &str) -> bool {
    key == ID_FIELD || key == STORAGE_FIELD
}

/// Whether `value` is an artifact record or a container with one somewhere below
///
/// Legacy records mix derivatives with structured metadata; only subtrees
/// holding artifacts are derivatives.
fn holds_artifact(value: &Value) -> bool {
    match value {
        Value::Object(entries) => {
            Artifact::is_plain_artifact(value) || entries.values().any(holds_artifact)
        }
        Value::Array(items) => items.iter().any(holds_artifact),
        _ => false,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
