//! Candidate records and their change classification.

use crate::{DocumentId, Fingerprint, IdentitySource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field map shared by candidates, encoded records and stored documents.
pub type Fields = Map<String, Value>;

/// A freshly computed business entity, as produced by the transformation stage.
///
/// The engine only ever reads a candidate; annotations produce new values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateRecord {
    fields: Fields,
}

impl CandidateRecord {
    /// Create a record from a field map.
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Create a record from a JSON value. Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Borrow the field map.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Get a single field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Consume the record, returning its fields.
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Fields> for CandidateRecord {
    fn from(fields: Fields) -> Self {
        Self::new(fields)
    }
}

/// Outcome of comparing a candidate against the remote index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeClassification {
    /// No remote document under this identity
    New,
    /// Remote document exists with a different fingerprint
    Modified,
    /// Remote document exists with the same fingerprint
    Unchanged,
}

impl ChangeClassification {
    /// Whether records with this classification go to the write path.
    pub fn needs_write(self) -> bool {
        !matches!(self, ChangeClassification::Unchanged)
    }
}

impl std::fmt::Display for ChangeClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeClassification::New => write!(f, "new"),
            ChangeClassification::Modified => write!(f, "modified"),
            ChangeClassification::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A candidate annotated with its identity, fingerprint and classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedRecord {
    pub id: DocumentId,
    pub source: IdentitySource,
    pub fingerprint: Fingerprint,
    pub change: ChangeClassification,
    pub record: CandidateRecord,
}
