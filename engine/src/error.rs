//! Error types for the sync engine.
//!
//! Errors are split by blast radius. A [`RecordError`] affects one candidate
//! and never stops a run, a [`StoreError`] comes from the document store
//! collaborator, and a [`SyncError`] is the only thing that aborts a sync.

use crate::{DocumentId, RecordKind};
use thiserror::Error;

/// A single candidate could not be identified or encoded.
///
/// The diff engine records these and keeps going; an affected record is
/// written as NEW rather than dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("no identity fields for record of kind '{kind}'")]
    NoIdentityFields { kind: RecordKind },

    #[error("identity value '{value}' is not usable as a document key for kind '{kind}'")]
    InvalidIdentity { kind: RecordKind, value: String },

    #[error("cannot encode field '{field}': {reason}")]
    Encoding { field: String, reason: String },

    #[error("duplicate identity '{id}' in candidate set; earlier record dropped")]
    DuplicateIdentity { id: DocumentId },
}

/// Failures reported by a document store implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// One document could not be read back into a usable shape.
    #[error("malformed document '{id}': {reason}")]
    MalformedDocument { id: DocumentId, reason: String },

    /// An atomic batch commit was rejected.
    #[error("batch commit failed: {0}")]
    Commit(String),

    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether this error means the store is unreachable and the run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Errors that abort a whole sync run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The remote scan broke off before reaching the end of the collection.
    #[error("remote index incomplete: {0}")]
    IndexIncomplete(String),

    #[error("invalid sync options: {0}")]
    InvalidOptions(String),

    #[error("invalid kind profile: {0}")]
    Profile(String),
}

/// Result type for engine operations that can abort a run.
pub type Result<T> = std::result::Result<T, SyncError>;
