//! Document store collaborator.
//!
//! The engine never talks to a database directly. Callers hand it a
//! [`DocumentStore`] handle they construct once and own; the engine borrows
//! it for the duration of a run.

use crate::{error::StoreError, record::Fields, DocumentId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document as read back from the store.
///
/// `fields` is left untyped: a store may hold documents that are not
/// objects, and the loader decides what to do with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: DocumentId,
    pub fields: Value,
}

impl RawDocument {
    pub fn new(id: impl Into<DocumentId>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// How a staged document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the whole document, creating it if absent
    #[default]
    Set,
    /// Overwrite the given fields, keeping any others, creating if absent
    Merge,
}

/// Handle to a document store.
pub trait DocumentStore: Send + Sync {
    type Batch: StoreBatch;

    /// Stream every document of a collection. Pagination is the
    /// implementation's business. An `Unavailable` item ends the scan.
    fn stream<'a>(&'a self, collection: &'a str)
        -> BoxStream<'a, Result<RawDocument, StoreError>>;

    /// Start an empty atomic write batch against a collection.
    fn new_batch(&self, collection: &str) -> Self::Batch;
}

/// An atomic group of upserts.
#[async_trait]
pub trait StoreBatch: Send {
    /// Stage one upsert keyed by document id.
    fn set(&mut self, id: &str, fields: Fields, mode: WriteMode);

    /// Number of staged writes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit every staged write, or none of them.
    async fn commit(self) -> Result<(), StoreError>;
}
