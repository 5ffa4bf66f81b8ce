//! In-process document store.
//!
//! [`MemoryStore`] implements [`DocumentStore`] over ordered maps. It pages
//! its scans like a remote store would and can be told to fail specific
//! commits or to become unreachable, which makes it the fixture for the
//! engine's failure-path tests.

use crate::{
    error::StoreError,
    record::Fields,
    store::{DocumentStore, RawDocument, StoreBatch, WriteMode},
    CollectionName, DocumentId,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of documents returned per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 300;

#[derive(Debug, Default)]
struct State {
    collections: HashMap<CollectionName, BTreeMap<DocumentId, Value>>,
    /// 1-based commit attempts that must fail
    failing_commits: HashSet<usize>,
    /// 1-based scan pages that must fail
    failing_pages: HashSet<usize>,
    commits_attempted: usize,
    commits_applied: usize,
    pages_served: usize,
    unavailable: bool,
}

/// A cloneable in-memory store. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store that scans in pages of `page_size`.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: page_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a document in place as-is, bypassing batches.
    pub fn insert(&self, collection: &str, id: impl Into<DocumentId>, fields: Value) {
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.into(), fields);
    }

    /// Get a document.
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Every document of a collection, ordered by id.
    pub fn documents(&self, collection: &str) -> Vec<RawDocument> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| RawDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Make the `attempt`-th commit (1-based, counted across all batches) fail.
    pub fn fail_commit(&self, attempt: usize) {
        self.lock().failing_commits.insert(attempt);
    }

    /// Make the `page`-th scan page (1-based, counted across all scans) fail
    /// with a query error, ending that scan.
    pub fn fail_page(&self, page: usize) {
        self.lock().failing_pages.insert(page);
    }

    /// Make every scan and commit report the store as unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn commits_attempted(&self) -> usize {
        self.lock().commits_attempted
    }

    pub fn commits_applied(&self) -> usize {
        self.lock().commits_applied
    }

    pub fn pages_served(&self) -> usize {
        self.lock().pages_served
    }

    fn page(&self, collection: &str, after: Option<&str>) -> Result<Vec<RawDocument>, StoreError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        state.pages_served += 1;
        if state.failing_pages.contains(&state.pages_served) {
            return Err(StoreError::Query(format!(
                "injected failure on page {}",
                state.pages_served
            )));
        }

        let Some(docs) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };

        Ok(docs
            .range::<str, _>((lower, Bound::Unbounded))
            .take(self.page_size)
            .map(|(id, fields)| RawDocument::new(id.clone(), fields.clone()))
            .collect())
    }
}

impl DocumentStore for MemoryStore {
    type Batch = MemoryBatch;

    fn stream<'a>(
        &'a self,
        collection: &'a str,
    ) -> BoxStream<'a, Result<RawDocument, StoreError>> {
        // Outer None ends the stream; inner None is the first page.
        stream::unfold(Some(None::<DocumentId>), move |cursor| async move {
            let after = cursor?;
            match self.page(collection, after.as_deref()) {
                Err(e) => Some((vec![Err(e)], None)),
                Ok(docs) if docs.is_empty() => None,
                Ok(docs) => {
                    let next = if docs.len() < self.page_size {
                        None
                    } else {
                        docs.last().map(|d| Some(d.id.clone()))
                    };
                    Some((docs.into_iter().map(Ok).collect::<Vec<_>>(), next))
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    fn new_batch(&self, collection: &str) -> MemoryBatch {
        MemoryBatch {
            state: Arc::clone(&self.state),
            collection: collection.to_string(),
            writes: Vec::new(),
        }
    }
}

/// Batch of writes staged against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryBatch {
    state: Arc<Mutex<State>>,
    collection: CollectionName,
    writes: Vec<(DocumentId, Fields, WriteMode)>,
}

#[async_trait]
impl StoreBatch for MemoryBatch {
    fn set(&mut self, id: &str, fields: Fields, mode: WriteMode) {
        self.writes.push((id.to_string(), fields, mode));
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryBatch {
            state,
            collection,
            writes,
        } = self;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.commits_attempted += 1;
        let attempt = state.commits_attempted;

        if state.unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        if state.failing_commits.contains(&attempt) {
            return Err(StoreError::Commit(format!(
                "injected failure on commit {}",
                attempt
            )));
        }

        let docs = state.collections.entry(collection).or_default();
        for (id, fields, mode) in writes {
            if mode == WriteMode::Merge {
                if let Some(Value::Object(existing)) = docs.get_mut(&id) {
                    existing.extend(fields);
                    continue;
                }
            }
            docs.insert(id, Value::Object(fields));
        }
        state.commits_applied += 1;

        Ok(())
    }
}
