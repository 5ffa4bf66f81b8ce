//! Remote state loading.
//!
//! One full scan of the target collection produces a [`RemoteIndex`] mapping
//! each document id to its fingerprint. The index is only returned once the
//! scan has finished, so the diff never sees a partial view.

use crate::{
    error::{StoreError, SyncError},
    hasher::{CREATED_AT_FIELD, STORED_FINGERPRINT_FIELD},
    store::{DocumentStore, RawDocument},
    CanonicalHasher, DocumentId, Fingerprint, StructureEncoder,
};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;

/// Fingerprint of one persisted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    /// Read from the stored fingerprint field rather than recomputed
    pub stored: bool,
    /// Creation stamp of the stored document, carried over on replacement
    pub created_at: Option<Value>,
}

/// Snapshot of a collection's identities and fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndex {
    entries: HashMap<DocumentId, IndexEntry>,
    skipped: usize,
}

impl RemoteIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<DocumentId>, entry: IndexEntry) {
        self.entries.insert(id.into(), entry);
    }

    /// Fingerprint stored under an identity.
    pub fn get(&self, id: &str) -> Option<&Fingerprint> {
        self.entries.get(id).map(|e| &e.fingerprint)
    }

    pub fn entry(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Documents left out because they could not be read.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Entries whose fingerprint had to be recomputed.
    pub fn recomputed(&self) -> usize {
        self.entries.values().filter(|e| !e.stored).count()
    }
}

impl FromIterator<(DocumentId, Fingerprint)> for RemoteIndex {
    fn from_iter<I: IntoIterator<Item = (DocumentId, Fingerprint)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(id, fingerprint)| {
                    (
                        id,
                        IndexEntry {
                            fingerprint,
                            stored: true,
                            created_at: None,
                        },
                    )
                })
                .collect(),
            skipped: 0,
        }
    }
}

/// Scan a collection and index it.
///
/// Malformed documents are logged and skipped. Any other store error means
/// the rest of the collection was never read, so the scan aborts.
pub async fn load_index<S: DocumentStore>(
    store: &S,
    collection: &str,
    hasher: &CanonicalHasher,
    encoder: &StructureEncoder,
) -> Result<RemoteIndex, SyncError> {
    let mut index = RemoteIndex::new();
    let mut documents = store.stream(collection);

    while let Some(item) = documents.next().await {
        let result = item.and_then(|doc| {
            let entry = index_entry(&doc, hasher, encoder)?;
            Ok((doc.id, entry))
        });

        match result {
            Ok((id, entry)) => index.insert(id, entry),
            Err(e @ StoreError::MalformedDocument { .. }) => {
                tracing::warn!(collection, error = %e, "skipping unreadable remote document");
                index.skipped += 1;
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(collection, error = %e, "remote scan aborted");
                return Err(SyncError::StoreUnavailable(e.to_string()));
            }
            Err(e) => {
                tracing::error!(
                    collection,
                    indexed = index.len(),
                    error = %e,
                    "remote scan broke off"
                );
                return Err(SyncError::IndexIncomplete(e.to_string()));
            }
        }
    }

    tracing::debug!(
        collection,
        documents = index.len(),
        skipped = index.skipped,
        recomputed = index.recomputed(),
        "remote index loaded"
    );

    Ok(index)
}

fn index_entry(
    doc: &RawDocument,
    hasher: &CanonicalHasher,
    encoder: &StructureEncoder,
) -> Result<IndexEntry, StoreError> {
    let fields = doc
        .fields
        .as_object()
        .ok_or_else(|| StoreError::MalformedDocument {
            id: doc.id.clone(),
            reason: "document is not an object".into(),
        })?;

    let created_at = fields.get(CREATED_AT_FIELD).cloned();

    match fields.get(STORED_FINGERPRINT_FIELD) {
        Some(Value::String(hex)) => {
            if let Some(fingerprint) = Fingerprint::from_hex(hex) {
                return Ok(IndexEntry {
                    fingerprint,
                    stored: true,
                    created_at,
                });
            }
            tracing::debug!(doc_id = %doc.id, "ignoring malformed stored fingerprint");
        }
        Some(_) => tracing::debug!(doc_id = %doc.id, "ignoring non-string stored fingerprint"),
        None => {}
    }

    let decoded = encoder
        .decode(fields)
        .map_err(|e| StoreError::MalformedDocument {
            id: doc.id.clone(),
            reason: e.to_string(),
        })?;

    Ok(IndexEntry {
        fingerprint: hasher.fingerprint(&decoded),
        stored: false,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;

    fn fields(value: Value) -> crate::record::Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fixture must be an object"),
        }
    }

    #[tokio::test]
    async fn uses_stored_fingerprint() {
        let store = MemoryStore::new();
        let stored = Fingerprint::of_bytes(b"anything");
        store.insert(
            "contracts",
            "c1",
            json!({"name": "x", "_fingerprint": stored.as_str()}),
        );

        let index = load_index(
            &store,
            "contracts",
            &CanonicalHasher::new(),
            &StructureEncoder::default(),
        )
        .await
        .unwrap();

        assert_eq!(index.get("c1"), Some(&stored));
        assert!(index.entry("c1").unwrap().stored);
        assert_eq!(index.entry("c1").unwrap().created_at, None);
        assert_eq!(index.recomputed(), 0);
    }

    #[tokio::test]
    async fn recomputes_missing_or_bad_fingerprint() {
        let store = MemoryStore::new();
        store.insert(
            "contracts",
            "c1",
            json!({"name": "x", "created_at": "t0", "updated_at": "t1"}),
        );
        store.insert("contracts", "c2", json!({"name": "x", "_fingerprint": "zz"}));

        let hasher = CanonicalHasher::new();
        let index = load_index(&store, "contracts", &hasher, &StructureEncoder::default())
            .await
            .unwrap();

        let expected = hasher.fingerprint(&fields(json!({"name": "x"})));
        assert_eq!(index.get("c1"), Some(&expected));
        assert_eq!(index.get("c2"), Some(&expected));
        assert_eq!(index.recomputed(), 2);
        assert_eq!(index.entry("c1").unwrap().created_at, Some(json!("t0")));
    }

    #[tokio::test]
    async fn recomputed_fingerprint_sees_through_encoding() {
        let store = MemoryStore::new();
        let encoder = StructureEncoder::default();
        let hasher = CanonicalHasher::new();
        let original = fields(json!({"path": [[1.5, 2.5], [3.5, 4.5]], "name": "road"}));
        let encoded = encoder.encode(&original).unwrap();
        store.insert("units", "u1", Value::Object(encoded));

        let index = load_index(&store, "units", &hasher, &encoder).await.unwrap();

        assert_eq!(index.get("u1"), Some(&hasher.fingerprint(&original)));
    }

    #[tokio::test]
    async fn malformed_documents_skipped() {
        let store = MemoryStore::with_page_size(2);
        store.insert("units", "a", json!({"ok": 1}));
        store.insert("units", "b", json!(["not", "an", "object"]));
        store.insert("units", "c", json!({"path": "[[", "path__shape": "list"}));
        store.insert("units", "d", json!({"ok": 2}));

        let index = load_index(
            &store,
            "units",
            &CanonicalHasher::new(),
            &StructureEncoder::default(),
        )
        .await
        .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.skipped(), 2);
        assert!(index.contains("a"));
        assert!(index.contains("d"));
    }

    #[tokio::test]
    async fn scan_broken_off_midway_is_not_a_skip() {
        let store = MemoryStore::with_page_size(1);
        store.insert("contracts", "contract_A", json!({"contract_reference": "A"}));
        store.insert("contracts", "contract_B", json!({"contract_reference": "B"}));
        store.fail_page(2);

        let result = load_index(
            &store,
            "contracts",
            &CanonicalHasher::new(),
            &StructureEncoder::default(),
        )
        .await;

        assert!(matches!(result, Err(SyncError::IndexIncomplete(_))));
    }

    #[tokio::test]
    async fn unreachable_store_is_fatal() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let result = load_index(
            &store,
            "units",
            &CanonicalHasher::new(),
            &StructureEncoder::default(),
        )
        .await;

        assert!(matches!(result, Err(SyncError::StoreUnavailable(_))));
    }
}
