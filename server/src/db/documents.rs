//! PostgreSQL-backed document store.
//!
//! Every collection lives in the shared `documents` table, keyed by
//! `(collection, doc_id)`. Scans page through a collection in `doc_id` order
//! and a batch commits all of its upserts in one transaction.

use async_trait::async_trait;
use docsync_engine::{
    CollectionName, DocumentId, DocumentStore, Fields, RawDocument, StoreBatch, StoreError,
    WriteMode,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use sqlx::PgPool;

const SELECT_PAGE: &str = r#"
    SELECT doc_id, data
    FROM documents
    WHERE collection = $1 AND ($2::text IS NULL OR doc_id > $2)
    ORDER BY doc_id
    LIMIT $3
"#;

const UPSERT_SET: &str = r#"
    INSERT INTO documents (collection, doc_id, data, written_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (collection, doc_id) DO UPDATE SET
        data = EXCLUDED.data,
        written_at = NOW()
"#;

const UPSERT_MERGE: &str = r#"
    INSERT INTO documents (collection, doc_id, data, written_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (collection, doc_id) DO UPDATE SET
        data = documents.data || EXCLUDED.data,
        written_at = NOW()
"#;

/// Map a driver error, treating connection-level failures as an unreachable store.
fn store_error(e: sqlx::Error, otherwise: fn(String) -> StoreError) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        other => otherwise(other.to_string()),
    }
}

/// [`DocumentStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    page_size: usize,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, page_size: usize) -> Self {
        Self {
            pool,
            page_size: page_size.max(1),
        }
    }

    async fn page(
        &self,
        collection: &str,
        after: Option<&str>,
    ) -> Result<Vec<RawDocument>, StoreError> {
        let rows: Vec<(String, Value)> = sqlx::query_as(SELECT_PAGE)
            .bind(collection)
            .bind(after)
            .bind(i64::try_from(self.page_size).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, StoreError::Query))?;

        Ok(rows
            .into_iter()
            .map(|(id, data)| RawDocument::new(id, data))
            .collect())
    }
}

impl DocumentStore for PgDocumentStore {
    type Batch = PgBatch;

    fn stream<'a>(
        &'a self,
        collection: &'a str,
    ) -> BoxStream<'a, Result<RawDocument, StoreError>> {
        // Outer None ends the stream; inner None is the first page.
        stream::unfold(Some(None::<DocumentId>), move |cursor| async move {
            let after = cursor?;
            match self.page(collection, after.as_deref()).await {
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

    fn new_batch(&self, collection: &str) -> PgBatch {
        PgBatch {
            pool: self.pool.clone(),
            collection: collection.to_string(),
            writes: Vec::new(),
        }
    }
}

/// Upserts staged for one transaction.
#[derive(Debug)]
pub struct PgBatch {
    pool: PgPool,
    collection: CollectionName,
    writes: Vec<(DocumentId, Fields, WriteMode)>,
}

#[async_trait]
impl StoreBatch for PgBatch {
    fn set(&mut self, id: &str, fields: Fields, mode: WriteMode) {
        self.writes.push((id.to_string(), fields, mode));
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        let PgBatch {
            pool,
            collection,
            writes,
        } = self;

        // Dropping the transaction on an early return rolls it back.
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| store_error(e, StoreError::Commit))?;

        for (id, fields, mode) in writes {
            let sql = match mode {
                WriteMode::Set => UPSERT_SET,
                WriteMode::Merge => UPSERT_MERGE,
            };
            sqlx::query(sql)
                .bind(&collection)
                .bind(&id)
                .bind(Value::Object(fields))
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error(e, StoreError::Commit))?;
        }

        tx.commit()
            .await
            .map_err(|e| store_error(e, StoreError::Commit))?;

        Ok(())
    }
}
