//! Size-bounded batch writes.
//!
//! Writes are cut into consecutive batches of at most `batch_size` records.
//! Each batch is committed atomically. A failed batch is reported whole and
//! never retried record by record; the writer moves on to the next one.
//!
//! Per-record lifecycle:
//!
//! ```text
//! Pending ──stage──▶ Staged ──commit ok──▶ Committed
//!                          └─commit err──▶ Failed
//! ```
//!
//! Records of batches never issued (cancellation) stay `Pending`.

use crate::{
    error::SyncError,
    record::Fields,
    store::{DocumentStore, StoreBatch, WriteMode},
    DocumentId,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Largest batch most document stores accept in one atomic commit.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// One document write, ready for a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub id: DocumentId,
    pub fields: Fields,
    pub mode: WriteMode,
}

impl PendingWrite {
    pub fn new(id: impl Into<DocumentId>, fields: Fields, mode: WriteMode) -> Self {
        Self {
            id: id.into(),
            fields,
            mode,
        }
    }
}

/// Where the records of a batch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteState {
    Pending,
    Staged,
    Committed,
    Failed,
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Position of the batch in the plan, 0-based
    pub index: usize,
    pub size: usize,
    pub state: WriteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub document_ids: Vec<DocumentId>,
}

impl BatchResult {
    fn deferred(index: usize, writes: &[PendingWrite]) -> Self {
        Self {
            index,
            size: writes.len(),
            state: WriteState::Pending,
            error: None,
            document_ids: writes.iter().map(|w| w.id.clone()).collect(),
        }
    }
}

/// Aggregate of all batches of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub batches: Vec<BatchResult>,
    pub written_count: usize,
    pub failed_count: usize,
    pub deferred_count: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub batches_deferred: usize,
}

impl WriteSummary {
    fn from_results(mut batches: Vec<BatchResult>) -> Self {
        batches.sort_by_key(|b| b.index);

        let mut summary = WriteSummary::default();
        for batch in &batches {
            match batch.state {
                WriteState::Committed => {
                    summary.written_count += batch.size;
                    summary.batches_committed += 1;
                }
                WriteState::Failed => {
                    summary.failed_count += batch.size;
                    summary.batches_failed += 1;
                }
                WriteState::Pending | WriteState::Staged => {
                    summary.deferred_count += batch.size;
                    summary.batches_deferred += 1;
                }
            }
        }
        summary.batches = batches;
        summary
    }

    /// Batch error messages, in batch order.
    pub fn errors(&self) -> Vec<String> {
        self.batches
            .iter()
            .filter_map(|b| {
                b.error
                    .as_ref()
                    .map(|e| format!("batch {} ({} records): {}", b.index + 1, b.size, e))
            })
            .collect()
    }

    /// Ids of every record in a failed batch.
    pub fn failed_documents(&self) -> Vec<DocumentId> {
        self.batches
            .iter()
            .filter(|b| b.state == WriteState::Failed)
            .flat_map(|b| b.document_ids.iter().cloned())
            .collect()
    }
}

/// Splits writes into batches and commits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWriter {
    batch_size: usize,
    max_in_flight: usize,
}

impl BatchWriter {
    /// Create a serial writer. `batch_size` must be at least 1.
    pub fn new(batch_size: usize) -> Result<Self, SyncError> {
        if batch_size == 0 {
            return Err(SyncError::InvalidOptions(
                "batch size must be at least 1".into(),
            ));
        }
        Ok(Self {
            batch_size,
            max_in_flight: 1,
        })
    }

    /// Allow up to `max_in_flight` commits at once.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cut writes into consecutive batches.
    pub fn plan(&self, writes: Vec<PendingWrite>) -> Vec<Vec<PendingWrite>> {
        let mut batches = Vec::with_capacity(writes.len().div_ceil(self.batch_size));
        let mut writes = writes.into_iter().peekable();
        while writes.peek().is_some() {
            batches.push(writes.by_ref().take(self.batch_size).collect());
        }
        batches
    }

    /// Commit every write. Batches not yet issued when `cancel` fires are
    /// reported as deferred.
    pub async fn write_all<S: DocumentStore>(
        &self,
        store: &S,
        collection: &str,
        writes: Vec<PendingWrite>,
        cancel: &CancellationToken,
    ) -> WriteSummary {
        let mut planned = self.plan(writes).into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::new();

        loop {
            while in_flight.len() < self.max_in_flight && !cancel.is_cancelled() {
                match planned.next() {
                    Some((index, batch)) => {
                        in_flight.push(commit_batch(store, collection, index, batch))
                    }
                    None => break,
                }
            }

            match in_flight.next().await {
                Some(result) => results.push(result),
                None => break,
            }
        }

        let deferred: Vec<BatchResult> = planned
            .map(|(index, batch)| BatchResult::deferred(index, &batch))
            .collect();
        if !deferred.is_empty() {
            tracing::warn!(
                collection,
                batches = deferred.len(),
                "sync cancelled, remaining batches deferred"
            );
        }
        results.extend(deferred);

        WriteSummary::from_results(results)
    }
}

async fn commit_batch<S: DocumentStore>(
    store: &S,
    collection: &str,
    index: usize,
    writes: Vec<PendingWrite>,
) -> BatchResult {
    let mut batch = store.new_batch(collection);
    let mut document_ids = Vec::with_capacity(writes.len());
    for write in writes {
        batch.set(&write.id, write.fields, write.mode);
        document_ids.push(write.id);
    }
    let size = batch.len();

    match batch.commit().await {
        Ok(()) => {
            tracing::debug!(collection, batch = index + 1, size, "batch committed");
            BatchResult {
                index,
                size,
                state: WriteState::Committed,
                error: None,
                document_ids,
            }
        }
        Err(e) => {
            tracing::error!(collection, batch = index + 1, size, error = %e, "batch commit failed");
            BatchResult {
                index,
                size,
                state: WriteState::Failed,
                error: Some(e.to_string()),
                document_ids,
            }
        }
    }
}
