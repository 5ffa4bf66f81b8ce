//! Sync run report.

use crate::{ChangeSummary, CollectionName, DocumentId, RecordKind, WriteSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall outcome of a run that got to start.
///
/// A run that could not start at all is an `Err(SyncError)`, never a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing needed writing
    UpToDate,
    /// Every pending write was committed
    Written,
    /// At least one batch failed to commit
    PartiallyFailed,
    /// Stopped before every batch was issued
    Cancelled,
    /// Classified only; nothing was written
    DryRun,
}

/// What a sync run did. Plain data, serializable as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub collection: CollectionName,
    pub kind: RecordKind,
    pub status: SyncStatus,

    pub new_count: usize,
    pub modified_count: usize,
    pub unchanged_count: usize,
    pub written_count: usize,
    pub failed_count: usize,
    pub deferred_count: usize,

    pub batches_committed: usize,
    pub batches_failed: usize,
    pub batches_deferred: usize,

    pub synthesized_identities: usize,
    pub duplicate_count: usize,
    pub index_size: usize,
    pub index_skipped: usize,

    pub errors: Vec<String>,
    pub failed_documents: Vec<DocumentId>,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// Assemble a report from the classification and write phases.
    pub(crate) fn assemble(
        collection: &str,
        kind: &str,
        changes: &ChangeSummary,
        writes: &WriteSummary,
        dry_run: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let status = if dry_run {
            SyncStatus::DryRun
        } else if writes.batches_failed > 0 {
            SyncStatus::PartiallyFailed
        } else if writes.batches_deferred > 0 {
            SyncStatus::Cancelled
        } else if changes.pending_writes() == 0 {
            SyncStatus::UpToDate
        } else {
            SyncStatus::Written
        };

        Self {
            collection: collection.to_string(),
            kind: kind.to_string(),
            status,
            new_count: changes.new_count,
            modified_count: changes.modified_count,
            unchanged_count: changes.unchanged_count,
            written_count: writes.written_count,
            failed_count: writes.failed_count,
            deferred_count: writes.deferred_count,
            batches_committed: writes.batches_committed,
            batches_failed: writes.batches_failed,
            batches_deferred: writes.batches_deferred,
            synthesized_identities: changes.synthesized_count,
            duplicate_count: changes.duplicate_count,
            index_size: 0,
            index_skipped: 0,
            errors: writes.errors(),
            failed_documents: writes.failed_documents(),
            started_at,
            duration_ms: 0,
        }
    }

    /// Whether every attempted write landed.
    pub fn is_complete(&self) -> bool {
        matches!(self.status, SyncStatus::UpToDate | SyncStatus::Written)
    }

    /// Whether the caller should re-run the sync to finish the job.
    pub fn needs_rerun(&self) -> bool {
        self.failed_count > 0 || self.deferred_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(new: usize, modified: usize, unchanged: usize) -> ChangeSummary {
        ChangeSummary {
            new_count: new,
            modified_count: modified,
            unchanged_count: unchanged,
            ..ChangeSummary::default()
        }
    }

    #[test]
    fn status_up_to_date() {
        let report = SyncReport::assemble(
            "c",
            "k",
            &changes(0, 0, 4),
            &WriteSummary::default(),
            false,
            Utc::now(),
        );
        assert_eq!(report.status, SyncStatus::UpToDate);
        assert!(report.is_complete());
        assert!(!report.needs_rerun());
    }

    #[test]
    fn status_partially_failed() {
        let writes = WriteSummary {
            written_count: 2,
            failed_count: 1,
            batches_committed: 1,
            batches_failed: 1,
            ..WriteSummary::default()
        };
        let report =
            SyncReport::assemble("c", "k", &changes(3, 0, 0), &writes, false, Utc::now());

        assert_eq!(report.status, SyncStatus::PartiallyFailed);
        assert!(!report.is_complete());
        assert!(report.needs_rerun());
    }

    #[test]
    fn status_dry_run_wins() {
        let report = SyncReport::assemble(
            "c",
            "k",
            &changes(3, 0, 0),
            &WriteSummary::default(),
            true,
            Utc::now(),
        );
        assert_eq!(report.status, SyncStatus::DryRun);
    }

    #[test]
    fn serializes_with_snake_case_fields() {
        let report = SyncReport::assemble(
            "contracts",
            "contract",
            &changes(1, 0, 0),
            &WriteSummary {
                written_count: 1,
                batches_committed: 1,
                ..WriteSummary::default()
            },
            false,
            Utc::now(),
        );

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], json!("written"));
        assert_eq!(value["new_count"], json!(1));
        assert_eq!(value["written_count"], json!(1));
        assert_eq!(value["batches_failed"], json!(0));
        assert_eq!(value["errors"], json!([]));
        assert!(value.get("duration_ms").is_some());

        let parsed: SyncReport = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, report);
    }
}
