//! Sync orchestration.
//!
//! [`SyncEngine::sync`] runs one full pass for a record kind against one
//! collection:
//!
//! ```text
//! load_index ─▶ classify ─▶ encode + stamp ─▶ write_all ─▶ SyncReport
//! ```
//!
//! Each phase finishes before the next starts, so classification always sees
//! one consistent snapshot of the collection.

use crate::{
    batch::{BatchWriter, PendingWrite, WriteSummary, DEFAULT_BATCH_SIZE},
    error::{RecordError, Result, SyncError},
    hasher::{CREATED_AT_FIELD, STORED_FINGERPRINT_FIELD, UPDATED_AT_FIELD},
    index::load_index,
    store::{DocumentStore, WriteMode},
    CandidateRecord, CanonicalHasher, ChangeClassification, ClassifiedRecord, DiffEngine,
    ProfileRegistry, RemoteIndex, StructureEncoder, SyncReport,
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Records per atomic commit, at least 1
    pub batch_size: usize,
    /// Concurrent batch commits; 1 commits serially
    pub max_in_flight: usize,
    /// Classify only
    pub dry_run: bool,
    /// Write MODIFIED records as full replacements instead of merges
    pub replace_modified: bool,
    /// Fixed stamp for synthesized identities; defaults to the run's start time
    pub run_stamp: Option<i64>,
    /// Stops issuing batches once cancelled
    pub cancel: CancellationToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: 1,
            dry_run: false,
            replace_modified: false,
            run_stamp: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_replace_modified(mut self, replace: bool) -> Self {
        self.replace_modified = replace;
        self
    }

    pub fn with_run_stamp(mut self, run_stamp: i64) -> Self {
        self.run_stamp = Some(run_stamp);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidOptions(
                "batch size must be at least 1".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(SyncError::InvalidOptions(
                "max in flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Kind-parametric sync engine. Holds configuration only; every run reads
/// its state from the store it is given.
#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    registry: ProfileRegistry,
    encoder: StructureEncoder,
}

impl SyncEngine {
    pub fn new(registry: ProfileRegistry) -> Self {
        Self {
            registry,
            encoder: StructureEncoder::default(),
        }
    }

    pub fn with_encoder(mut self, encoder: StructureEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn encoder(&self) -> &StructureEncoder {
        &self.encoder
    }

    /// Bring `collection` in line with `candidates` of one record kind.
    ///
    /// Returns `Err` only when the run could not start: bad options, an
    /// unreachable store or a scan that broke off. Everything else ends up in
    /// the report.
    pub async fn sync<S: DocumentStore>(
        &self,
        store: &S,
        candidates: Vec<CandidateRecord>,
        kind: &str,
        collection: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        options.validate()?;
        if collection.is_empty() {
            return Err(SyncError::InvalidOptions(
                "collection name must not be empty".into(),
            ));
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let writer =
            BatchWriter::new(options.batch_size)?.with_max_in_flight(options.max_in_flight);

        let profile = self.registry.resolve(kind);
        let hasher = CanonicalHasher::for_profile(&profile);

        tracing::debug!(collection, kind, candidates = candidates.len(), "sync started");

        let index = load_index(store, collection, &hasher, &self.encoder).await?;

        let diff = match options.run_stamp {
            Some(stamp) => DiffEngine::with_run_stamp(&self.registry, stamp),
            None => DiffEngine::with_run_stamp(&self.registry, started_at.timestamp_millis()),
        };
        let outcome = diff.classify(candidates, kind, &index);
        let changes = outcome.summary;
        let mut errors: Vec<String> = outcome.errors.iter().map(ToString::to_string).collect();

        let writes = if options.dry_run {
            WriteSummary::default()
        } else {
            let now = Value::String(started_at.to_rfc3339_opts(SecondsFormat::Millis, true));
            let mut pending = Vec::with_capacity(changes.pending_writes());
            for classified in outcome.into_writes() {
                let (write, error) = self.prepare(classified, &index, &now, options);
                if let Some(e) = error {
                    errors.push(e.to_string());
                }
                pending.push(write);
            }
            writer.write_all(store, collection, pending, &options.cancel).await
        };

        let mut report = SyncReport::assemble(
            collection,
            kind,
            &changes,
            &writes,
            options.dry_run,
            started_at,
        );
        errors.append(&mut report.errors);
        report.errors = errors;
        report.index_size = index.len();
        report.index_skipped = index.skipped();
        report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            collection,
            kind,
            status = ?report.status,
            new = report.new_count,
            modified = report.modified_count,
            unchanged = report.unchanged_count,
            written = report.written_count,
            failed = report.failed_count,
            deferred = report.deferred_count,
            duration_ms = report.duration_ms,
            "sync finished"
        );

        Ok(report)
    }

    /// Turn a classified record into a stamped, store-safe write.
    fn prepare(
        &self,
        classified: ClassifiedRecord,
        index: &RemoteIndex,
        now: &Value,
        options: &SyncOptions,
    ) -> (PendingWrite, Option<RecordError>) {
        let ClassifiedRecord {
            id,
            fingerprint,
            change,
            record,
            ..
        } = classified;
        let raw = record.into_fields();

        let (mut fields, error) = match self.encoder.encode(&raw) {
            Ok(encoded) => (encoded, None),
            Err(e) => {
                tracing::warn!(doc_id = %id, error = %e, "encoding failed, writing raw fields");
                (raw, Some(e))
            }
        };

        fields.insert(
            STORED_FINGERPRINT_FIELD.to_string(),
            Value::String(fingerprint.as_str().to_string()),
        );
        fields.insert(UPDATED_AT_FIELD.to_string(), now.clone());

        let mode = match change {
            ChangeClassification::Modified if options.replace_modified => {
                if let Some(created) = index.entry(&id).and_then(|e| e.created_at.clone()) {
                    fields.insert(CREATED_AT_FIELD.to_string(), created);
                }
                WriteMode::Set
            }
            ChangeClassification::Modified => {
                // Merge must not clobber the stored creation stamp.
                fields.remove(CREATED_AT_FIELD);
                WriteMode::Merge
            }
            ChangeClassification::New | ChangeClassification::Unchanged => {
                fields
                    .entry(CREATED_AT_FIELD.to_string())
                    .or_insert_with(|| now.clone());
                WriteMode::Set
            }
        };

        (PendingWrite::new(id, fields, mode), error)
    }
}
