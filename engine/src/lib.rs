//! # DocSync Engine
//!
//! An incremental sync engine for document stores.
//!
//! Given freshly computed records and a handle to a remote collection, the
//! engine works out which records are new, which changed and which are
//! already in place, and writes only the first two, in bounded atomic batches.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: all store access goes through the [`DocumentStore`] trait
//! - **Idempotent**: re-running a sync on unchanged input writes nothing
//! - **Kind-parametric**: per-kind behavior lives in [`KindProfile`] tables, not code
//! - **Failure-tolerant**: one bad record or one failed batch never stops a run
//!
//! ## Core Concepts
//!
//! ### Fingerprints
//!
//! The [`CanonicalHasher`] reduces a record's business fields to a canonical
//! byte form (sorted keys, stable numbers) and hashes it with SHA-256.
//! Bookkeeping fields such as `created_at` and the stored `_fingerprint` are
//! left out, so they never count as a change.
//!
//! ### Identities
//!
//! The [`IdentityResolver`] tries the ordered strategies of a record kind's
//! profile and falls back to a synthesized key when none applies:
//! - [`IdentitySource::Field`] - a single strong field
//! - [`IdentitySource::Composite`] - several fields joined
//! - [`IdentitySource::Synthesized`] - hash of key fields plus a run stamp
//! - [`IdentitySource::Generated`] - random key after a resolution failure
//!
//! ### Classification
//!
//! The [`DiffEngine`] compares each candidate against the [`RemoteIndex`]
//! built by [`load_index`] and marks it [`ChangeClassification::New`],
//! [`ChangeClassification::Modified`] or [`ChangeClassification::Unchanged`].
//!
//! ### Writes
//!
//! The [`BatchWriter`] commits pending writes in batches of at most
//! `batch_size` records. A failed batch is reported whole and the writer moves
//! on; nested arrays are made store-safe by the [`StructureEncoder`] first.
//!
//! ## Quick Start
//!
//! ```rust
//! use docsync_engine::{
//!     CandidateRecord, MemoryStore, ProfileRegistry, SyncEngine, SyncOptions, SyncStatus,
//! };
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! // 1. Pick the record kind profiles
//! let engine = SyncEngine::new(ProfileRegistry::builtin());
//!
//! // 2. Any DocumentStore works; MemoryStore keeps everything in process
//! let store = MemoryStore::new();
//!
//! let candidates = || {
//!     vec![CandidateRecord::from_value(json!({
//!         "contract_reference": "CT-2024-001",
//!         "amount": 125000,
//!     }))
//!     .unwrap()]
//! };
//!
//! // 3. First run writes the record
//! let report = engine
//!     .sync(&store, candidates(), "contract", "contracts", &SyncOptions::new())
//!     .await
//!     .unwrap();
//! assert_eq!(report.status, SyncStatus::Written);
//! assert_eq!(report.written_count, 1);
//!
//! // 4. Second run finds nothing to do
//! let report = engine
//!     .sync(&store, candidates(), "contract", "contracts", &SyncOptions::new())
//!     .await
//!     .unwrap();
//! assert_eq!(report.status, SyncStatus::UpToDate);
//! assert_eq!(report.unchanged_count, 1);
//! # });
//! ```
//!
//! ## Reports
//!
//! [`SyncEngine::sync`] returns `Err` only when a run cannot start. Anything
//! that happens once it has started is in the [`SyncReport`], which
//! serializes to JSON.

pub mod batch;
pub mod diff;
pub mod encode;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod index;
pub mod memory;
pub mod profile;
pub mod record;
pub mod report;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use batch::{BatchResult, BatchWriter, PendingWrite, WriteState, WriteSummary};
pub use diff::{ChangeSummary, DiffEngine, DiffOutcome};
pub use encode::{Shape, StructureEncoder};
pub use error::{RecordError, StoreError, SyncError};
pub use hasher::{CanonicalHasher, Fingerprint};
pub use identity::{IdentityResolver, IdentitySource, ResolvedIdentity};
pub use index::{load_index, IndexEntry, RemoteIndex};
pub use memory::{MemoryBatch, MemoryStore};
pub use profile::{IdentityStrategy, KindProfile, ProfileRegistry};
pub use record::{CandidateRecord, ChangeClassification, ClassifiedRecord, Fields};
pub use report::{SyncReport, SyncStatus};
pub use store::{DocumentStore, RawDocument, StoreBatch, WriteMode};
pub use sync::{SyncEngine, SyncOptions};

/// Type aliases for clarity
pub type DocumentId = String;
pub type CollectionName = String;
pub type RecordKind = String;
