//! Change classification.
//!
//! Each candidate gets an identity and a fingerprint and is compared with the
//! remote index:
//!
//! 1. identity absent from the index → NEW
//! 2. present with a different fingerprint → MODIFIED
//! 3. present with the same fingerprint → UNCHANGED
//!
//! Only NEW and MODIFIED records continue to the write path. A record whose
//! identity cannot be resolved is still written, as NEW under a generated
//! key, and the error is kept for the report.

use crate::{
    error::RecordError, CandidateRecord, CanonicalHasher, ChangeClassification, ClassifiedRecord,
    DocumentId, IdentityResolver, IdentitySource, ProfileRegistry, RemoteIndex, ResolvedIdentity,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classification counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub new_count: usize,
    pub modified_count: usize,
    pub unchanged_count: usize,
    /// Records whose identity was synthesized or generated
    pub synthesized_count: usize,
    /// Candidates dropped because a later candidate had the same identity
    pub duplicate_count: usize,
}

impl ChangeSummary {
    fn record(&mut self, classified: &ClassifiedRecord) {
        match classified.change {
            ChangeClassification::New => self.new_count += 1,
            ChangeClassification::Modified => self.modified_count += 1,
            ChangeClassification::Unchanged => self.unchanged_count += 1,
        }
        if matches!(
            classified.source,
            IdentitySource::Synthesized | IdentitySource::Generated
        ) {
            self.synthesized_count += 1;
        }
    }

    /// Records that need a write.
    pub fn pending_writes(&self) -> usize {
        self.new_count + self.modified_count
    }

    /// Classified records, duplicates excluded.
    pub fn total(&self) -> usize {
        self.new_count + self.modified_count + self.unchanged_count
    }
}

/// Result of classifying a candidate set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffOutcome {
    /// Every surviving candidate, in input order
    pub classified: Vec<ClassifiedRecord>,
    pub summary: ChangeSummary,
    pub errors: Vec<RecordError>,
}

impl DiffOutcome {
    /// Records on the write path.
    pub fn to_write(&self) -> impl Iterator<Item = &ClassifiedRecord> {
        self.classified.iter().filter(|c| c.change.needs_write())
    }

    /// Consume the outcome, keeping only records on the write path.
    pub fn into_writes(self) -> Vec<ClassifiedRecord> {
        self.classified
            .into_iter()
            .filter(|c| c.change.needs_write())
            .collect()
    }
}

/// Classifies candidates against a remote index.
pub struct DiffEngine<'a> {
    registry: &'a ProfileRegistry,
    resolver: IdentityResolver<'a>,
}

impl<'a> DiffEngine<'a> {
    /// Create a diff engine whose synthesized identities use the current time.
    pub fn new(registry: &'a ProfileRegistry) -> Self {
        Self {
            registry,
            resolver: IdentityResolver::new(registry),
        }
    }

    /// Create a diff engine with a fixed run stamp.
    pub fn with_run_stamp(registry: &'a ProfileRegistry, run_stamp: i64) -> Self {
        Self {
            registry,
            resolver: IdentityResolver::with_run_stamp(registry, run_stamp),
        }
    }

    /// Classify every candidate of one record kind.
    pub fn classify(
        &self,
        candidates: Vec<CandidateRecord>,
        kind: &str,
        index: &RemoteIndex,
    ) -> DiffOutcome {
        let profile = self.registry.resolve(kind);
        let hasher = CanonicalHasher::for_profile(&profile);

        let mut slots: Vec<Option<ClassifiedRecord>> = Vec::with_capacity(candidates.len());
        let mut positions: HashMap<DocumentId, usize> = HashMap::new();
        let mut errors = Vec::new();
        let mut duplicates = 0;

        for record in candidates {
            let fingerprint = hasher.fingerprint(record.fields());

            let ResolvedIdentity { mut id, source } = match self.resolver.resolve(&record, kind) {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!(kind, error = %e, "identity resolution failed, writing as new");
                    errors.push(e);
                    ResolvedIdentity::generated()
                }
            };

            if positions.contains_key(&id) {
                // A synthesized key is only a duplicate of an identical record,
                // wherever its `_n` variant ended up.
                let holder = if source == IdentitySource::Synthesized {
                    variants(&id)
                        .take_while(|v| positions.contains_key(v))
                        .find(|v| {
                            positions
                                .get(v)
                                .and_then(|&at| slots[at].as_ref())
                                .is_some_and(|c| c.fingerprint == fingerprint)
                        })
                } else {
                    Some(id.clone())
                };

                match holder {
                    Some(holder) => {
                        tracing::warn!(
                            kind,
                            doc_id = %holder,
                            "duplicate identity, keeping later record"
                        );
                        errors.push(RecordError::DuplicateIdentity { id: holder.clone() });
                        if let Some(&earlier) = positions.get(&holder) {
                            slots[earlier] = None;
                        }
                        duplicates += 1;
                        id = holder;
                    }
                    None => id = disambiguate(&id, &positions),
                }
            }

            let change = match index.get(&id) {
                None => ChangeClassification::New,
                Some(remote) if *remote == fingerprint => ChangeClassification::Unchanged,
                Some(_) => ChangeClassification::Modified,
            };
            tracing::trace!(kind, doc_id = %id, %change, "classified");

            positions.insert(id.clone(), slots.len());
            slots.push(Some(ClassifiedRecord {
                id,
                source,
                fingerprint,
                change,
                record,
            }));
        }

        let classified: Vec<ClassifiedRecord> = slots.into_iter().flatten().collect();

        let mut summary = ChangeSummary {
            duplicate_count: duplicates,
            ..ChangeSummary::default()
        };
        for c in &classified {
            summary.record(c);
        }

        DiffOutcome {
            classified,
            summary,
            errors,
        }
    }
}

/// `id`, then `{id}_2`, `{id}_3`, ...
fn variants(id: &str) -> impl Iterator<Item = DocumentId> + '_ {
    std::iter::once(id.to_string()).chain((2..).map(move |n| format!("{}_{}", id, n)))
}

/// First variant of `id` not yet taken in this run.
fn disambiguate(id: &str, taken: &HashMap<DocumentId, usize>) -> DocumentId {
    variants(id)
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fingerprint;
    use serde_json::{json, Value};

    fn record(value: Value) -> CandidateRecord {
        CandidateRecord::from_value(value).unwrap()
    }

    fn fingerprint(value: Value) -> Fingerprint {
        CanonicalHasher::new().fingerprint(record(value).fields())
    }

    #[test]
    fn classifies_new_modified_unchanged() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 1);

        let index: RemoteIndex = vec![
            (
                "contract_A".to_string(),
                fingerprint(json!({"contract_reference": "A", "amount": 1})),
            ),
            (
                "contract_B".to_string(),
                fingerprint(json!({"contract_reference": "B", "amount": 1})),
            ),
        ]
        .into_iter()
        .collect();

        let outcome = engine.classify(
            vec![
                record(json!({"contract_reference": "A", "amount": 1})),
                record(json!({"contract_reference": "B", "amount": 2})),
                record(json!({"contract_reference": "C", "amount": 3})),
            ],
            "contract",
            &index,
        );

        let changes: Vec<_> = outcome.classified.iter().map(|c| c.change).collect();
        assert_eq!(
            changes,
            vec![
                ChangeClassification::Unchanged,
                ChangeClassification::Modified,
                ChangeClassification::New,
            ]
        );
        assert_eq!(outcome.summary.new_count, 1);
        assert_eq!(outcome.summary.modified_count, 1);
        assert_eq!(outcome.summary.unchanged_count, 1);
        assert_eq!(outcome.summary.pending_writes(), 2);
        assert!(outcome.errors.is_empty());

        let writes: Vec<_> = outcome.to_write().map(|c| c.id.as_str()).collect();
        assert_eq!(writes, vec!["contract_B", "contract_C"]);
    }

    #[test]
    fn volatile_fields_do_not_cause_modification() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 1);
        let index: RemoteIndex = vec![(
            "contract_A".to_string(),
            fingerprint(json!({"contract_reference": "A"})),
        )]
        .into_iter()
        .collect();

        let outcome = engine.classify(
            vec![record(
                json!({"contract_reference": "A", "updated_at": "2024-05-01"}),
            )],
            "contract",
            &index,
        );

        assert_eq!(outcome.summary.unchanged_count, 1);
    }

    #[test]
    fn identity_failure_defaults_to_new() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 1);

        let outcome = engine.classify(
            vec![record(json!({"created_at": "2024-01-01"}))],
            "contract",
            &RemoteIndex::new(),
        );

        assert_eq!(outcome.classified.len(), 1);
        let only = &outcome.classified[0];
        assert_eq!(only.change, ChangeClassification::New);
        assert_eq!(only.source, IdentitySource::Generated);
        assert_eq!(outcome.summary.synthesized_count, 1);
        assert_eq!(
            outcome.errors,
            vec![RecordError::NoIdentityFields {
                kind: "contract".into()
            }]
        );
    }

    #[test]
    fn duplicate_strong_identity_keeps_later() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 1);

        let outcome = engine.classify(
            vec![
                record(json!({"contract_reference": "A", "amount": 1})),
                record(json!({"contract_reference": "B"})),
                record(json!({"contract_reference": "A", "amount": 2})),
            ],
            "contract",
            &RemoteIndex::new(),
        );

        assert_eq!(outcome.classified.len(), 2);
        assert_eq!(outcome.classified[0].id, "contract_B");
        assert_eq!(outcome.classified[1].id, "contract_A");
        assert_eq!(outcome.classified[1].record.get("amount"), Some(&json!(2)));
        assert_eq!(outcome.summary.duplicate_count, 1);
        assert_eq!(outcome.summary.new_count, 2);
        assert!(matches!(
            &outcome.errors[..],
            [RecordError::DuplicateIdentity { id }] if id == "contract_A"
        ));
    }

    #[test]
    fn distinct_records_sharing_synthesized_key_are_kept_apart() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 42);

        // Same key fields, different business data.
        let outcome = engine.classify(
            vec![
                record(json!({"supplier_id": "S1", "note": "first"})),
                record(json!({"supplier_id": "S1", "note": "second"})),
            ],
            "contract",
            &RemoteIndex::new(),
        );

        assert_eq!(outcome.classified.len(), 2);
        let first = &outcome.classified[0].id;
        let second = &outcome.classified[1].id;
        assert_ne!(first, second);
        assert_eq!(second, &format!("{}_2", first));
        assert_eq!(outcome.summary.synthesized_count, 2);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn identical_synthesized_records_collapse() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 42);

        let outcome = engine.classify(
            vec![
                record(json!({"supplier_id": "S1", "note": "same"})),
                record(json!({"supplier_id": "S1", "note": "same"})),
            ],
            "contract",
            &RemoteIndex::new(),
        );

        assert_eq!(outcome.classified.len(), 1);
        assert_eq!(outcome.summary.duplicate_count, 1);
    }

    #[test]
    fn identical_record_collapses_onto_its_numbered_variant() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 7);

        let outcome = engine.classify(
            vec![
                record(json!({"supplier_id": "S1", "note": "a"})),
                record(json!({"supplier_id": "S1", "note": "b"})),
                record(json!({"supplier_id": "S1", "note": "b"})),
            ],
            "contract",
            &RemoteIndex::new(),
        );

        let ids: Vec<_> = outcome.classified.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], format!("{}_2", ids[0]));
        assert_eq!(outcome.summary.duplicate_count, 1);
        assert_eq!(outcome.summary.new_count, 2);
        assert!(matches!(
            &outcome.errors[..],
            [RecordError::DuplicateIdentity { id }] if id == ids[1]
        ));
    }

    #[test]
    fn empty_candidates() {
        let registry = ProfileRegistry::builtin();
        let engine = DiffEngine::with_run_stamp(&registry, 1);

        let outcome = engine.classify(vec![], "contract", &RemoteIndex::new());
        assert_eq!(outcome, DiffOutcome::default());
    }
}
