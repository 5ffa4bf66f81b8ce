//! Document identity resolution.
//!
//! An identity is derived from the first usable strategy of the record kind's
//! profile. Values from any strategy after the first are prefixed with that
//! strategy's label (`contract_contract_id-5`). When none applies, an
//! identity is synthesized from a hash of the record's key fields and a
//! per-run stamp; such identities are flagged so callers can count them,
//! since they are not stable across runs.

use crate::{
    error::RecordError, hasher::canonical_number, CandidateRecord, CanonicalHasher, DocumentId,
    Fingerprint, IdentityStrategy, KindProfile, ProfileRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest identity accepted as-is, in bytes. Longer ones are replaced by a hash.
pub const MAX_IDENTITY_BYTES: usize = 1500;

/// Where an identity came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IdentitySource {
    /// A single identity field
    Field { name: String },
    /// Several fields joined
    Composite { fields: String },
    /// Hash of key fields plus the run stamp
    Synthesized,
    /// Random key assigned after identity resolution failed
    Generated,
}

/// A resolved document key and its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub id: DocumentId,
    pub source: IdentitySource,
}

impl ResolvedIdentity {
    /// Whether this identity may differ on the next run for the same input.
    pub fn is_synthesized(&self) -> bool {
        matches!(
            self.source,
            IdentitySource::Synthesized | IdentitySource::Generated
        )
    }

    /// Random identity for records whose identity could not be resolved.
    pub fn generated() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: IdentitySource::Generated,
        }
    }
}

/// Resolves identities against a profile registry.
pub struct IdentityResolver<'a> {
    registry: &'a ProfileRegistry,
    run_stamp: i64,
}

impl<'a> IdentityResolver<'a> {
    /// Create a resolver stamped with the current time.
    pub fn new(registry: &'a ProfileRegistry) -> Self {
        Self::with_run_stamp(registry, chrono::Utc::now().timestamp_millis())
    }

    /// Create a resolver with a fixed run stamp.
    pub fn with_run_stamp(registry: &'a ProfileRegistry, run_stamp: i64) -> Self {
        Self {
            registry,
            run_stamp,
        }
    }

    pub fn run_stamp(&self) -> i64 {
        self.run_stamp
    }

    /// Resolve the document identity of a record.
    pub fn resolve(
        &self,
        record: &CandidateRecord,
        kind: &str,
    ) -> Result<ResolvedIdentity, RecordError> {
        let profile = self.registry.resolve(kind);

        for (position, strategy) in profile.identity.iter().enumerate() {
            let candidate = match strategy {
                IdentityStrategy::Field { name } => record
                    .get(name)
                    .and_then(identity_text)
                    .map(|value| (value, IdentitySource::Field { name: name.clone() })),
                IdentityStrategy::Composite { fields, separator } => fields
                    .iter()
                    .map(|f| record.get(f).and_then(identity_text))
                    .collect::<Option<Vec<_>>>()
                    .map(|parts| {
                        (
                            parts.join(separator),
                            IdentitySource::Composite {
                                fields: strategy.label(),
                            },
                        )
                    }),
            };

            if let Some((value, source)) = candidate {
                // Fallback values get their own namespace so a weak field can
                // never land on a document keyed by a stronger one.
                let value = if position == 0 {
                    value
                } else {
                    format!("{}-{}", normalize(&strategy.label()), value)
                };
                let id = finish(&profile, value)?;
                return Ok(ResolvedIdentity { id, source });
            }
        }

        self.synthesize(record, &profile)
    }

    fn synthesize(
        &self,
        record: &CandidateRecord,
        profile: &KindProfile,
    ) -> Result<ResolvedIdentity, RecordError> {
        let hasher = CanonicalHasher::for_profile(profile);

        let mut key = crate::record::Fields::new();
        for name in &profile.key_fields {
            if let Some(value) = record.get(name).filter(|v| !v.is_null()) {
                key.insert(name.clone(), value.clone());
            }
        }
        if key.is_empty() {
            key = hasher
                .business_fields(record.fields())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
        if key.is_empty() {
            return Err(RecordError::NoIdentityFields {
                kind: profile.kind.clone(),
            });
        }

        let fingerprint = hasher.fingerprint(&key);
        Ok(ResolvedIdentity {
            id: format!(
                "{}_syn_{}_{}",
                profile.kind,
                fingerprint.short(),
                self.run_stamp
            ),
            source: IdentitySource::Synthesized,
        })
    }
}

/// Normalized text of an identity field, or `None` if the value cannot identify.
fn identity_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => normalize(s),
        Value::Number(n) => canonical_number(n),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Trim, join whitespace runs with `_` and turn path separators into `-`.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace(['/', '\\'], "-")
}

fn finish(profile: &KindProfile, value: String) -> Result<String, RecordError> {
    let id = if profile.tag_identity {
        format!("{}_{}", profile.kind, value)
    } else {
        value
    };

    let reserved = id.len() > 4 && id.starts_with("__") && id.ends_with("__");
    if id == "." || id == ".." || reserved {
        return Err(RecordError::InvalidIdentity {
            kind: profile.kind.clone(),
            value: id,
        });
    }

    if id.len() > MAX_IDENTITY_BYTES {
        return Ok(format!(
            "{}_long_{}",
            profile.kind,
            Fingerprint::of_bytes(id.as_bytes())
        ));
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> CandidateRecord {
        CandidateRecord::from_value(value).unwrap()
    }

    #[test]
    fn first_strategy_wins() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let identity = resolver
            .resolve(
                &record(json!({"contract_reference": "CT-001", "contract_id": 99})),
                "contract",
            )
            .unwrap();

        assert_eq!(identity.id, "contract_CT-001");
        assert_eq!(
            identity.source,
            IdentitySource::Field {
                name: "contract_reference".into()
            }
        );
        assert!(!identity.is_synthesized());
    }

    #[test]
    fn falls_back_to_weaker_field() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let identity = resolver
            .resolve(
                &record(json!({"contract_reference": "   ", "contract_id": 4512.0})),
                "contract",
            )
            .unwrap();

        assert_eq!(identity.id, "contract_contract_id-4512");
    }

    #[test]
    fn weak_field_does_not_share_strong_namespace() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let strong = resolver
            .resolve(&record(json!({"contract_reference": "5"})), "contract")
            .unwrap();
        let weak = resolver
            .resolve(&record(json!({"contract_id": 5})), "contract")
            .unwrap();

        assert_eq!(strong.id, "contract_5");
        assert_eq!(weak.id, "contract_contract_id-5");
        assert_eq!(
            weak.source,
            IdentitySource::Field {
                name: "contract_id".into()
            }
        );
    }

    #[test]
    fn composite_requires_all_fields() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let full = resolver
            .resolve(
                &record(json!({"project_code": "BP 77", "fiscal_year": 2024})),
                "budget_project",
            )
            .unwrap();
        assert_eq!(full.id, "budget_project_BP_77-2024");
        assert!(matches!(full.source, IdentitySource::Composite { .. }));

        let partial = resolver
            .resolve(&record(json!({"project_code": "BP 77"})), "budget_project")
            .unwrap();
        assert_eq!(partial.id, "budget_project_project_code-BP_77");
    }

    #[test]
    fn normalizes_separators_and_whitespace() {
        assert_eq!(normalize("  a  b\tc "), "a_b_c");
        assert_eq!(normalize("2024/01\\x"), "2024-01-x");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn untagged_profile() {
        let registry = ProfileRegistry::new().with_profile(
            KindProfile::new("doc", vec![IdentityStrategy::field("key")]).with_tag_identity(false),
        );
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let identity = resolver.resolve(&record(json!({"key": "abc"})), "doc").unwrap();
        assert_eq!(identity.id, "abc");

        let result = resolver.resolve(&record(json!({"key": ".."})), "doc");
        assert!(matches!(result, Err(RecordError::InvalidIdentity { .. })));

        let result = resolver.resolve(&record(json!({"key": "__name__"})), "doc");
        assert!(matches!(result, Err(RecordError::InvalidIdentity { .. })));
    }

    #[test]
    fn long_identity_is_hashed() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);
        let long = "x".repeat(MAX_IDENTITY_BYTES + 1);

        let a = resolver
            .resolve(&record(json!({"unit_id": long.clone()})), "project_unit")
            .unwrap();
        let b = resolver
            .resolve(&record(json!({"unit_id": long})), "project_unit")
            .unwrap();

        assert!(a.id.starts_with("project_unit_long_"));
        assert!(a.id.len() <= MAX_IDENTITY_BYTES);
        assert_eq!(a, b);
    }

    #[test]
    fn synthesized_identity_uses_key_fields() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1700000000000);

        let a = record(json!({
            "process_reference": null,
            "supplier_id": "S1",
            "amount": 10,
            "note": "x",
        }));
        let b = record(json!({"supplier_id": "S1", "amount": 10, "note": "y"}));

        let id_a = resolver.resolve(&a, "contract").unwrap();
        let id_b = resolver.resolve(&b, "contract").unwrap();

        assert_eq!(id_a.source, IdentitySource::Synthesized);
        assert!(id_a.is_synthesized());
        assert!(id_a.id.starts_with("contract_syn_"));
        assert!(id_a.id.ends_with("_1700000000000"));
        // "note" is not a key field
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn synthesized_identity_depends_on_run_stamp() {
        let registry = ProfileRegistry::builtin();
        let input = record(json!({"supplier_id": "S1"}));

        let first = IdentityResolver::with_run_stamp(&registry, 1)
            .resolve(&input, "contract")
            .unwrap();
        let again = IdentityResolver::with_run_stamp(&registry, 1)
            .resolve(&input, "contract")
            .unwrap();
        let later = IdentityResolver::with_run_stamp(&registry, 2)
            .resolve(&input, "contract")
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first.id, later.id);
    }

    #[test]
    fn no_fields_at_all() {
        let registry = ProfileRegistry::builtin();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let result = resolver.resolve(&record(json!({"updated_at": "now"})), "contract");
        assert_eq!(
            result,
            Err(RecordError::NoIdentityFields {
                kind: "contract".into()
            })
        );
    }

    #[test]
    fn generic_kind_uses_id_field() {
        let registry = ProfileRegistry::new();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let identity = resolver.resolve(&record(json!({"id": 7})), "thing").unwrap();
        assert_eq!(identity.id, "thing_7");
    }

    #[test]
    fn booleans_do_not_identify() {
        let registry = ProfileRegistry::new();
        let resolver = IdentityResolver::with_run_stamp(&registry, 1);

        let identity = resolver
            .resolve(&record(json!({"id": true, "name": "x"})), "thing")
            .unwrap();
        assert_eq!(identity.source, IdentitySource::Synthesized);
    }
}
