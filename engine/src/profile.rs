//! Record-kind profiles.
//!
//! Everything that differs between record kinds lives in a [`KindProfile`]:
//! which fields identify a record and in what order, which fields feed a
//! synthesized identity, and which fields are bookkeeping that must not
//! affect the fingerprint. The engine itself is kind-agnostic.

use crate::{error::SyncError, RecordKind};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

/// One way of deriving an identity from a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum IdentityStrategy {
    /// Use a single field's value
    Field { name: String },
    /// Join several fields; applies only when every field is present
    Composite {
        fields: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
}

fn default_separator() -> String {
    "-".to_string()
}

fn default_tag_identity() -> bool {
    true
}

impl IdentityStrategy {
    /// Single-field strategy.
    pub fn field(name: impl Into<String>) -> Self {
        IdentityStrategy::Field { name: name.into() }
    }

    /// Multi-field strategy joined with `-`.
    pub fn composite<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IdentityStrategy::Composite {
            fields: fields.into_iter().map(Into::into).collect(),
            separator: default_separator(),
        }
    }

    /// Human-readable label, used in identity provenance.
    pub fn label(&self) -> String {
        match self {
            IdentityStrategy::Field { name } => name.clone(),
            IdentityStrategy::Composite { fields, separator } => fields.join(separator),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            IdentityStrategy::Field { name } if name.trim().is_empty() => {
                Err("field strategy with empty name".into())
            }
            IdentityStrategy::Composite { fields, .. } if fields.is_empty() => {
                Err("composite strategy without fields".into())
            }
            IdentityStrategy::Composite { fields, .. }
                if fields.iter().any(|f| f.trim().is_empty()) =>
            {
                Err("composite strategy with empty field name".into())
            }
            _ => Ok(()),
        }
    }
}

/// Per-kind configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindProfile {
    /// Record kind this profile applies to
    pub kind: RecordKind,
    /// Identity strategies, strongest first
    pub identity: Vec<IdentityStrategy>,
    /// Fields hashed into a synthesized identity. Empty means all business fields.
    #[serde(default)]
    pub key_fields: Vec<String>,
    /// Kind-specific fields excluded from fingerprints
    #[serde(default)]
    pub volatile_fields: Vec<String>,
    /// Prefix identities with the kind so kinds can share a collection
    #[serde(default = "default_tag_identity")]
    pub tag_identity: bool,
}

impl KindProfile {
    /// Create a profile with the given identity strategies.
    pub fn new(kind: impl Into<RecordKind>, identity: Vec<IdentityStrategy>) -> Self {
        Self {
            kind: kind.into(),
            identity,
            key_fields: Vec::new(),
            volatile_fields: Vec::new(),
            tag_identity: true,
        }
    }

    /// Builder-style method to set synthesized-identity key fields.
    pub fn with_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style method to add kind-specific volatile fields.
    pub fn with_volatile_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volatile_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style method to toggle the kind prefix.
    pub fn with_tag_identity(mut self, tag: bool) -> Self {
        self.tag_identity = tag;
        self
    }

    /// Check the profile is usable.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.kind.trim().is_empty() {
            return Err(SyncError::Profile("profile with empty kind".into()));
        }
        for strategy in &self.identity {
            strategy
                .validate()
                .map_err(|e| SyncError::Profile(format!("{}: {}", self.kind, e)))?;
        }
        Ok(())
    }

    fn generic(kind: &str) -> Self {
        Self::new(kind, vec![IdentityStrategy::field("id")])
    }
}

/// Lookup table of kind profiles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileRegistry {
    profiles: HashMap<RecordKind, KindProfile>,
}

impl ProfileRegistry {
    /// Create an empty registry. Every kind resolves to the generic profile.
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Registry with the built-in record kinds.
    pub fn builtin() -> Self {
        Self::new()
            .with_profile(
                KindProfile::new(
                    "contract",
                    vec![
                        IdentityStrategy::field("contract_reference"),
                        IdentityStrategy::field("contract_id"),
                    ],
                )
                .with_key_fields(["process_reference", "supplier_id", "signed_on", "amount"]),
            )
            .with_profile(
                KindProfile::new(
                    "process",
                    vec![
                        IdentityStrategy::field("process_reference"),
                        IdentityStrategy::field("process_id"),
                    ],
                )
                .with_key_fields(["entity_code", "description", "published_on"]),
            )
            .with_profile(
                KindProfile::new(
                    "budget_project",
                    vec![
                        IdentityStrategy::composite(["project_code", "fiscal_year"]),
                        IdentityStrategy::field("project_code"),
                    ],
                )
                .with_key_fields(["name", "agency", "fiscal_year"])
                .with_volatile_fields(["source_file", "extracted_at"]),
            )
            .with_profile(
                KindProfile::new(
                    "project_unit",
                    vec![
                        IdentityStrategy::field("unit_id"),
                        IdentityStrategy::composite(["project_code", "unit_name"]),
                    ],
                )
                .with_key_fields(["project_code", "unit_name", "address"])
                .with_volatile_fields(["geocoded_at"]),
            )
    }

    /// Parse a JSON array of profiles.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let profiles: Vec<KindProfile> =
            serde_json::from_str(json).map_err(|e| SyncError::Profile(e.to_string()))?;

        let mut registry = Self::new();
        for profile in profiles {
            profile.validate()?;
            registry.add_profile(profile);
        }
        Ok(registry)
    }

    /// Add or replace a profile.
    pub fn add_profile(&mut self, profile: KindProfile) -> &mut Self {
        self.profiles.insert(profile.kind.clone(), profile);
        self
    }

    /// Builder-style method to add a profile.
    pub fn with_profile(mut self, profile: KindProfile) -> Self {
        self.add_profile(profile);
        self
    }

    /// Overlay another registry; its profiles replace ours on kind collisions.
    pub fn merge(&mut self, other: ProfileRegistry) {
        self.profiles.extend(other.profiles);
    }

    /// Get the registered profile for a kind, if any.
    pub fn get(&self, kind: &str) -> Option<&KindProfile> {
        self.profiles.get(kind)
    }

    /// Profile for a kind, falling back to the generic profile.
    pub fn resolve(&self, kind: &str) -> Cow<'_, KindProfile> {
        match self.profiles.get(kind) {
            Some(profile) => Cow::Borrowed(profile),
            None => Cow::Owned(KindProfile::generic(kind)),
        }
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered profiles, sorted by kind.
    pub fn profiles(&self) -> Vec<&KindProfile> {
        let mut profiles: Vec<&KindProfile> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.kind.cmp(&b.kind));
        profiles
    }
}
