//! Canonical content fingerprints.
//!
//! A fingerprint is the SHA-256 of a record's canonical form with volatile
//! fields removed. The canonical form is a compact JSON rendering with:
//!
//! - object keys sorted bytewise, at every depth
//! - array elements in their original order
//! - integral numbers written without a fractional part (`1.0` and `1` agree)
//! - strings escaped the way JSON escapes them
//!
//! The rule is simple enough to reproduce in any language, so fingerprints
//! written by another implementation of the same rule compare equal.

use crate::{record::Fields, KindProfile};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Field holding the fingerprint persisted alongside each written document.
pub const STORED_FINGERPRINT_FIELD: &str = "_fingerprint";
/// Creation timestamp stamped on NEW documents.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Update timestamp stamped on every written document.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Bookkeeping fields never considered business data.
pub const DEFAULT_VOLATILE_FIELDS: &[&str] = &[
    STORED_FINGERPRINT_FIELD,
    CREATED_AT_FIELD,
    UPDATED_AT_FIELD,
    "createdAt",
    "updatedAt",
    "_synced_at",
];

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest of a record's business fields.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash arbitrary bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Accept a previously stored fingerprint, if it is well formed.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == FINGERPRINT_HEX_LEN
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines and synthesized identities.
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes fingerprints, skipping a configured set of volatile fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalHasher {
    volatile: BTreeSet<String>,
}

impl Default for CanonicalHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalHasher {
    /// Hasher that skips only [`DEFAULT_VOLATILE_FIELDS`].
    pub fn new() -> Self {
        Self {
            volatile: DEFAULT_VOLATILE_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }

    /// Hasher for a record kind: the defaults plus the profile's volatile fields.
    pub fn for_profile(profile: &KindProfile) -> Self {
        Self::new().with_volatile(profile.volatile_fields.iter().cloned())
    }

    /// Builder-style method to add volatile fields.
    pub fn with_volatile(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.volatile.extend(fields);
        self
    }

    pub fn is_volatile(&self, field: &str) -> bool {
        self.volatile.contains(field)
    }

    /// Fields that count as business data, in canonical (sorted) order.
    pub fn business_fields<'a>(
        &'a self,
        fields: &'a Fields,
    ) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        let mut sorted: Vec<_> = fields
            .iter()
            .filter(|(name, _)| !self.is_volatile(name))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted.into_iter()
    }

    /// Canonical text of the business fields.
    pub fn canonical(&self, fields: &Fields) -> String {
        let mut out = String::with_capacity(fields.len() * 16);
        out.push('{');
        for (i, (name, value)) in self.business_fields(fields).enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_string(name, &mut out);
            out.push(':');
            write_canonical(value, &mut out);
        }
        out.push('}');
        out
    }

    /// Fingerprint of the business fields.
    pub fn fingerprint(&self, fields: &Fields) -> Fingerprint {
        Fingerprint::of_bytes(self.canonical(fields).as_bytes())
    }
}

/// Canonical text of any JSON value.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        // Never abort a record over one odd value.
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

/// Largest integer an f64 represents exactly.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

pub(crate) fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT => (f as i64).to_string(),
        _ => n.to_string(),
    }
}
