//! Sync handler - runs one incremental sync of a record set into a collection.

use crate::config::MAX_BATCH_SIZE;
use crate::error::{AppError, Result};
use crate::AppState;
use docsync_engine::{CandidateRecord, SyncOptions, SyncReport};
use serde::Deserialize;

/// Longest accepted collection name.
const MAX_COLLECTION_LEN: usize = 128;

/// Request body for a sync run.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Record kind, selects the identity profile
    pub kind: String,
    /// Freshly computed records; each must be a JSON object
    pub records: Vec<CandidateRecord>,
    /// Overrides the configured batch size
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Classify without writing
    #[serde(default)]
    pub dry_run: bool,
    /// Replace modified documents instead of merging into them
    #[serde(default)]
    pub replace_modified: bool,
}

/// Reject collection names that are empty, overlong or contain odd characters.
pub fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() || collection.len() > MAX_COLLECTION_LEN {
        return Err(AppError::BadRequest(format!(
            "collection name must be 1 to {} characters",
            MAX_COLLECTION_LEN
        )));
    }
    if !collection
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::BadRequest(format!(
            "invalid collection name '{}'",
            collection
        )));
    }
    Ok(())
}

/// Build engine options from a request and the server configuration.
pub fn sync_options(state: &AppState, request: &SyncRequest) -> Result<SyncOptions> {
    let batch_size = request.batch_size.unwrap_or(state.config.sync_batch_size);
    if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
        return Err(AppError::BadRequest(format!(
            "batchSize must be between 1 and {}",
            MAX_BATCH_SIZE
        )));
    }

    Ok(SyncOptions::new()
        .with_batch_size(batch_size)
        .with_max_in_flight(state.config.sync_max_in_flight)
        .with_dry_run(request.dry_run)
        .with_replace_modified(request.replace_modified)
        .with_cancel(state.shutdown.child_token()))
}

/// Run a sync for one collection.
pub async fn handle_sync(
    state: &AppState,
    collection: &str,
    request: SyncRequest,
) -> Result<SyncReport> {
    validate_collection(collection)?;
    if request.kind.trim().is_empty() {
        return Err(AppError::BadRequest("kind must not be empty".into()));
    }
    let options = sync_options(state, &request)?;

    let _guard = state.locks.acquire(collection).await;

    tracing::info!(
        collection,
        kind = %request.kind,
        records = request.records.len(),
        dry_run = request.dry_run,
        "sync requested"
    );

    let report = state
        .engine
        .sync(
            &state.store,
            request.records,
            &request.kind,
            collection,
            &options,
        )
        .await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_names() {
        assert!(validate_collection("contracts").is_ok());
        assert!(validate_collection("project_units-2024").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("../etc").is_err());
        assert!(validate_collection("a b").is_err());
        assert!(validate_collection(&"x".repeat(MAX_COLLECTION_LEN + 1)).is_err());
    }

    #[test]
    fn request_deserialization() {
        let json = json!({
            "kind": "contract",
            "records": [{"contract_reference": "A", "amount": 10}],
            "batchSize": 100,
            "dryRun": true
        });

        let request: SyncRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.kind, "contract");
        assert_eq!(request.records.len(), 1);
        assert_eq!(request.batch_size, Some(100));
        assert!(request.dry_run);
        assert!(!request.replace_modified);
    }

    #[test]
    fn records_must_be_objects() {
        let json = json!({"kind": "contract", "records": [[1, 2]]});
        assert!(serde_json::from_value::<SyncRequest>(json).is_err());
    }
}
