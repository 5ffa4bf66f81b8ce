//! Sync endpoint routes.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use docsync_engine::SyncReport;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_sync, SyncRequest};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/collections/{collection}/sync", post(sync_handler))
}

/// POST /collections/{collection}/sync - Sync a record set into a collection.
async fn sync_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncReport>> {
    let report = handle_sync(&state, &collection, request).await?;
    Ok(Json(report))
}
