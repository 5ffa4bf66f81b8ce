//! Kind profile listing.

use axum::{extract::State, routing::get, Json, Router};
use docsync_engine::KindProfile;

use crate::AppState;

/// Create profile routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/profiles", get(list_profiles))
}

/// GET /profiles - Identity profiles known to the engine, sorted by kind.
async fn list_profiles(State(state): State<AppState>) -> Json<Vec<KindProfile>> {
    Json(
        state
            .engine
            .registry()
            .profiles()
            .into_iter()
            .cloned()
            .collect(),
    )
}
