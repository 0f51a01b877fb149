//! Annotation API routes
//!
//! Creation happens over the realtime channel only. Deletion is also
//! exposed here for clients without a socket; it goes through the same
//! service and is broadcast the same way.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::delete,
    Router,
};
use serde::Deserialize;

use crate::error::Result;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/annotations/:id", delete(delete_annotation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteParams {
    user_id: String,
}

async fn delete_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode> {
    state.annotations().delete(&id, &params.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
