//! Route modules for the annotation server

pub mod annotations;
pub mod documents;
pub mod health;
pub mod users;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::realtime::socket::ws_handler;
use crate::state::AppState;

/// Multipart framing allowance on top of the configured file size
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .nest("/health", health::router())
        .merge(users::router())
        .merge(documents::router())
        .merge(annotations::router());

    Router::new()
        .nest("/health", health::router())
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(
            state.config().upload.max_bytes + UPLOAD_OVERHEAD_BYTES,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
