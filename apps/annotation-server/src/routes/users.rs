//! User API routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::documents::{NewUser, User, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user", post(login))
        .route("/users/:id", get(get_user))
}

/// Find or create the user registered under an email
async fn login(State(state): State<AppState>, Json(new_user): Json<NewUser>) -> Result<Json<User>> {
    let user = UserRepository::new(state.db()).find_or_create(&new_user).await?;
    tracing::info!(user_id = %user.id, username = %user.username, "User signed in");
    Ok(Json(user))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<User>> {
    UserRepository::new(state.db())
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", id)))
}
