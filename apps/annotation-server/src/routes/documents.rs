//! Document API routes
//!
//! Documents are immutable once uploaded, which is what lets annotation
//! offsets stay valid forever.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::annotations::Annotation;
use crate::documents::{Document, DocumentRepository, DocumentSummary, NewDocument, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/documents", get(list_documents))
        .route("/upload", post(upload_document))
        .route("/document/:id", get(get_document))
        .route("/document/:id/annotations", get(list_annotations))
}

/// A document together with its current annotation list
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentWithAnnotations {
    pub document: Document,
    pub annotations: Vec<Annotation>,
}

async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<DocumentSummary>>> {
    let documents = DocumentRepository::new(state.db()).list().await?;
    Ok(Json(documents))
}

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentWithAnnotations>> {
    let document = DocumentRepository::new(state.db())
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", id)))?;
    let annotations = state.annotations().list(&id).await?;

    Ok(Json(DocumentWithAnnotations {
        document,
        annotations,
    }))
}

async fn list_annotations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Annotation>>> {
    Ok(Json(state.annotations().list(&id).await?))
}

/// `multipart/form-data` with a `file` part and an optional `userId` part
async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>)> {
    let max_bytes = state.config().upload.max_bytes;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut uploaded_by: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| AppError::Validation("File part has no file name".to_string()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
                tracing::debug!(file_name = %file_name, size = bytes.len(), "Received file part");
                file = Some((file_name, bytes.to_vec()));
            }
            "userId" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read userId: {}", e)))?;
                if !value.trim().is_empty() {
                    uploaded_by = Some(value.trim().to_string());
                }
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let (original_name, bytes) =
        file.ok_or_else(|| AppError::Validation("Missing 'file' part".to_string()))?;

    if bytes.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "Upload is {} bytes, limit is {}",
            bytes.len(),
            max_bytes
        )));
    }

    let content = String::from_utf8(bytes)
        .map_err(|_| AppError::Validation("Document is not valid UTF-8 text".to_string()))?;

    if let Some(user_id) = uploaded_by.as_deref() {
        if UserRepository::new(state.db()).get(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User '{}' not found", user_id)));
        }
    }

    let document = DocumentRepository::new(state.db())
        .create(NewDocument {
            original_name,
            content,
            uploaded_by,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(document)))
}
