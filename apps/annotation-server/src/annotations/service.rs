//! Authoritative annotation store
//!
//! Every mutation of a document's annotation set passes through here. The
//! service validates the request, assigns identity and timestamp, persists,
//! and publishes the resulting event on the document channel. Work on one
//! document is serialized behind a per-document lock that is held across
//! persist *and* publish, so channel order always equals acceptance order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;

use super::store::AnnotationRepository;
use super::types::{Annotation, DeleteAnnotation, NewAnnotation};
use crate::config::AnnotationConfig;
use crate::documents::{Document, DocumentRepository, UserRepository};
use crate::error::{AppError, Result};
use crate::range::char_len;
use crate::realtime::{AnnotationDeleted, ChannelHub, ServerEvent};

/// Single writer for annotation sets
#[derive(Clone)]
pub struct AnnotationService {
    db: SqlitePool,
    hub: ChannelHub,
    config: AnnotationConfig,
    locks: LockMap,
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive hold on one document's annotation set.
///
/// The lock entry is pruned on release once no other task holds or awaits it.
struct DocumentGuard {
    document_id: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // clones are only handed out under the map lock, so this count is stable
        if locks
            .get(&self.document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.document_id);
        }
    }
}

impl AnnotationService {
    pub fn new(db: SqlitePool, hub: ChannelHub, config: AnnotationConfig) -> Self {
        Self {
            db,
            hub,
            config,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }

    /// Create an annotation and broadcast `annotation-added`.
    ///
    /// A submission whose idempotency key was already stored within the
    /// de-duplication window returns the stored annotation and broadcasts
    /// nothing.
    pub async fn create(&self, intent: NewAnnotation) -> Result<Annotation> {
        // document content is immutable, so it can be read before locking
        let document = self.require_document(&intent.document_id).await?;
        let _guard = self.lock_document(&intent.document_id).await;

        let author = UserRepository::new(&self.db)
            .get(&intent.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", intent.user_id)))?;

        intent
            .range()
            .validate_against(&document.content)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let key = intent.derived_range_hash();
        if let Some(claimed) = intent.range_hash.as_deref() {
            if claimed != key {
                return Err(AppError::Validation(format!(
                    "rangeHash '{}' does not match the submitted range",
                    claimed
                )));
            }
        }

        let comment = intent.comment.trim().to_string();
        if char_len(&comment) > self.config.max_comment_chars {
            return Err(AppError::Validation(format!(
                "Comment exceeds {} characters",
                self.config.max_comment_chars
            )));
        }

        let repo = AnnotationRepository::new(&self.db);
        let window = chrono::Duration::from_std(self.config.dedup_window())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let since = Utc::now().checked_sub_signed(window).ok_or_else(|| {
            AppError::Internal(format!(
                "Dedup window of {}s is out of range",
                self.config.dedup_window_secs
            ))
        })?;
        if let Some(existing) = repo.find_recent_by_range_hash(&key, since).await? {
            tracing::info!(
                document_id = %intent.document_id,
                annotation_id = %existing.id,
                range_hash = %key,
                "Coalesced duplicate submission"
            );
            return Ok(existing);
        }

        let annotation = Annotation::from_intent(&intent, &author.author(), comment);
        repo.insert(&annotation).await?;

        let delivered = self
            .hub
            .publish(
                &annotation.document_id,
                ServerEvent::AnnotationAdded(annotation.clone()),
            )
            .await;

        tracing::info!(
            document_id = %annotation.document_id,
            annotation_id = %annotation.id,
            start = annotation.start_index,
            end = annotation.end_index,
            delivered,
            "Annotation created"
        );

        Ok(annotation)
    }

    /// Delete an annotation on behalf of `requester_id` and broadcast
    /// `annotation-deleted`
    pub async fn delete(&self, annotation_id: &str, requester_id: &str) -> Result<Annotation> {
        let repo = AnnotationRepository::new(&self.db);
        let document_id = repo
            .get(annotation_id)
            .await?
            .ok_or_else(|| not_found(annotation_id))?
            .document_id;

        let _guard = self.lock_document(&document_id).await;

        // Re-read under the lock: a concurrent delete may have won
        let annotation = repo
            .get(annotation_id)
            .await?
            .ok_or_else(|| not_found(annotation_id))?;

        if !annotation.is_authored_by(requester_id) {
            tracing::warn!(
                annotation_id,
                requester_id,
                author_id = %annotation.user_id,
                "Rejected delete by non-author"
            );
            return Err(AppError::Authorization(
                "Only the author can delete this annotation".to_string(),
            ));
        }

        if !repo.delete(annotation_id).await? {
            return Err(not_found(annotation_id));
        }

        let delivered = self
            .hub
            .publish(
                &document_id,
                ServerEvent::AnnotationDeleted(AnnotationDeleted {
                    annotation_id: annotation_id.to_string(),
                    document_id: document_id.clone(),
                }),
            )
            .await;

        tracing::info!(document_id = %document_id, annotation_id, delivered, "Annotation deleted");

        Ok(annotation)
    }

    /// Handle a `delete-annotation` intent, which also names the document
    pub async fn delete_intent(&self, intent: &DeleteAnnotation) -> Result<Annotation> {
        let repo = AnnotationRepository::new(&self.db);
        match repo.get(&intent.annotation_id).await? {
            Some(annotation) if annotation.document_id == intent.document_id => {
                self.delete(&intent.annotation_id, &intent.user_id).await
            }
            _ => Err(not_found(&intent.annotation_id)),
        }
    }

    /// All annotations on a document, most recent first
    pub async fn list(&self, document_id: &str) -> Result<Vec<Annotation>> {
        self.require_document(document_id).await?;
        AnnotationRepository::new(&self.db)
            .list_for_document(document_id)
            .await
    }

    pub async fn count(&self, document_id: &str) -> Result<i64> {
        AnnotationRepository::new(&self.db)
            .count_for_document(document_id)
            .await
    }

    async fn require_document(&self, document_id: &str) -> Result<Document> {
        DocumentRepository::new(&self.db)
            .get(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", document_id)))
    }

    async fn lock_document(&self, document_id: &str) -> DocumentGuard {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        DocumentGuard {
            document_id: document_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn not_found(annotation_id: &str) -> AppError {
    AppError::NotFound(format!("Annotation '{}' not found", annotation_id))
}
