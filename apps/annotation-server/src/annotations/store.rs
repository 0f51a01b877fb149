//! SQLite storage for annotations
//!
//! Plain persistence only. Validation, identity and broadcasting live in
//! [`super::AnnotationService`], which is the only writer.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::types::Annotation;
use crate::db::{format_timestamp, parse_timestamp};
use crate::error::Result;

/// Repository for annotation persistence
pub struct AnnotationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AnnotationRepository<'a> {
    /// Create a new repository
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new annotation. Annotations are never updated in place.
    pub async fn insert(&self, annotation: &Annotation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO annotations (
                id, document_id, user_id, username, user_color,
                selected_text, start_index, end_index, comment,
                range_hash, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&annotation.id)
        .bind(&annotation.document_id)
        .bind(&annotation.user_id)
        .bind(&annotation.username)
        .bind(&annotation.user_color)
        .bind(&annotation.selected_text)
        .bind(annotation.start_index as i64)
        .bind(annotation.end_index as i64)
        .bind(&annotation.comment)
        .bind(&annotation.range_hash)
        .bind(format_timestamp(&annotation.created_at))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get an annotation by ID
    pub async fn get(&self, id: &str) -> Result<Option<Annotation>> {
        let row = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, document_id, user_id, username, user_color,
                   selected_text, start_index, end_index, comment,
                   range_hash, created_at
            FROM annotations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_annotation()).transpose()
    }

    /// All annotations for a document, most recent first
    pub async fn list_for_document(&self, document_id: &str) -> Result<Vec<Annotation>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, document_id, user_id, username, user_color,
                   selected_text, start_index, end_index, comment,
                   range_hash, created_at
            FROM annotations
            WHERE document_id = ?
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .bind(document_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_annotation()).collect()
    }

    /// Most recent annotation with this idempotency key created at or after `since`
    pub async fn find_recent_by_range_hash(
        &self,
        range_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Annotation>> {
        let row = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, document_id, user_id, username, user_color,
                   selected_text, start_index, end_index, comment,
                   range_hash, created_at
            FROM annotations
            WHERE range_hash = ? AND created_at >= ?
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(range_hash)
        .bind(format_timestamp(&since))
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_annotation()).transpose()
    }

    /// Delete an annotation
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM annotations WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count annotations for a document
    pub async fn count_for_document(&self, document_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM annotations WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct AnnotationRow {
    id: String,
    document_id: String,
    user_id: String,
    username: String,
    user_color: String,
    selected_text: String,
    start_index: i64,
    end_index: i64,
    comment: String,
    range_hash: String,
    created_at: String,
}

impl AnnotationRow {
    fn into_annotation(self) -> Result<Annotation> {
        Ok(Annotation {
            id: self.id,
            document_id: self.document_id,
            user_id: self.user_id,
            username: self.username,
            user_color: self.user_color,
            selected_text: self.selected_text,
            start_index: self.start_index as usize,
            end_index: self.end_index as usize,
            comment: self.comment,
            created_at: parse_timestamp(&self.created_at)?,
            range_hash: self.range_hash,
        })
    }
}
