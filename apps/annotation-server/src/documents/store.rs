//! SQLite storage for documents and users

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::{color_for, Document, DocumentSummary, FileType, NewDocument, NewUser, User};
use crate::db::{format_timestamp, parse_timestamp};
use crate::error::Result;

/// Document repository
pub struct DocumentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DocumentRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store an uploaded document
    pub async fn create(&self, upload: NewDocument) -> Result<Document> {
        let uploaded_by = upload.uploaded_by.clone();
        let document = Document::from_upload(upload)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, original_name, content, file_type, uploaded_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.original_name)
        .bind(&document.content)
        .bind(document.file_type.as_str())
        .bind(uploaded_by)
        .bind(format_timestamp(&document.created_at))
        .execute(self.pool)
        .await?;

        tracing::info!(
            document_id = %document.id,
            name = %document.original_name,
            chars = document.content.chars().count(),
            "Stored document"
        );

        Ok(document)
    }

    /// Get a document by ID
    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, original_name, content, file_type, created_at
            FROM documents
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_document()).transpose()
    }

    /// List documents, newest first, with their annotation counts
    pub async fn list(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT d.id, d.original_name, d.file_type, d.created_at,
                   (SELECT COUNT(*) FROM annotations a WHERE a.document_id = d.id) AS annotation_count
            FROM documents d
            ORDER BY d.created_at DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(DocumentSummary {
                    created_at: parse_timestamp(&r.created_at)?,
                    id: r.id,
                    original_name: r.original_name,
                    file_type: FileType::parse(&r.file_type),
                    annotation_count: r.annotation_count,
                })
            })
            .collect()
    }
}

/// User repository
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Return the user registered with this email, creating it if needed.
    ///
    /// An existing user keeps its original username and color.
    pub async fn find_or_create(&self, new_user: &NewUser) -> Result<User> {
        new_user.validate()?;
        let email = new_user.email.trim().to_ascii_lowercase();

        if let Some(existing) = self.get_by_email(&email).await? {
            return Ok(existing);
        }

        let user = User {
            id: Uuid::now_v7().to_string(),
            username: new_user.username.trim().to_string(),
            color: color_for(&email).to_string(),
            email,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, color, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.color)
        .bind(format_timestamp(&user.created_at))
        .execute(self.pool)
        .await?;

        // A concurrent registration may have won the insert
        match self.get_by_email(&user.email).await? {
            Some(stored) => Ok(stored),
            None => Ok(user),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, color, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_user()).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, color, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_user()).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    original_name: String,
    content: String,
    file_type: String,
    created_at: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        Ok(Document {
            created_at: parse_timestamp(&self.created_at)?,
            file_type: FileType::parse(&self.file_type),
            id: self.id,
            original_name: self.original_name,
            content: self.content,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    original_name: String,
    file_type: String,
    created_at: String,
    annotation_count: i64,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    color: String,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            username: self.username,
            email: self.email,
            color: self.color,
        })
    }
}
