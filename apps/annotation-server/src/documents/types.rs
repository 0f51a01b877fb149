//! Document and user types

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotations::Author;
use crate::error::{AppError, Result};

/// Colors handed out to users, chosen by a stable hash of the email
pub const USER_PALETTE: [&str; 8] = [
    "#1976d2", "#d32f2f", "#388e3c", "#f57c00", "#7b1fa2", "#0097a7", "#c2185b", "#5d4037",
];

/// An uploaded document. Content never changes after upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub original_name: String,
    pub content: String,
    pub file_type: FileType,
    pub created_at: DateTime<Utc>,
}

/// Document list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub original_name: String,
    pub file_type: FileType,
    pub created_at: DateTime<Utc>,
    pub annotation_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Txt,
    Md,
}

impl FileType {
    /// Detect the file type from an uploaded file name
    pub fn from_file_name(name: &str) -> Result<Self> {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "txt" => Ok(FileType::Txt),
            "md" | "markdown" => Ok(FileType::Md),
            other => Err(AppError::Validation(format!(
                "Unsupported file type '{}': only plain text documents can be annotated",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Txt => "txt",
            FileType::Md => "md",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "md" => FileType::Md,
            _ => FileType::Txt,
        }
    }
}

/// Upload payload after multipart decoding
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub original_name: String,
    pub content: String,
    pub uploaded_by: Option<String>,
}

impl Document {
    pub fn from_upload(upload: NewDocument) -> Result<Self> {
        let file_type = FileType::from_file_name(&upload.original_name)?;
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            original_name: upload.original_name,
            content: upload.content,
            file_type,
            created_at: Utc::now().trunc_subsecs(6),
        })
    }
}

/// A user who can author annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Login form payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }
        if !self.email.contains('@') {
            return Err(AppError::Validation(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        Ok(())
    }
}

impl User {
    pub fn author(&self) -> Author {
        Author {
            id: self.id.clone(),
            username: self.username.clone(),
            color: self.color.clone(),
        }
    }
}

/// Stable color for an email address (FNV-1a over the lowercased bytes)
pub fn color_for(email: &str) -> &'static str {
    let hash = email
        .to_ascii_lowercase()
        .bytes()
        .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
    USER_PALETTE[(hash % USER_PALETTE.len() as u64) as usize]
}
