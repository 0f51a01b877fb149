//! Annotation types
//!
//! Wire names are camelCase so the same JSON travels over REST and the
//! realtime channel.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::range::TextRange;

/// A stored comment on a range of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Unique identifier (UUIDv7, time ordered)
    pub id: String,
    /// The document this annotation belongs to
    pub document_id: String,
    /// Author identity
    pub user_id: String,
    /// Author display name at creation time
    pub username: String,
    /// Author display color (CSS color value)
    pub user_color: String,
    /// Exact text covered by `[start_index, end_index)`
    pub selected_text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    /// Idempotency key, see [`range_hash`]
    pub range_hash: String,
}

/// The `new-annotation` intent as emitted by a client.
///
/// `username` and `user_color` are informational; the store takes both from
/// the stored user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnnotation {
    pub document_id: String,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_color: Option<String>,
    pub selected_text: String,
    pub comment: String,
    pub start_index: usize,
    pub end_index: usize,
    #[serde(default)]
    pub range_hash: Option<String>,
}

/// The `delete-annotation` intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAnnotation {
    pub annotation_id: String,
    pub document_id: String,
    /// Requesting user; must be the author
    pub user_id: String,
}

/// Author fields copied onto an annotation at creation
#[derive(Debug, Clone)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub color: String,
}

/// Derive the idempotency key for a submission.
///
/// Two submissions by the same author over the same range of the same
/// document share a key, and within the de-duplication window the second is
/// treated as a retry of the first.
pub fn range_hash(document_id: &str, user_id: &str, start_index: usize, end_index: usize) -> String {
    format!("{}-{}-{}-{}", document_id, user_id, start_index, end_index)
}

impl NewAnnotation {
    /// Build an intent for `range` on behalf of `author`
    pub fn new(document_id: &str, author: &Author, range: &TextRange, comment: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            user_id: author.id.clone(),
            username: Some(author.username.clone()),
            user_color: Some(author.color.clone()),
            selected_text: range.selected_text.clone(),
            comment: comment.to_string(),
            start_index: range.start_index,
            end_index: range.end_index,
            range_hash: Some(range_hash(
                document_id,
                &author.id,
                range.start_index,
                range.end_index,
            )),
        }
    }

    /// The range this intent claims to cover, unvalidated
    pub fn range(&self) -> TextRange {
        TextRange {
            start_index: self.start_index,
            end_index: self.end_index,
            selected_text: self.selected_text.clone(),
        }
    }

    /// The key the server derives for this intent
    pub fn derived_range_hash(&self) -> String {
        range_hash(
            &self.document_id,
            &self.user_id,
            self.start_index,
            self.end_index,
        )
    }
}

impl Annotation {
    /// Materialize a validated intent into a stored annotation
    pub fn from_intent(intent: &NewAnnotation, author: &Author, comment: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            document_id: intent.document_id.clone(),
            user_id: author.id.clone(),
            username: author.username.clone(),
            user_color: author.color.clone(),
            selected_text: intent.selected_text.clone(),
            start_index: intent.start_index,
            end_index: intent.end_index,
            comment,
            // stored with microsecond precision; broadcast the same value
            created_at: Utc::now().trunc_subsecs(6),
            range_hash: intent.derived_range_hash(),
        }
    }

    pub fn range(&self) -> TextRange {
        TextRange {
            start_index: self.start_index,
            end_index: self.end_index,
            selected_text: self.selected_text.clone(),
        }
    }

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            id: "user-1".to_string(),
            username: "ada".to_string(),
            color: "#1976d2".to_string(),
        }
    }

    #[test]
    fn test_range_hash_format() {
        assert_eq!(range_hash("doc-1", "user-1", 4, 9), "doc-1-user-1-4-9");
    }

    #[test]
    fn test_intent_carries_derived_hash() {
        let range = TextRange::from_offsets("The quick brown fox", 4, 9).unwrap();
        let intent = NewAnnotation::new("doc-1", &author(), &range, "typo?");
        assert_eq!(intent.range_hash.as_deref(), Some("doc-1-user-1-4-9"));
        assert_eq!(intent.derived_range_hash(), "doc-1-user-1-4-9");
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let range = TextRange::from_offsets("The quick brown fox", 4, 9).unwrap();
        let intent = NewAnnotation::new("doc-1", &author(), &range, "typo?");
        let annotation = Annotation::from_intent(&intent, &author(), "typo?".to_string());

        let json = serde_json::to_value(&annotation).unwrap();
        assert_eq!(json["documentId"], "doc-1");
        assert_eq!(json["startIndex"], 4);
        assert_eq!(json["endIndex"], 9);
        assert_eq!(json["selectedText"], "quick");
        assert_eq!(json["userColor"], "#1976d2");
        assert_eq!(json["rangeHash"], "doc-1-user-1-4-9");
    }

    #[test]
    fn test_intent_optional_fields_default() {
        let intent: NewAnnotation = serde_json::from_value(serde_json::json!({
            "documentId": "doc-1",
            "userId": "user-1",
            "selectedText": "quick",
            "comment": "typo?",
            "startIndex": 4,
            "endIndex": 9
        }))
        .unwrap();
        assert!(intent.range_hash.is_none());
        assert!(intent.username.is_none());
    }

    #[test]
    fn test_identities_are_unique() {
        let range = TextRange::from_offsets("The quick brown fox", 4, 9).unwrap();
        let intent = NewAnnotation::new("doc-1", &author(), &range, "");
        let a = Annotation::from_intent(&intent, &author(), String::new());
        let b = Annotation::from_intent(&intent, &author(), String::new());
        assert_ne!(a.id, b.id);
    }
}
