//! Channel event types
//!
//! Frames are JSON objects of the form `{"event": "<name>", "data": {...}}`.
//! Intents flow from clients to the server; events flow back on the
//! document's channel.

use serde::{Deserialize, Serialize};

use crate::annotations::{Annotation, DeleteAnnotation, NewAnnotation};
use crate::error::AppError;

/// Reference to a document channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub document_id: String,
}

/// Messages a client sends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientIntent {
    JoinDocument(DocumentRef),
    LeaveDocument(DocumentRef),
    NewAnnotation(NewAnnotation),
    DeleteAnnotation(DeleteAnnotation),
}

/// Payload of `annotation-deleted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDeleted {
    pub annotation_id: String,
    pub document_id: String,
}

/// Payload of `annotation-rejected`, sent only to the originating connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub document_id: String,
    pub code: String,
    pub message: String,
}

/// Messages the server sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    AnnotationAdded(Annotation),
    AnnotationDeleted(AnnotationDeleted),
    AnnotationRejected(Rejection),
    /// The connection fell behind the channel buffer; refetch the list
    ResyncRequired(DocumentRef),
}

impl ClientIntent {
    pub fn document_id(&self) -> &str {
        match self {
            ClientIntent::JoinDocument(r) | ClientIntent::LeaveDocument(r) => &r.document_id,
            ClientIntent::NewAnnotation(n) => &n.document_id,
            ClientIntent::DeleteAnnotation(d) => &d.document_id,
        }
    }
}

impl ServerEvent {
    pub fn document_id(&self) -> &str {
        match self {
            ServerEvent::AnnotationAdded(a) => &a.document_id,
            ServerEvent::AnnotationDeleted(d) => &d.document_id,
            ServerEvent::AnnotationRejected(r) => &r.document_id,
            ServerEvent::ResyncRequired(r) => &r.document_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AnnotationAdded(_) => "annotation-added",
            ServerEvent::AnnotationDeleted(_) => "annotation-deleted",
            ServerEvent::AnnotationRejected(_) => "annotation-rejected",
            ServerEvent::ResyncRequired(_) => "resync-required",
        }
    }

    pub fn rejected(document_id: &str, error: &AppError) -> Self {
        ServerEvent::AnnotationRejected(Rejection {
            document_id: document_id.to_string(),
            code: error.code().to_string(),
            message: error.public_message(),
        })
    }

    pub fn resync(document_id: &str) -> Self {
        ServerEvent::ResyncRequired(DocumentRef {
            document_id: document_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_intent() {
        let intent: ClientIntent = serde_json::from_value(json!({
            "event": "join-document",
            "data": { "documentId": "doc-1" }
        }))
        .unwrap();
        assert_eq!(intent.document_id(), "doc-1");
        assert!(matches!(intent, ClientIntent::JoinDocument(_)));
    }

    #[test]
    fn test_parse_new_annotation_intent() {
        let intent: ClientIntent = serde_json::from_value(json!({
            "event": "new-annotation",
            "data": {
                "documentId": "doc-1",
                "userId": "user-1",
                "username": "ada",
                "userColor": "#1976d2",
                "selectedText": "quick",
                "comment": "typo?",
                "startIndex": 4,
                "endIndex": 9,
                "rangeHash": "doc-1-user-1-4-9"
            }
        }))
        .unwrap();

        match intent {
            ClientIntent::NewAnnotation(n) => {
                assert_eq!(n.start_index, 4);
                assert_eq!(n.range_hash.as_deref(), Some("doc-1-user-1-4-9"));
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        let parsed = serde_json::from_value::<ClientIntent>(json!({
            "event": "edit-annotation",
            "data": {}
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_deleted_event_shape() {
        let event = ServerEvent::AnnotationDeleted(AnnotationDeleted {
            annotation_id: "ann-1".into(),
            document_id: "doc-1".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "annotation-deleted");
        assert_eq!(json["data"]["annotationId"], "ann-1");
        assert_eq!(event.document_id(), "doc-1");
        assert_eq!(event.name(), "annotation-deleted");
    }

    #[test]
    fn test_rejection_uses_public_message() {
        let event = ServerEvent::rejected("doc-1", &AppError::Authorization("not the author".into()));
        match event {
            ServerEvent::AnnotationRejected(r) => {
                assert_eq!(r.code, "authorization_error");
                assert_eq!(r.message, "not the author");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
