//! Per-viewer annotation cache
//!
//! Holds the annotation list of the one document a viewer has open, most
//! recent first. The server is the only source of truth: entries enter the
//! cache from the initial fetch or from a broadcast, never optimistically.

use crate::annotations::Annotation;
use crate::realtime::ServerEvent;

#[derive(Debug, Default)]
pub struct AnnotationCache {
    document_id: Option<String>,
    annotations: Vec<Annotation>,
}

impl AnnotationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `document_id` with the fetched list as baseline
    pub fn open(&mut self, document_id: &str, baseline: Vec<Annotation>) {
        self.document_id = Some(document_id.to_string());
        self.annotations = baseline;
    }

    /// Replace the baseline after a refetch, keeping the open document
    pub fn reset(&mut self, baseline: Vec<Annotation>) {
        self.annotations = baseline;
    }

    /// Apply a channel event. Returns whether the cache changed.
    ///
    /// An `annotation-added` for an id already present is ignored, so a
    /// baseline that already contains an annotation and its later broadcast
    /// never produce two entries.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        if self.document_id.as_deref() != Some(event.document_id()) {
            return false;
        }

        match event {
            ServerEvent::AnnotationAdded(annotation) => {
                if self.contains(&annotation.id) {
                    return false;
                }
                self.annotations.insert(0, annotation.clone());
                true
            }
            ServerEvent::AnnotationDeleted(deleted) => {
                let before = self.annotations.len();
                self.annotations.retain(|a| a.id != deleted.annotation_id);
                self.annotations.len() != before
            }
            ServerEvent::AnnotationRejected(_) | ServerEvent::ResyncRequired(_) => false,
        }
    }

    /// Discard everything
    pub fn close(&mut self) {
        self.document_id = None;
        self.annotations.clear();
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn get(&self, annotation_id: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == annotation_id)
    }

    pub fn contains(&self, annotation_id: &str) -> bool {
        self.get(annotation_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::AnnotationDeleted;
    use chrono::Utc;

    fn annotation(id: &str, document_id: &str) -> Annotation {
        Annotation {
            id: id.to_string(),
            document_id: document_id.to_string(),
            user_id: "user-1".to_string(),
            username: "ada".to_string(),
            user_color: "#1976d2".to_string(),
            selected_text: "quick".to_string(),
            start_index: 4,
            end_index: 9,
            comment: "typo?".to_string(),
            created_at: Utc::now(),
            range_hash: format!("{}-user-1-4-9", document_id),
        }
    }

    fn deleted(id: &str, document_id: &str) -> ServerEvent {
        ServerEvent::AnnotationDeleted(AnnotationDeleted {
            annotation_id: id.to_string(),
            document_id: document_id.to_string(),
        })
    }

    #[test]
    fn test_added_is_prepended() {
        let mut cache = AnnotationCache::new();
        cache.open("doc", vec![annotation("old", "doc")]);

        assert!(cache.apply(&ServerEvent::AnnotationAdded(annotation("new", "doc"))));
        let ids: Vec<&str> = cache.annotations().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_echo_is_not_double_inserted() {
        let mut cache = AnnotationCache::new();
        cache.open("doc", vec![annotation("a", "doc")]);

        assert!(!cache.apply(&ServerEvent::AnnotationAdded(annotation("a", "doc"))));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_deleted_removes_exactly_one() {
        let mut cache = AnnotationCache::new();
        cache.open("doc", vec![annotation("a", "doc"), annotation("b", "doc")]);

        assert!(cache.apply(&deleted("a", "doc")));
        assert!(!cache.apply(&deleted("a", "doc")));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_other_document_events_are_ignored() {
        let mut cache = AnnotationCache::new();
        cache.open("doc", vec![]);

        assert!(!cache.apply(&ServerEvent::AnnotationAdded(annotation("x", "elsewhere"))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_close_discards_everything() {
        let mut cache = AnnotationCache::new();
        cache.open("doc", vec![annotation("a", "doc")]);
        cache.close();

        assert!(cache.is_empty());
        assert_eq!(cache.document_id(), None);
        assert!(!cache.apply(&ServerEvent::AnnotationAdded(annotation("b", "doc"))));
        assert!(cache.is_empty());
    }
}
