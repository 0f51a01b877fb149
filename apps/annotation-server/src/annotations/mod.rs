//! Annotation module
//!
//! Annotations attach a comment to a half-open character range of a
//! document. The [`AnnotationService`] is the single authority that accepts
//! creations and deletions and fans the results out to document channels.

mod service;
mod store;
mod types;

pub use service::AnnotationService;
pub use store::AnnotationRepository;
pub use types::{range_hash, Annotation, Author, DeleteAnnotation, NewAnnotation};
