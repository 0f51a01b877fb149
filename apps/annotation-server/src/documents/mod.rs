//! Documents and users
//!
//! The boundary the annotation engine consumes: immutable uploaded documents
//! and the users that author annotations. Authentication and sessions are not
//! handled here; a user is found or created by email.

mod store;
mod types;

pub use store::{DocumentRepository, UserRepository};
pub use types::{
    color_for, Document, DocumentSummary, FileType, NewDocument, NewUser, User, USER_PALETTE,
};
