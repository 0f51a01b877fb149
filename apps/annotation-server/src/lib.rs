//! Annotation Server
//!
//! Collaborative text annotation: documents are uploaded once, users attach
//! comments to character ranges, and every viewer of a document sees
//! creations and deletions live over a per-document channel.

pub mod annotations;
pub mod client;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod html;
pub mod range;
pub mod realtime;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
