//! Client side of annotation sync
//!
//! What a viewer needs to show a document and keep it live: a channel
//! connection with explicit subscriptions (over WebSocket, or in process for
//! tests), the REST fetch boundary, the per-document cache and the viewer
//! that ties them together.

pub mod api;
pub mod cache;
pub mod local;
pub mod transport;
pub mod viewer;
pub mod ws;

pub use api::{DocumentApi, HttpDocumentApi};
pub use cache::AnnotationCache;
pub use local::{LocalDocumentApi, LocalTransport};
pub use transport::{ClientConnection, EventHandler, SubscriptionHandle, Transport};
pub use viewer::{DocumentViewer, ViewerState};
pub use ws::{ReconnectPolicy, WsTransport};
