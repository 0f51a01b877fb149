//! Realtime fan-out of annotation events
//!
//! Clients join per-document channels over a WebSocket. The
//! [`ChannelHub`] owns the channels and [`socket::Session`] bridges one
//! connection to them.

mod events;
mod hub;
pub mod socket;

pub use events::{AnnotationDeleted, ClientIntent, DocumentRef, Rejection, ServerEvent};
pub use hub::{ChannelHub, Membership};
pub use socket::Session;
