//! Per-document channel hub
//!
//! Each document gets its own `tokio::sync::broadcast` channel, created on
//! the first join and dropped once the last member leaves. Publishing to a
//! document reaches members of that document only.
//!
//! A broadcast channel delivers events to every receiver in send order, so
//! as long as a single writer publishes for a document (see
//! `AnnotationService`), all members observe the same order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use super::events::ServerEvent;

/// Receiving side of a document channel
#[derive(Debug)]
pub struct Membership {
    document_id: String,
    receiver: broadcast::Receiver<ServerEvent>,
}

impl Membership {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn receiver_mut(&mut self) -> &mut broadcast::Receiver<ServerEvent> {
        &mut self.receiver
    }

    pub fn into_parts(self) -> (String, broadcast::Receiver<ServerEvent>) {
        (self.document_id, self.receiver)
    }
}

/// Registry of document channels
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ServerEvent>>>>,
    capacity: usize,
}

impl ChannelHub {
    /// Create a hub whose channels buffer `capacity` events each
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Join a document's channel. Only events published after this call are
    /// received.
    pub async fn join(&self, document_id: &str) -> Membership {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(document_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        tracing::debug!(
            document_id,
            members = sender.receiver_count() + 1,
            "Joined document channel"
        );

        Membership {
            document_id: document_id.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Leave a document's channel, dropping it when nobody is left
    pub async fn leave(&self, membership: Membership) {
        let (document_id, receiver) = membership.into_parts();
        drop(receiver);
        self.prune(&document_id).await;
        tracing::debug!(document_id = %document_id, "Left document channel");
    }

    /// Drop the channel for `document_id` if it has no members
    pub async fn prune(&self, document_id: &str) {
        let mut channels = self.channels.write().await;
        if channels
            .get(document_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(document_id);
        }
    }

    /// Publish an event to every member of the document's channel.
    ///
    /// Returns the number of members that received it.
    pub async fn publish(&self, document_id: &str, event: ServerEvent) -> usize {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(document_id) else {
            tracing::debug!(document_id, event = event.name(), "No members, event dropped");
            return 0;
        };

        match sender.send(event) {
            Ok(count) => {
                tracing::debug!(document_id, members = count, "Event broadcast");
                count
            }
            Err(_) => 0,
        }
    }

    pub async fn member_count(&self, document_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(document_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::AnnotationDeleted;

    fn deleted(document_id: &str, annotation_id: &str) -> ServerEvent {
        ServerEvent::AnnotationDeleted(AnnotationDeleted {
            annotation_id: annotation_id.to_string(),
            document_id: document_id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_only_that_document() {
        let hub = ChannelHub::new(16);
        let mut on_a = hub.join("doc-a").await;
        let mut on_b = hub.join("doc-b").await;

        let delivered = hub.publish("doc-a", deleted("doc-a", "ann-1")).await;
        assert_eq!(delivered, 1);

        assert_eq!(
            on_a.receiver_mut().try_recv().unwrap(),
            deleted("doc-a", "ann-1")
        );
        assert!(on_b.receiver_mut().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_members_see_same_order() {
        let hub = ChannelHub::new(16);
        let mut first = hub.join("doc").await;
        let mut second = hub.join("doc").await;

        for i in 0..5 {
            hub.publish("doc", deleted("doc", &format!("ann-{}", i))).await;
        }

        for i in 0..5 {
            let expected = deleted("doc", &format!("ann-{}", i));
            assert_eq!(first.receiver_mut().recv().await.unwrap(), expected);
            assert_eq!(second.receiver_mut().recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_publish_without_members() {
        let hub = ChannelHub::new(16);
        assert_eq!(hub.publish("doc", deleted("doc", "ann-1")).await, 0);
    }

    #[tokio::test]
    async fn test_leave_prunes_empty_channel() {
        let hub = ChannelHub::new(16);
        let first = hub.join("doc").await;
        let second = hub.join("doc").await;
        assert_eq!(hub.member_count("doc").await, 2);

        hub.leave(first).await;
        assert_eq!(hub.member_count("doc").await, 1);
        assert_eq!(hub.channel_count().await, 1);

        hub.leave(second).await;
        assert_eq!(hub.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_left_member_receives_nothing_after_leave() {
        let hub = ChannelHub::new(16);
        let stays = hub.join("doc").await;
        let leaves = hub.join("doc").await;
        hub.leave(leaves).await;

        assert_eq!(hub.publish("doc", deleted("doc", "ann-1")).await, 1);
        drop(stays);
    }
}
