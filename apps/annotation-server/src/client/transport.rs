//! Client side of the realtime channel
//!
//! A process holds one [`ClientConnection`]. Views subscribe per document
//! and receive events through handlers that run inside [`ClientConnection::pump`],
//! on the caller's task, so handlers never race with UI intents.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::realtime::{ClientIntent, ServerEvent};

/// Connection capabilities a client needs from the channel
#[async_trait]
pub trait Transport: Send {
    async fn join_document(&mut self, document_id: &str) -> Result<()>;

    async fn leave_document(&mut self, document_id: &str) -> Result<()>;

    /// Send an intent to the server
    async fn emit(&mut self, intent: ClientIntent) -> Result<()>;

    /// Wait for the next event. `None` once the connection is gone.
    async fn next_event(&mut self) -> Option<ServerEvent>;

    /// Take an already received event without waiting
    fn try_next_event(&mut self) -> Option<ServerEvent>;
}

/// Callback invoked for each event on a subscribed document
pub type EventHandler = Box<dyn FnMut(&ServerEvent)>;

/// Proof of a subscription; hand it back to [`ClientConnection::unsubscribe`]
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    document_id: String,
}

impl SubscriptionHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

struct Subscription {
    id: u64,
    document_id: String,
    handler: EventHandler,
}

/// Process-wide channel connection with explicit subscriptions
pub struct ClientConnection<T: Transport> {
    transport: T,
    next_id: u64,
    subscriptions: Vec<Subscription>,
    /// Received but not yet dispatched
    pending: VecDeque<ServerEvent>,
}

impl<T: Transport> ClientConnection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: 0,
            subscriptions: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Register `handler` for events on `document_id`.
    ///
    /// The first subscription to a document joins its channel.
    pub async fn subscribe(
        &mut self,
        document_id: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle> {
        if !self.is_subscribed(document_id) {
            self.transport.join_document(document_id).await?;
        }

        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id: self.next_id,
            document_id: document_id.to_string(),
            handler,
        });

        Ok(SubscriptionHandle {
            id: self.next_id,
            document_id: document_id.to_string(),
        })
    }

    /// Drop a subscription. Its handler is never called again, and the
    /// channel is left when this was the document's last subscription.
    ///
    /// Leaving also discards the document's events that were received but
    /// not pumped yet, so a later subscription starts from its own fetch.
    pub async fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<()> {
        self.subscriptions.retain(|s| s.id != handle.id);

        if !self.is_subscribed(&handle.document_id) {
            let left = self.transport.leave_document(&handle.document_id).await;
            self.discard_received(&handle.document_id);
            left?;
        }
        Ok(())
    }

    fn discard_received(&mut self, document_id: &str) {
        while let Some(event) = self.transport.try_next_event() {
            self.pending.push_back(event);
        }

        let before = self.pending.len();
        self.pending.retain(|event| event.document_id() != document_id);
        let discarded = before - self.pending.len();
        if discarded > 0 {
            tracing::debug!(document_id, discarded, "Discarded undelivered events");
        }
    }

    pub fn is_subscribed(&self, document_id: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.document_id == document_id)
    }

    pub async fn emit(&mut self, intent: ClientIntent) -> Result<()> {
        self.transport.emit(intent).await
    }

    /// Wait for one event and dispatch it
    pub async fn pump(&mut self) -> Result<()> {
        let event = match self.pending.pop_front() {
            Some(event) => event,
            None => self
                .transport
                .next_event()
                .await
                .ok_or_else(|| AppError::Transport("Connection closed".to_string()))?,
        };
        self.dispatch(&event);
        Ok(())
    }

    /// Dispatch everything already received. Returns the number of events.
    pub fn pump_pending(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self
            .pending
            .pop_front()
            .or_else(|| self.transport.try_next_event())
        {
            self.dispatch(&event);
            count += 1;
        }
        count
    }

    /// Hand an event to every handler subscribed to its document.
    ///
    /// Events for documents nobody subscribes to are dropped.
    pub fn dispatch(&mut self, event: &ServerEvent) -> usize {
        let document_id = event.document_id();
        let mut delivered = 0;
        for subscription in self
            .subscriptions
            .iter_mut()
            .filter(|s| s.document_id == document_id)
        {
            (subscription.handler)(event);
            delivered += 1;
        }

        if delivered == 0 {
            tracing::debug!(document_id, event = event.name(), "Dropped event without subscriber");
        }
        delivered
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
