//! WebSocket endpoint and per-connection sessions
//!
//! A [`Session`] holds one connection's document memberships. Each joined
//! document gets a forwarder task that copies channel events into the
//! connection's bounded outbound queue. A connection that stops draining its
//! queue backs up into the channel buffer and is told to resync once it
//! falls behind it.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{ClientIntent, ServerEvent};
use super::hub::Membership;
use crate::annotations::AnnotationService;
use crate::state::AppState;

/// Max time without receiving a frame before the connection is considered dead
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
/// How often the server pings
pub const PING_INTERVAL_SECS: u64 = 30;

struct Forwarder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// One connection's view of the document channels
pub struct Session {
    id: Uuid,
    service: AnnotationService,
    outbound: mpsc::Sender<ServerEvent>,
    forwarders: HashMap<String, Forwarder>,
}

impl Session {
    pub fn new(service: AnnotationService, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service,
            outbound,
            forwarders: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this session currently receives events for `document_id`
    pub fn is_joined(&self, document_id: &str) -> bool {
        self.forwarders.contains_key(document_id)
    }

    /// Apply one client intent.
    ///
    /// Failed creations and deletions are answered with `annotation-rejected`
    /// on this session only.
    pub async fn handle(&mut self, intent: ClientIntent) {
        match intent {
            ClientIntent::JoinDocument(r) => self.join(&r.document_id).await,
            ClientIntent::LeaveDocument(r) => self.leave(&r.document_id).await,
            ClientIntent::NewAnnotation(new) => {
                let document_id = new.document_id.clone();
                if let Err(e) = self.service.create(new).await {
                    tracing::debug!(session = %self.id, error = %e, "Creation rejected");
                    self.reply(ServerEvent::rejected(&document_id, &e));
                }
            }
            ClientIntent::DeleteAnnotation(delete) => {
                if let Err(e) = self.service.delete_intent(&delete).await {
                    tracing::debug!(session = %self.id, error = %e, "Deletion rejected");
                    self.reply(ServerEvent::rejected(&delete.document_id, &e));
                }
            }
        }
    }

    /// Join a document channel. Joining twice is a no-op.
    pub async fn join(&mut self, document_id: &str) {
        if self.is_joined(document_id) {
            return;
        }

        let membership = self.service.hub().join(document_id).await;
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(forward(membership, self.outbound.clone(), stopped));

        self.forwarders
            .insert(document_id.to_string(), Forwarder { stop, task });
        tracing::info!(session = %self.id, document_id, "Joined document");
    }

    /// Leave a document channel. Once this returns no further events for
    /// the document are queued.
    pub async fn leave(&mut self, document_id: &str) {
        let Some(forwarder) = self.forwarders.remove(document_id) else {
            return;
        };

        let _ = forwarder.stop.send(());
        if let Err(e) = forwarder.task.await {
            tracing::warn!(session = %self.id, error = %e, "Forwarder task failed");
        }
        self.service.hub().prune(document_id).await;
        tracing::info!(session = %self.id, document_id, "Left document");
    }

    /// Leave every joined document
    pub async fn close(mut self) {
        let joined: Vec<String> = self.forwarders.keys().cloned().collect();
        for document_id in joined {
            self.leave(&document_id).await;
        }
    }

    fn reply(&self, event: ServerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.outbound.try_send(event) {
            tracing::warn!(session = %self.id, event = event.name(), "Outbound queue full, dropping reply");
        }
    }
}

async fn forward(
    membership: Membership,
    outbound: mpsc::Sender<ServerEvent>,
    mut stopped: oneshot::Receiver<()>,
) {
    let (document_id, mut receiver) = membership.into_parts();

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stopped => break,
            received = receiver.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(document_id = %document_id, lagged = n, "Member lagged, requesting resync");
                    ServerEvent::resync(&document_id)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        };

        // waiting here lets the channel buffer overrun, which surfaces as Lagged
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            sent = outbound.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let service = state.annotations().clone();
    let capacity = state.config().channel.outbound_capacity;
    ws.on_upgrade(move |socket| handle_socket(socket, service, capacity))
}

async fn handle_socket(socket: WebSocket, service: AnnotationService, capacity: usize) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(capacity);
    let mut session = Session::new(service, outbound_tx);
    let conn_id = session.id();
    tracing::info!(session = %conn_id, "WebSocket connection opened");

    let ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    tokio::pin!(ping_interval);
    let mut last_recv = tokio::time::Instant::now();
    let heartbeat_timeout = tokio::time::Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_recv = tokio::time::Instant::now();
                        match serde_json::from_str::<ClientIntent>(&text) {
                            Ok(intent) => session.handle(intent).await,
                            Err(e) => {
                                tracing::warn!(session = %conn_id, error = %e, "Ignoring malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_recv = tokio::time::Instant::now();
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_recv = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!(session = %conn_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(session = %conn_id, error = %e, "Failed to encode event");
                    }
                }
            }
            _ = ping_interval.tick() => {
                if last_recv.elapsed() > heartbeat_timeout {
                    tracing::info!(session = %conn_id, "Heartbeat timeout, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }

    session.close().await;
    tracing::info!(session = %conn_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnotationConfig;
    use crate::db::create_memory_pool;
    use crate::documents::{Document, DocumentRepository, NewDocument, NewUser, User, UserRepository};
    use crate::annotations::NewAnnotation;
    use crate::range::TextRange;
    use crate::realtime::events::DocumentRef;
    use crate::realtime::ChannelHub;

    async fn setup(capacity: usize) -> (AnnotationService, Document, User) {
        let db = create_memory_pool().await.unwrap();
        let document = DocumentRepository::new(&db)
            .create(NewDocument {
                original_name: "fox.txt".into(),
                content: "The quick brown fox".into(),
                uploaded_by: None,
            })
            .await
            .unwrap();
        let user = UserRepository::new(&db)
            .find_or_create(&NewUser {
                username: "ada".into(),
                email: "ada@example.com".into(),
            })
            .await
            .unwrap();
        let service = AnnotationService::new(db, ChannelHub::new(capacity), AnnotationConfig::default());
        (service, document, user)
    }

    fn session(service: &AnnotationService) -> (Session, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Session::new(service.clone(), tx), rx)
    }

    fn new_annotation(document: &Document, user: &User, start: usize, end: usize) -> ClientIntent {
        let range = TextRange::from_offsets(&document.content, start, end).unwrap();
        ClientIntent::NewAnnotation(NewAnnotation::new(&document.id, &user.author(), &range, "note"))
    }

    #[tokio::test]
    async fn test_joined_sessions_receive_additions() {
        let (service, document, user) = setup(16).await;
        let (mut author, mut author_rx) = session(&service);
        let (mut viewer, mut viewer_rx) = session(&service);
        author.join(&document.id).await;
        viewer.join(&document.id).await;

        author.handle(new_annotation(&document, &user, 4, 9)).await;

        for rx in [&mut author_rx, &mut viewer_rx] {
            match rx.recv().await.unwrap() {
                ServerEvent::AnnotationAdded(a) => assert_eq!(a.selected_text, "quick"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_rejection_goes_only_to_originator() {
        let (service, document, user) = setup(16).await;
        let (mut author, mut author_rx) = session(&service);
        let (mut viewer, mut viewer_rx) = session(&service);
        author.join(&document.id).await;
        viewer.join(&document.id).await;

        let mut bad = match new_annotation(&document, &user, 4, 9) {
            ClientIntent::NewAnnotation(n) => n,
            _ => unreachable!(),
        };
        bad.selected_text = "quack".into();
        author.handle(ClientIntent::NewAnnotation(bad)).await;

        match author_rx.recv().await.unwrap() {
            ServerEvent::AnnotationRejected(r) => {
                assert_eq!(r.code, "validation_error");
                assert_eq!(r.document_id, document.id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(viewer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_left_session_receives_nothing() {
        let (service, document, user) = setup(16).await;
        let (mut author, _author_rx) = session(&service);
        let (mut viewer, mut viewer_rx) = session(&service);
        author.join(&document.id).await;
        viewer.join(&document.id).await;

        viewer
            .handle(ClientIntent::LeaveDocument(DocumentRef {
                document_id: document.id.clone(),
            }))
            .await;
        assert!(!viewer.is_joined(&document.id));

        author.handle(new_annotation(&document, &user, 4, 9)).await;
        assert!(viewer_rx.try_recv().is_err());
        assert_eq!(service.hub().member_count(&document.id).await, 1);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let (service, document, _) = setup(16).await;
        let (mut viewer, _rx) = session(&service);
        viewer.join(&document.id).await;
        viewer.join(&document.id).await;
        assert_eq!(service.hub().member_count(&document.id).await, 1);

        viewer.close().await;
        assert_eq!(service.hub().channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_lagging_member_is_told_to_resync() {
        let (service, document, _) = setup(2).await;
        let membership = service.hub().join(&document.id).await;

        for i in 0..4 {
            service
                .hub()
                .publish(&document.id, ServerEvent::resync(&format!("noise-{}", i)))
                .await;
        }

        let (tx, mut rx) = mpsc::channel(4);
        let (_stop, stopped) = oneshot::channel();
        tokio::spawn(forward(membership, tx, stopped));

        assert_eq!(rx.recv().await.unwrap(), ServerEvent::resync(&document.id));
    }

    #[tokio::test]
    async fn test_slow_connection_is_told_to_resync() {
        let (service, document, user) = setup(2).await;
        let (mut author, _author_rx) = session(&service);
        let membership = service.hub().join(&document.id).await;

        // a connection that never drains its single-slot queue
        let (tx, mut rx) = mpsc::channel(1);
        let (_stop, stopped) = oneshot::channel();
        tokio::spawn(forward(membership, tx, stopped));

        for start in [0, 1, 2, 4, 5, 6, 7, 8, 10, 11] {
            author.handle(new_annotation(&document, &user, start, start + 1)).await;
        }

        let resync = ServerEvent::resync(&document.id);
        let mut seen = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await
        {
            let done = event == resync;
            seen.push(event);
            if done {
                break;
            }
        }

        assert_eq!(seen.last(), Some(&resync));
        assert!(seen.len() < 10, "queue grew past its bound: {} events", seen.len());
    }

    #[tokio::test]
    async fn test_leave_while_blocked_on_full_queue() {
        let (service, document, user) = setup(16).await;
        let (mut author, _author_rx) = session(&service);
        let (tx, _rx) = mpsc::channel(1);
        let mut viewer = Session::new(service.clone(), tx);
        viewer.join(&document.id).await;

        for start in [0, 1, 2, 4] {
            author.handle(new_annotation(&document, &user, start, start + 1)).await;
        }
        tokio::task::yield_now().await;

        tokio::time::timeout(std::time::Duration::from_secs(1), viewer.leave(&document.id))
            .await
            .unwrap();
        assert!(!viewer.is_joined(&document.id));
    }
}
