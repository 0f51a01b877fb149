//! WebSocket transport
//!
//! [`WsTransport`] speaks the `/ws` protocol to a running server. A reader
//! task decodes frames into an inbox; intents are written on the caller's
//! task. When the connection drops, the next call reconnects, rejoins every
//! joined document and queues a local `resync-required` for each, since
//! events broadcast while disconnected are gone.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::transport::Transport;
use crate::error::{AppError, Result};
use crate::realtime::{ClientIntent, DocumentRef, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;

/// Frames buffered by the reader before it stops reading the socket
const INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Wait between failed attempts
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

enum Inbound {
    Event(ServerEvent),
    Closed,
}

/// One open socket
struct Link {
    sender: WsSender,
    inbox: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub struct WsTransport {
    url: String,
    policy: ReconnectPolicy,
    link: Option<Link>,
    joined: BTreeSet<String>,
    /// Events raised locally, delivered before anything from the socket
    local: VecDeque<ServerEvent>,
    reconnects: u32,
}

impl WsTransport {
    /// Connect to a `ws://host:port/ws` endpoint
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let link = open_link(&url).await?;
        tracing::info!(url = %url, "Connected");

        Ok(Self {
            url,
            policy: ReconnectPolicy::default(),
            link: Some(link),
            joined: BTreeSet::new(),
            local: VecDeque::new(),
            reconnects: 0,
        })
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Successful reconnections so far
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn joined(&self) -> impl Iterator<Item = &str> {
        self.joined.iter().map(String::as_str)
    }

    /// Send a close frame and stop reading
    pub async fn close(mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.sender.send(Message::Close(None)).await;
        }
        tracing::info!(url = %self.url, "Disconnected");
    }

    async fn ensure_connected(&mut self) -> Result<&mut Link> {
        if self.link.is_none() {
            self.reconnect().await?;
        }
        self.link
            .as_mut()
            .ok_or_else(|| AppError::Transport("Not connected".to_string()))
    }

    async fn reconnect(&mut self) -> Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.delay).await;
            }

            let mut link = match open_link(&self.url).await {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!(url = %self.url, attempt, error = %e, "Reconnect failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let mut rejoined = Ok(());
            for document_id in &self.joined {
                rejoined = write_intent(&mut link.sender, &join_intent(document_id)).await;
                if rejoined.is_err() {
                    break;
                }
            }
            if let Err(e) = rejoined {
                tracing::warn!(url = %self.url, attempt, error = %e, "Rejoin failed");
                last_error = Some(e);
                continue;
            }

            self.local.retain(|event| !matches!(event, ServerEvent::ResyncRequired(_)));
            self.local
                .extend(self.joined.iter().map(|document_id| ServerEvent::resync(document_id)));
            self.link = Some(link);
            self.reconnects += 1;
            tracing::info!(url = %self.url, attempt, documents = self.joined.len(), "Reconnected");
            return Ok(());
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Transport(format!("Could not reconnect to {}", self.url))
        }))
    }

    async fn send(&mut self, intent: &ClientIntent) -> Result<()> {
        let link = self.ensure_connected().await?;
        let sent = write_intent(&mut link.sender, intent).await;
        if sent.is_err() {
            self.disconnected();
        }
        sent
    }

    fn disconnected(&mut self) {
        if self.link.take().is_some() {
            tracing::warn!(url = %self.url, "Connection lost");
        }
    }

    /// Only events for joined documents are handed out
    fn accept(&self, event: &ServerEvent) -> bool {
        self.joined.contains(event.document_id())
    }

    #[cfg(test)]
    fn drop_link(&mut self) {
        self.link = None;
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn join_document(&mut self, document_id: &str) -> Result<()> {
        self.send(&join_intent(document_id)).await?;
        self.joined.insert(document_id.to_string());
        Ok(())
    }

    async fn leave_document(&mut self, document_id: &str) -> Result<()> {
        if !self.joined.remove(document_id) {
            return Ok(());
        }
        self.local.retain(|event| event.document_id() != document_id);

        // a dropped connection has already left everything server side
        if self.link.is_none() {
            return Ok(());
        }
        self.send(&ClientIntent::LeaveDocument(DocumentRef {
            document_id: document_id.to_string(),
        }))
        .await
    }

    async fn emit(&mut self, intent: ClientIntent) -> Result<()> {
        self.send(&intent).await
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            if let Some(event) = self.local.pop_front() {
                return Some(event);
            }

            let Some(link) = self.link.as_mut() else {
                if let Err(e) = self.reconnect().await {
                    tracing::error!(url = %self.url, error = %e, "Giving up on connection");
                    return None;
                }
                continue;
            };

            match link.inbox.recv().await {
                Some(Inbound::Event(event)) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Some(Inbound::Closed) | None => self.disconnected(),
            }
        }
    }

    fn try_next_event(&mut self) -> Option<ServerEvent> {
        if let Some(event) = self.local.pop_front() {
            return Some(event);
        }

        loop {
            let link = self.link.as_mut()?;
            match link.inbox.try_recv() {
                Ok(Inbound::Event(event)) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Ok(Inbound::Closed) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.disconnected();
                    return None;
                }
                Err(mpsc::error::TryRecvError::Empty) => return None,
            }
        }
    }
}

fn join_intent(document_id: &str) -> ClientIntent {
    ClientIntent::JoinDocument(DocumentRef {
        document_id: document_id.to_string(),
    })
}

async fn open_link(url: &str) -> Result<Link> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| AppError::Transport(format!("Failed to connect to {}: {}", url, e)))?;
    let (sender, read) = stream.split();
    let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
    let reader = tokio::spawn(read_frames(read, tx));

    Ok(Link {
        sender,
        inbox,
        reader,
    })
}

async fn write_intent(sender: &mut WsSender, intent: &ClientIntent) -> Result<()> {
    let json = serde_json::to_string(intent)?;
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| AppError::Transport(e.to_string()))
}

async fn read_frames(mut read: SplitStream<WsStream>, inbox: mpsc::Sender<Inbound>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => {
                    if inbox.send(Inbound::Event(event)).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    let _ = inbox.send(Inbound::Closed).await;
}
