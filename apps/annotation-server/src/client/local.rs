//! In-process adapters
//!
//! [`LocalTransport`] drives a server [`Session`] directly instead of going
//! through a socket, so it sees exactly what a WebSocket client would:
//! broadcasts from joined documents plus rejections of its own intents.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::api::DocumentApi;
use super::transport::Transport;
use crate::annotations::Annotation;
use crate::documents::{Document, DocumentRepository};
use crate::error::{AppError, Result};
use crate::realtime::{ClientIntent, ServerEvent, Session};
use crate::state::AppState;

pub struct LocalTransport {
    session: Session,
    inbox: mpsc::Receiver<ServerEvent>,
}

impl LocalTransport {
    pub fn connect(state: &AppState) -> Self {
        let (outbound, inbox) = mpsc::channel(state.config().channel.outbound_capacity);
        Self {
            session: Session::new(state.annotations().clone(), outbound),
            inbox,
        }
    }

    /// Leave every document, as a dropped socket would
    pub async fn disconnect(self) {
        self.session.close().await;
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn join_document(&mut self, document_id: &str) -> Result<()> {
        self.session.join(document_id).await;
        Ok(())
    }

    async fn leave_document(&mut self, document_id: &str) -> Result<()> {
        self.session.leave(document_id).await;
        Ok(())
    }

    async fn emit(&mut self, intent: ClientIntent) -> Result<()> {
        self.session.handle(intent).await;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.inbox.recv().await
    }

    fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.inbox.try_recv().ok()
    }
}

/// [`DocumentApi`] reading server state in process
#[derive(Clone)]
pub struct LocalDocumentApi {
    state: AppState,
}

impl LocalDocumentApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl DocumentApi for LocalDocumentApi {
    async fn fetch_document(&self, document_id: &str) -> Result<Document> {
        DocumentRepository::new(self.state.db())
            .get(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", document_id)))
    }

    async fn fetch_annotations(&self, document_id: &str) -> Result<Vec<Annotation>> {
        self.state.annotations().list(document_id).await
    }
}
