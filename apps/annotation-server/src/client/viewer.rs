//! Document viewer
//!
//! Ties the pieces a client needs for one open document together: the
//! initial fetch, the channel subscription that keeps the cache current, and
//! the rendered view. Everything runs on the caller's task; channel events
//! are applied when the caller pumps its [`ClientConnection`].

use std::cell::RefCell;
use std::rc::Rc;

use super::api::DocumentApi;
use super::cache::AnnotationCache;
use super::transport::{ClientConnection, EventHandler, SubscriptionHandle, Transport};
use crate::annotations::{Annotation, Author, DeleteAnnotation, NewAnnotation};
use crate::documents::Document;
use crate::error::{AppError, Result};
use crate::html::{render_highlights, HighlightConfig, RenderedDocument};
use crate::range::TextRange;
use crate::realtime::{ClientIntent, Rejection, ServerEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerState {
    Loading,
    Ready,
    /// The initial fetch failed; the viewer holds no partial data
    Failed { code: &'static str, message: String },
}

/// State mutated by the subscription handler
#[derive(Default)]
struct Shared {
    cache: AnnotationCache,
    notices: Vec<Rejection>,
    resync_requested: bool,
}

pub struct DocumentViewer<A: DocumentApi> {
    api: A,
    user: Author,
    document_id: String,
    document: Option<Document>,
    shared: Rc<RefCell<Shared>>,
    subscription: Option<SubscriptionHandle>,
    state: ViewerState,
    highlight: HighlightConfig,
}

impl<A: DocumentApi> DocumentViewer<A> {
    /// Open `document_id` for `user`.
    ///
    /// The channel is joined before the fetch so that nothing broadcast in
    /// between is lost; such events wait in the transport and are applied
    /// on top of the baseline at the next pump.
    pub async fn open<T: Transport>(
        api: A,
        user: Author,
        document_id: &str,
        connection: &mut ClientConnection<T>,
    ) -> Self {
        let mut viewer = Self {
            api,
            user,
            document_id: document_id.to_string(),
            document: None,
            shared: Rc::new(RefCell::new(Shared::default())),
            subscription: None,
            state: ViewerState::Loading,
            highlight: HighlightConfig::default(),
        };
        viewer.load(connection).await;
        viewer
    }

    pub fn with_highlight_config(mut self, config: HighlightConfig) -> Self {
        self.highlight = config;
        self
    }

    async fn load<T: Transport>(&mut self, connection: &mut ClientConnection<T>) {
        let shared = Rc::clone(&self.shared);
        let handler: EventHandler = Box::new(move |event: &ServerEvent| {
            let mut shared = shared.borrow_mut();
            match event {
                ServerEvent::AnnotationRejected(rejection) => shared.notices.push(rejection.clone()),
                ServerEvent::ResyncRequired(_) => shared.resync_requested = true,
                _ => {
                    shared.cache.apply(event);
                }
            }
        });

        let subscription = match connection.subscribe(&self.document_id, handler).await {
            Ok(handle) => handle,
            Err(e) => return self.fail(&e),
        };

        let fetched = tokio::try_join!(
            self.api.fetch_document(&self.document_id),
            self.api.fetch_annotations(&self.document_id),
        );

        match fetched {
            Ok((document, baseline)) => {
                self.shared.borrow_mut().cache.open(&document.id, baseline);
                tracing::debug!(
                    document_id = %document.id,
                    annotations = self.shared.borrow().cache.len(),
                    "Viewer ready"
                );
                self.document = Some(document);
                self.subscription = Some(subscription);
                self.state = ViewerState::Ready;
            }
            Err(e) => {
                if let Err(leave_err) = connection.unsubscribe(subscription).await {
                    tracing::warn!(error = %leave_err, "Failed to leave after fetch error");
                }
                self.fail(&e);
            }
        }
    }

    fn fail(&mut self, error: &AppError) {
        tracing::warn!(document_id = %self.document_id, error = %error, "Viewer failed to open");
        self.document = None;
        self.shared.borrow_mut().cache.close();
        self.state = ViewerState::Failed {
            code: error.code(),
            message: error.public_message(),
        };
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn user(&self) -> &Author {
        &self.user
    }

    /// Annotation list for the side panel, most recent first
    pub fn annotations(&self) -> Vec<Annotation> {
        self.shared.borrow().cache.annotations().to_vec()
    }

    pub fn annotation_count(&self) -> usize {
        self.shared.borrow().cache.len()
    }

    /// Delete is offered only on the viewer's own annotations
    pub fn can_delete(&self, annotation: &Annotation) -> bool {
        annotation.is_authored_by(&self.user.id)
    }

    fn ready_document(&self) -> Result<&Document> {
        match (&self.state, &self.document) {
            (ViewerState::Ready, Some(document)) => Ok(document),
            _ => Err(AppError::Validation(format!(
                "Document '{}' is not open",
                self.document_id
            ))),
        }
    }

    /// Turn a selection on the raw text into a range
    pub fn select(&self, anchor: usize, focus: usize) -> Result<TextRange> {
        let document = self.ready_document()?;
        TextRange::from_selection(&document.content, anchor, focus)
            .map_err(|e| AppError::Validation(e.to_string()))
    }

    /// Ask the server to create an annotation.
    ///
    /// Nothing is inserted locally; the annotation appears once its
    /// broadcast is pumped.
    pub async fn submit<T: Transport>(
        &self,
        connection: &mut ClientConnection<T>,
        range: &TextRange,
        comment: &str,
    ) -> Result<()> {
        let document = self.ready_document()?;
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(AppError::Validation("Comment is required".to_string()));
        }
        range
            .validate_against(&document.content)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let intent = NewAnnotation::new(&document.id, &self.user, range, comment);
        connection.emit(ClientIntent::NewAnnotation(intent)).await
    }

    /// Ask the server to delete one of the viewer's annotations
    pub async fn delete<T: Transport>(
        &self,
        connection: &mut ClientConnection<T>,
        annotation_id: &str,
    ) -> Result<()> {
        let document = self.ready_document()?;
        connection
            .emit(ClientIntent::DeleteAnnotation(DeleteAnnotation {
                annotation_id: annotation_id.to_string(),
                document_id: document.id.clone(),
                user_id: self.user.id.clone(),
            }))
            .await
    }

    /// Render the document with the current annotations marked
    pub fn rendered(&self) -> Option<RenderedDocument> {
        let document = self.ready_document().ok()?;
        let shared = self.shared.borrow();
        Some(render_highlights(
            &document.content,
            shared.cache.annotations(),
            &self.highlight,
        ))
    }

    /// Rejections of this viewer's intents received since the last call
    pub fn take_notices(&self) -> Vec<Rejection> {
        std::mem::take(&mut self.shared.borrow_mut().notices)
    }

    /// Refetch the list if the connection lagged and lost events.
    ///
    /// Returns whether a refetch happened.
    pub async fn resync_if_needed(&mut self) -> Result<bool> {
        if !std::mem::take(&mut self.shared.borrow_mut().resync_requested) {
            return Ok(false);
        }
        let baseline = self.api.fetch_annotations(&self.document_id).await?;
        tracing::info!(document_id = %self.document_id, annotations = baseline.len(), "Resynchronized");
        self.shared.borrow_mut().cache.reset(baseline);
        Ok(true)
    }

    /// Leave the channel and discard the cache
    pub async fn close<T: Transport>(mut self, connection: &mut ClientConnection<T>) -> Result<()> {
        self.shared.borrow_mut().cache.close();
        self.document = None;
        match self.subscription.take() {
            Some(handle) => connection.unsubscribe(handle).await,
            None => Ok(()),
        }
    }
}
