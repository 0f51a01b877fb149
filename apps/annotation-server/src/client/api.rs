//! REST boundary used by viewers to load a document and its annotations

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::annotations::Annotation;
use crate::documents::Document;
use crate::error::{AppError, Result};
use crate::routes::documents::DocumentWithAnnotations;

#[async_trait]
pub trait DocumentApi: Send + Sync {
    async fn fetch_document(&self, document_id: &str) -> Result<Document>;

    /// Current annotation list, most recent first
    async fn fetch_annotations(&self, document_id: &str) -> Result<Vec<Annotation>>;
}

/// [`DocumentApi`] over the server's HTTP routes
#[derive(Clone)]
pub struct HttpDocumentApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentApi {
    /// `base_url` is the server root, e.g. `http://localhost:8000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/api{}", self.base_url, path);
        tracing::debug!(url = %url, "Fetching");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("{} not found", path))),
            status => Err(AppError::Transport(format!("GET {} returned {}", url, status))),
        }
    }
}

#[async_trait]
impl DocumentApi for HttpDocumentApi {
    async fn fetch_document(&self, document_id: &str) -> Result<Document> {
        let body: DocumentWithAnnotations = self.get_json(&format!("/document/{}", document_id)).await?;
        Ok(body.document)
    }

    async fn fetch_annotations(&self, document_id: &str) -> Result<Vec<Annotation>> {
        self.get_json(&format!("/document/{}/annotations", document_id))
            .await
    }
}
