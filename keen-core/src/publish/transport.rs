//! HTTP transport for the events ingestion API
//!
//! The publisher only depends on the [`Transport`] trait. [`HttpTransport`]
//! is the production implementation on top of reqwest.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Delivers request bodies to the ingestion API.
///
/// Implementations must return the batch response with each collection's
/// outcomes in the same order as the events in the request; the publisher
/// matches outcomes to events by position.
pub trait Transport: Send + Sync {
    /// POST a multi-collection batch, returning the response body of a 2xx reply.
    fn post_batch(
        &self,
        project_id: &str,
        body: String,
    ) -> impl Future<Output = Result<String>> + Send;

    /// POST a single event to one collection, returning the response body of a 2xx reply.
    fn post_event(
        &self,
        project_id: &str,
        collection: &str,
        body: String,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_version: String,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// Returns an error if the write key is missing or not a valid header value.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let write_key = config
            .write_key
            .as_deref()
            .ok_or_else(|| Error::Config("client.write_key is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(write_key)
                .map_err(|e| Error::Config(format!("invalid write_key: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        })
    }

    fn events_url(&self, project_id: &str) -> String {
        format!(
            "{}/{}/projects/{}/events",
            self.base_url,
            self.api_version,
            urlencoding::encode(project_id)
        )
    }

    fn collection_url(&self, project_id: &str, collection: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(project_id),
            urlencoding::encode(collection)
        )
    }

    async fn post(&self, url: &str, body: String) -> Result<String> {
        let response = self
            .http_client
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("failed to read response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Server {
                status: status.as_u16(),
                body: error_text,
            })
        }
    }
}

impl Transport for HttpTransport {
    async fn post_batch(&self, project_id: &str, body: String) -> Result<String> {
        let url = self.events_url(project_id);
        tracing::debug!(%url, bytes = body.len(), "Posting event batch");
        self.post(&url, body).await
    }

    async fn post_event(
        &self,
        project_id: &str,
        collection: &str,
        body: String,
    ) -> Result<String> {
        let url = self.collection_url(project_id, collection);
        tracing::debug!(%url, bytes = body.len(), "Posting single event");
        self.post(&url, body).await
    }
}
