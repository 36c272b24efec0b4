use async_trait::async_trait;
use reqwest::{header, Client};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Source not found: {source_ref}")]
    NotFound { source_ref: String },
}

/// Retrieves raw source bytes for a definition's source reference.
///
/// One attempt per call; callers treat any error as an item failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches sources over HTTP(S) with identifying default headers.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(user_agent)
            .map_err(|e| FetchError::Client(e.to_string()))?;
        headers.insert(header::USER_AGENT, value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(source).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        tracing::debug!(source, bytes = bytes.len(), "fetched source");
        Ok(bytes.to_vec())
    }
}
