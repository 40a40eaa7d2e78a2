use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pull-based source of raw feed bytes.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, FetchError>;
}

/// Fetches the vehicle-position feed over HTTP, passing the API key as the
/// `apikey` query parameter when one is configured.
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Bytes, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }

        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "fetched feed");
        Ok(bytes)
    }
}
