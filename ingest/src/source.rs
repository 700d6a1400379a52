use async_trait::async_trait;
use bytes::Bytes;
use common::Result;
use std::time::Duration;
use tracing::debug;

/// Downloads a URL in full. Catalog envelopes and resource payloads both go through here.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// HTTP GET with a per-request timeout and no retries.
pub struct HttpSource {
    client: rquest::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = rquest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceClient for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}
