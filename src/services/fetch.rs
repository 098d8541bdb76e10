//! Blueprint acquisition: fetch raw bytes from a remote URL and classify
//! them by content signature.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::domain::BlueprintSource;
use crate::error::TakeoffError;

/// Source of blueprint bytes. Abstracted so tests can serve canned payloads
/// without touching the network.
#[async_trait]
pub trait BlueprintFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<BlueprintSource, TakeoffError>;
}

/// HTTP fetcher: one GET with a bounded timeout, no retries. A failure is
/// surfaced to the caller as-is.
pub struct HttpBlueprintFetcher {
    client: Client,
}

impl HttpBlueprintFetcher {
    pub fn new(timeout_seconds: u64) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlueprintFetcher for HttpBlueprintFetcher {
    async fn fetch(&self, url: &str) -> Result<BlueprintSource, TakeoffError> {
        debug!(url = %url, "Fetching blueprint");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TakeoffError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| TakeoffError::Fetch(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TakeoffError::Fetch(e.to_string()))?;

        let source = BlueprintSource::new(bytes.to_vec());
        debug!(size = source.size(), kind = ?source.kind, "Blueprint fetched");

        Ok(source)
    }
}
