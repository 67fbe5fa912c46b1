//! HTTP(S) tool fetcher for toolpack.
//!
//! Retrieves tool binaries with a plain GET. Timeouts, hashing and cache
//! writes stay with the download coordinator; this crate only moves bytes.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use toolpack_core::download::ToolFetcher;
use toolpack_core::{Error, Result};
use tracing::debug;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("toolpack/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches tools over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpToolFetcher {
    client: Client,
}

impl HttpToolFetcher {
    /// Create a fetcher with the default client settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ToolFetcher for HttpToolFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "Downloading tool");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::download(url, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::download(url, format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::download(url, format!("failed to read body: {e}")))?;
        debug!(%url, size = bytes.len(), "Downloaded tool");
        Ok(bytes.to_vec())
    }
}
