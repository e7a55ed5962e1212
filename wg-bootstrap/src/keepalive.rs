// Keep-alive HTTP pings

//! Keep-alive pings to the platform's wake endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Signals the host platform that the machine should stay up
#[async_trait]
pub trait KeepAlive: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Target, for logging
    fn target(&self) -> &str;
}

/// Plain GET against the public URL, response body discarded
pub struct HttpKeepAlive {
    client: reqwest::Client,
    url: String,
}

impl HttpKeepAlive {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl KeepAlive for HttpKeepAlive {
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        let status = response.status();
        // Drain so the connection can be reused
        let _ = response.bytes().await;
        log::debug!("keepalive: ping {} -> {}", self.url, status);
        Ok(())
    }

    fn target(&self) -> &str {
        &self.url
    }
}
