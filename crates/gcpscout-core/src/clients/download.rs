use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::api_error_from_body;

/// Unauthenticated fetch of an arbitrary URL, used for signed source-archive links.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpDownloader {
    http: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error_from_body(status, &body))
                .with_context(|| format!("download returned HTTP {}", status.as_u16()));
        }
        Ok(response.bytes().await.context("Failed to read download body")?.to_vec())
    }
}
