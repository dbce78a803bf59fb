//! Crawler reading a JSON artifact index over HTTP.
//!
//! The configured `index_url` is templated per `(board, config)` and fetched
//! with a GET request. The response body is a JSON object mapping artifact role
//! to URL; relative URLs are resolved against the index URL, so an index can
//! simply list file names next to it:
//!
//! ```json
//! {"kernel": "zImage", "dtb": "dtbs/bcm2837-rpi-3-b.dtb"}
//! ```
//!
//! A 404 means the build doesn't exist and is reported as
//! [`CrawlError::Empty`]; transport failures, other error statuses and
//! malformed bodies are [`CrawlError::Access`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::{CrawlError, CrawlResult, Crawler, expand_template, parse_artifacts};
use crate::board::Board;
use crate::config::HttpCrawlerConfig;
use crate::job::ArtifactBundle;
use crate::plan::ConfigEntry;

/// Crawler fetching a per-build JSON index.
pub struct HttpCrawler {
    name: String,
    index_url: String,
    client: reqwest::Client,
}

impl HttpCrawler {
    /// Creates a crawler from its configuration.
    pub fn new(config: &HttpCrawlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lablaunch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let name = config.name.clone().unwrap_or_else(|| {
            Url::parse(&config.index_url)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .unwrap_or_else(|| "http".to_string())
        });

        Ok(Self {
            name,
            index_url: config.index_url.clone(),
            client,
        })
    }

    fn resolve_urls(index: &Url, artifacts: &ArtifactBundle) -> CrawlResult<ArtifactBundle> {
        artifacts
            .iter()
            .map(|(role, location)| {
                index
                    .join(location)
                    .map(|url| (role.to_string(), url.to_string()))
                    .map_err(|e| {
                        CrawlError::Access(format!("Bad URL '{}' for {}: {}", location, role, e))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn crawl(&self, board: &Board, config: &ConfigEntry) -> CrawlResult<ArtifactBundle> {
        let expanded = expand_template(&self.index_url, board, config);
        let index = Url::parse(&expanded)
            .map_err(|e| CrawlError::Access(format!("Invalid index URL {}: {}", expanded, e)))?;

        debug!("  Fetching artifact index {}", index);

        let response = self
            .client
            .get(index.clone())
            .send()
            .await
            .map_err(|e| CrawlError::Access(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CrawlError::Empty(format!("{} not found", index)));
        }
        if !status.is_success() {
            return Err(CrawlError::Access(format!("HTTP {} from {}", status, index)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Access(e.to_string()))?;
        let artifacts = parse_artifacts(&body)
            .map_err(|e| CrawlError::Access(format!("Malformed index {}: {}", index, e)))?;

        if artifacts.is_empty() {
            return Err(CrawlError::Empty(format!("{} lists no artifacts", index)));
        }

        Self::resolve_urls(&index, &artifacts)
    }
}
