//! Artifact crawlers and priority-ordered artifact resolution.
//!
//! A crawler locates the build artifacts of one `(tree, branch, defconfig)`
//! for a board from a single upstream provider. Several crawlers are
//! configured in priority order and consulted by the [`ArtifactResolver`]:
//!
//! ```text
//!   resolve(board, config)
//!        │
//!        ▼
//!   crawlers[0].crawl() ── artifacts ──► return (later crawlers never called)
//!        │ Empty  → debug, next
//!        │ Access → warn, next
//!        ▼
//!   crawlers[1].crawl() ── artifacts ──► return
//!        │
//!        ▼
//!       ...
//!        │
//!        ▼
//!    NotFound
//! ```
//!
//! Fallback therefore serves both availability (one provider being down) and
//! preference (one provider's builds win over another's when both exist).
//! Results are never merged across crawlers.
//!
//! # Built-in Crawlers
//!
//! | Crawler | Module | Source |
//! |---------|--------|--------|
//! | Command | [`command`] | External program printing a JSON object |
//! | HTTP | [`http`] | JSON artifact index fetched over HTTP |
//!
//! Both report artifacts as a JSON object mapping role to URL:
//!
//! ```json
//! {"kernel": "http://builds/zImage", "dtb": "http://builds/board.dtb"}
//! ```

pub mod command;
pub mod http;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::board::Board;
use crate::config::CrawlerConfig;
use crate::job::ArtifactBundle;
use crate::plan::ConfigEntry;

pub use command::CommandCrawler;
pub use http::HttpCrawler;

/// Result type for crawler operations.
pub type CrawlResult<T> = Result<T, CrawlError>;

/// Transient crawler failures. Neither aborts resolution; the next crawler
/// is tried.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// The source answered but holds no artifacts for this build.
    #[error("No artifacts returned: {0}")]
    Empty(String),

    /// The source could not be reached or returned garbage.
    #[error("Remote unreachable: {0}")]
    Access(String),
}

/// Every configured crawler came back empty-handed.
#[derive(Debug, thiserror::Error)]
#[error("No artifacts found for {config} on {board}")]
pub struct NotFound {
    pub board: String,
    pub config: ConfigEntry,
}

/// An upstream build provider.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Locates the artifacts of `config` built for `board`.
    ///
    /// An empty bundle is treated like [`CrawlError::Empty`].
    async fn crawl(&self, board: &Board, config: &ConfigEntry) -> CrawlResult<ArtifactBundle>;
}

/// Tries crawlers in priority order until one yields artifacts.
pub struct ArtifactResolver {
    crawlers: Vec<Box<dyn Crawler>>,
}

impl ArtifactResolver {
    /// Creates a resolver consulting `crawlers` in the given order.
    pub fn new(crawlers: Vec<Box<dyn Crawler>>) -> Self {
        Self { crawlers }
    }

    /// Builds the crawlers declared in the `[[crawlers]]` configuration list.
    pub fn from_config(configs: &[CrawlerConfig]) -> Result<Self> {
        let mut crawlers: Vec<Box<dyn Crawler>> = Vec::with_capacity(configs.len());
        for config in configs {
            match config {
                CrawlerConfig::Command(c) => crawlers.push(Box::new(CommandCrawler::new(c)?)),
                CrawlerConfig::Http(c) => crawlers.push(Box::new(HttpCrawler::new(c)?)),
            }
        }
        Ok(Self::new(crawlers))
    }

    pub fn crawler_names(&self) -> impl Iterator<Item = &str> {
        self.crawlers.iter().map(|c| c.name())
    }

    pub fn is_empty(&self) -> bool {
        self.crawlers.is_empty()
    }

    /// Returns the artifacts of the first crawler that has any.
    pub async fn resolve(
        &self,
        board: &Board,
        config: &ConfigEntry,
    ) -> Result<ArtifactBundle, NotFound> {
        for crawler in &self.crawlers {
            match crawler.crawl(board, config).await {
                Ok(artifacts) if !artifacts.is_empty() => {
                    debug!(
                        "  Crawler {} returned {} artifacts",
                        crawler.name(),
                        artifacts.len()
                    );
                    return Ok(artifacts);
                }
                Ok(_) => {
                    debug!(
                        "  No artifacts returned by crawler {}: empty result",
                        crawler.name()
                    );
                }
                Err(CrawlError::Empty(e)) => {
                    debug!("  No artifacts returned by crawler {}: {}", crawler.name(), e);
                }
                Err(CrawlError::Access(e)) => {
                    warn!("  Remote unreachable for crawler {}: {}", crawler.name(), e);
                }
            }
        }

        Err(NotFound {
            board: board.id.clone(),
            config: config.clone(),
        })
    }
}

/// Substitutes `{board}`, `{arch}`, `{tree}`, `{branch}`, `{defconfig}` and
/// the board's extra registry keys.
///
/// `{arch}` expands to an empty string for boards without an architecture.
pub(crate) fn expand_template(template: &str, board: &Board, config: &ConfigEntry) -> String {
    let expanded = template
        .replace("{board}", &board.id)
        .replace("{arch}", board.arch.as_deref().unwrap_or(""))
        .replace("{tree}", &config.tree)
        .replace("{branch}", &config.branch)
        .replace("{defconfig}", &config.defconfig);

    board.extra.iter().fold(expanded, |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Parses a crawler payload: a JSON object mapping artifact role to URL.
pub(crate) fn parse_artifacts(payload: &str) -> serde_json::Result<ArtifactBundle> {
    let roles: BTreeMap<String, String> = serde_json::from_str(payload)?;
    Ok(roles.into_iter().collect())
}
