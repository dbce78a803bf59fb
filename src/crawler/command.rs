//! Crawler backed by an external program.
//!
//! The program is run once per `(board, config)` with its arguments templated
//! from the configured command line, and must print a JSON object mapping
//! artifact role to URL on stdout. Any language works:
//!
//! ```bash
//! find-artifacts --tree mainline --branch master multi_v7_defconfig
//! # {"kernel": "https://builds/zImage", "dtb": "https://builds/board.dtb"}
//! ```
//!
//! | Outcome | Reported as |
//! |---------|-------------|
//! | Spawn failure, timeout, non-zero exit | [`CrawlError::Access`] |
//! | Output that isn't a JSON object of strings | [`CrawlError::Access`] |
//! | No output, or `{}` | [`CrawlError::Empty`] |

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

use super::{CrawlError, CrawlResult, Crawler, expand_template, parse_artifacts};
use crate::board::Board;
use crate::config::CommandCrawlerConfig;
use crate::job::ArtifactBundle;
use crate::plan::ConfigEntry;

/// Crawler that shells out to a user-supplied program.
pub struct CommandCrawler {
    name: String,
    /// Command line split into arguments, placeholders not yet substituted.
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandCrawler {
    /// Creates a crawler from its configuration.
    ///
    /// # Errors
    ///
    /// Fails if the command line is empty or has unbalanced quotes.
    pub fn new(config: &CommandCrawlerConfig) -> Result<Self> {
        let argv = shell_words::split(&config.command)
            .with_context(|| format!("Invalid crawler command: {}", config.command))?;
        if argv.is_empty() {
            bail!("Crawler command must not be empty");
        }

        let name = config.name.clone().unwrap_or_else(|| argv[0].clone());
        let working_dir = config
            .working_dir
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned()));

        Ok(Self {
            name,
            argv,
            working_dir,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

/// Picks the JSON payload out of the program output.
///
/// The whole output is tried first, then the last line that looks like a JSON
/// object, so programs may log progress before printing their result.
fn extract_payload(stdout: &str) -> Option<&str> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .or(Some(trimmed))
}

#[async_trait]
impl Crawler for CommandCrawler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn crawl(&self, board: &Board, config: &ConfigEntry) -> CrawlResult<ArtifactBundle> {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| expand_template(arg, board, config))
            .collect();

        debug!("  Running crawler command: {:?}", argv);

        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                CrawlError::Access(format!("{} timed out after {:?}", argv[0], self.timeout))
            })?
            .map_err(|e| CrawlError::Access(format!("Failed to run {}: {}", argv[0], e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CrawlError::Access(format!(
                "{} exited with {}: {}",
                argv[0],
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(payload) = extract_payload(&stdout) else {
            return Err(CrawlError::Empty(format!("{} printed nothing", argv[0])));
        };

        let artifacts = parse_artifacts(payload)
            .map_err(|e| CrawlError::Access(format!("Malformed output of {}: {}", argv[0], e)))?;

        if artifacts.is_empty() {
            return Err(CrawlError::Empty(format!(
                "{} has no build of {}",
                self.name, config
            )));
        }

        Ok(artifacts)
    }
}
