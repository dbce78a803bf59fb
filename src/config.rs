//! Configuration loading and schema definitions for lablaunch.
//!
//! The launcher configuration is a TOML document holding the board registry,
//! the rootfs catalog, the ordered crawler list and the dispatch backend. The
//! test plan it points at is loaded separately by [`crate::plan`].

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads lablaunch configuration from a TOML file.
///
/// A relative `launcher.plan` path is rebased onto the directory holding the
/// configuration file, so a config and its plan can be moved together.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    let plan = shellexpand::tilde(&config.launcher.plan.to_string_lossy()).into_owned();
    config.launcher.plan = match path.parent() {
        Some(dir) if Path::new(&plan).is_relative() => dir.join(plan),
        _ => plan.into(),
    };

    Ok(config)
}

/// Loads lablaunch configuration from a TOML string.
///
/// Useful for tests and generated configurations. Paths are left untouched.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
