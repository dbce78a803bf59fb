//! Test plan loading and config resolution.
//!
//! The test plan is a JSON document mapping each board id to its default
//! build configs and the tests to run on it:
//!
//! ```json
//! {
//!   "rpi3": {
//!     "configs": [
//!       {"tree": "mainline", "branch": "master", "defconfig": "defconfig"}
//!     ],
//!     "tests": [
//!       {"name": "boot"},
//!       {"name": "network",
//!        "exclude_configs": [
//!          {"tree": "mainline", "branch": "master", "defconfig": "defconfig"}
//!        ]}
//!     ]
//!   }
//! }
//! ```
//!
//! A test may replace the board defaults with its own `configs` list and may
//! drop entries with `exclude_configs`. [`resolve_configs`] applies both.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ExclusionPolicy;
use crate::job::{NameError, check_name_component};

/// Errors raised while validating a plan or resolving a test's configs.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// An `exclude_configs` entry is not in the base list (strict policy).
    #[error("Test '{test}' excludes {entry}, which is not in its config list")]
    ConfigNotFound { test: String, entry: ConfigEntry },

    /// A plan field cannot be used in job names.
    #[error("Invalid plan for board '{board}': {source}")]
    InvalidName {
        board: String,
        #[source]
        source: NameError,
    },
}

/// Identifies one upstream build: a tree, a branch of it, and a defconfig.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub tree: String,
    pub branch: String,
    pub defconfig: String,
}

impl ConfigEntry {
    pub fn new(
        tree: impl Into<String>,
        branch: impl Into<String>,
        defconfig: impl Into<String>,
    ) -> Self {
        Self {
            tree: tree.into(),
            branch: branch.into(),
            defconfig: defconfig.into(),
        }
    }

    fn validate(&self) -> Result<(), NameError> {
        check_name_component("tree", &self.tree)?;
        check_name_component("branch", &self.branch)?;
        check_name_component("defconfig", &self.defconfig)
    }
}

impl fmt::Display for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tree, self.branch, self.defconfig)
    }
}

/// A test to run on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,

    /// Replaces the board's default configs when present.
    #[serde(rename = "configs", default, skip_serializing_if = "Option::is_none")]
    pub override_configs: Option<Vec<ConfigEntry>>,

    /// Removed from the base config list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_configs: Option<Vec<ConfigEntry>>,
}

impl TestSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            override_configs: None,
            exclude_configs: None,
        }
    }

    pub fn with_configs(mut self, configs: Vec<ConfigEntry>) -> Self {
        self.override_configs = Some(configs);
        self
    }

    pub fn with_excludes(mut self, excludes: Vec<ConfigEntry>) -> Self {
        self.exclude_configs = Some(excludes);
        self
    }
}

/// Plan entry of a single board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPlan {
    /// Default configs for tests that don't override them.
    #[serde(default)]
    pub configs: Vec<ConfigEntry>,

    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

/// The whole test plan, keyed by board id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestPlan {
    boards: BTreeMap<String, BoardPlan>,
}

impl TestPlan {
    pub fn insert(&mut self, board: impl Into<String>, plan: BoardPlan) {
        self.boards.insert(board.into(), plan);
    }

    pub fn get(&self, board: &str) -> Option<&BoardPlan> {
        self.boards.get(board)
    }

    /// Planned board ids in lexicographic order.
    pub fn board_ids(&self) -> impl Iterator<Item = &str> {
        self.boards.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoardPlan)> {
        self.boards.iter().map(|(id, plan)| (id.as_str(), plan))
    }

    /// Checks that every board id, test name and config field can be used in
    /// a job name.
    pub fn validate(&self) -> Result<(), PlanError> {
        for (board, plan) in &self.boards {
            let invalid = |source: NameError| PlanError::InvalidName {
                board: board.clone(),
                source,
            };
            check_name_component("board id", board).map_err(invalid)?;
            for config in &plan.configs {
                config.validate().map_err(invalid)?;
            }
            for test in &plan.tests {
                check_name_component("test name", &test.name).map_err(invalid)?;
                let lists = [&test.override_configs, &test.exclude_configs];
                for config in lists.into_iter().flatten().flatten() {
                    config.validate().map_err(invalid)?;
                }
            }
        }
        Ok(())
    }
}

/// Loads and validates a test plan from a JSON file.
pub fn load_plan(path: &Path) -> Result<TestPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read test plan: {}", path.display()))?;

    load_plan_str(&content).with_context(|| format!("Invalid test plan: {}", path.display()))
}

/// Loads and validates a test plan from a JSON string.
pub fn load_plan_str(content: &str) -> Result<TestPlan> {
    let plan: TestPlan = serde_json::from_str(content).context("Failed to parse test plan")?;
    plan.validate()?;
    Ok(plan)
}

/// Computes the configs to build for `test`.
///
/// The base list is the test's override list when present, the board defaults
/// otherwise. Excluded entries are filtered out; surviving entries keep their
/// relative order.
///
/// # Errors
///
/// With [`ExclusionPolicy::Strict`], returns [`PlanError::ConfigNotFound`] for
/// the first exclusion that matches nothing in the base list.
pub fn resolve_configs(
    test: &TestSpec,
    defaults: &[ConfigEntry],
    policy: ExclusionPolicy,
) -> Result<Vec<ConfigEntry>, PlanError> {
    let base = match &test.override_configs {
        Some(configs) => {
            debug!("  Configs overridden: {:?}", configs);
            configs.as_slice()
        }
        None => {
            debug!("  Using default configs: {:?}", defaults);
            defaults
        }
    };

    let Some(excludes) = &test.exclude_configs else {
        return Ok(base.to_vec());
    };
    debug!("  Configs excluded: {:?}", excludes);

    for exclude in excludes {
        if !base.contains(exclude) {
            match policy {
                ExclusionPolicy::Strict => {
                    return Err(PlanError::ConfigNotFound {
                        test: test.name.clone(),
                        entry: exclude.clone(),
                    });
                }
                ExclusionPolicy::Lenient => {
                    debug!("  Ignoring exclusion of absent config {}", exclude);
                }
            }
        }
    }

    let configs: Vec<ConfigEntry> = base
        .iter()
        .filter(|config| !excludes.contains(config))
        .cloned()
        .collect();
    debug!("  Using new configs: {:?}", configs);

    Ok(configs)
}
