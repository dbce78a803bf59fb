//! Job assembly.
//!
//! A [`Job`] is the fully assembled test request handed to a dispatch backend:
//! the artifacts found by a crawler, the board's rootfs, and the identifying
//! fields of the `(board, tree, branch, defconfig, test)` unit it was built
//! for.
//!
//! # Job names
//!
//! Every job carries a composite name joining its five identifying fields with
//! [`NAME_DELIMITER`]:
//!
//! ```text
//! rpi3--mainline--master--defconfig--boot
//! ```
//!
//! The name doubles as the descriptor file name and as the scheduler job name,
//! so it must never collide. Fields are checked with [`check_name_component`]
//! when the registry and plan are loaded: a field never contains the delimiter
//! and never starts or ends with `-`, which makes every delimiter occurrence in
//! a name unambiguous. Fields are also free of path separators and are never
//! `.` or `..`, so a name is always a single file name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::plan::ConfigEntry;

/// Separator between the identifying fields of a job name.
pub const NAME_DELIMITER: &str = "--";

/// Artifact role under which the rootfs URL is attached.
pub const ROOTFS_ROLE: &str = "rootfs";

/// Errors raised when a field cannot take part in a job name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} '{value}' contains the job name delimiter '--'")]
    ContainsDelimiter { kind: &'static str, value: String },

    #[error("{kind} '{value}' must not start or end with '-'")]
    DanglingDash { kind: &'static str, value: String },

    #[error("{kind} '{value}' is not usable in a file name")]
    NotFileName { kind: &'static str, value: String },
}

/// Checks that `value` can be used as one field of a job name.
///
/// `kind` names the field in the error message (e.g. `"defconfig"`).
pub fn check_name_component(kind: &'static str, value: &str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if value.contains(NAME_DELIMITER) {
        return Err(NameError::ContainsDelimiter {
            kind,
            value: value.to_string(),
        });
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(NameError::DanglingDash {
            kind,
            value: value.to_string(),
        });
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(NameError::NotFileName {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Build artifacts for one unit, keyed by role (`kernel`, `dtb`, `modules`, ...).
///
/// Roles are kept sorted so rendered descriptors are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactBundle(BTreeMap<String, String>);

impl ArtifactBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the URL for `role`.
    pub fn insert(&mut self, role: impl Into<String>, url: impl Into<String>) {
        self.0.insert(role.into(), url.into());
    }

    pub fn with(mut self, role: impl Into<String>, url: impl Into<String>) -> Self {
        self.insert(role, url);
        self
    }

    pub fn get(&self, role: &str) -> Option<&str> {
        self.0.get(role).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for ArtifactBundle
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A test job ready for a dispatch backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub board: String,
    pub device_type: String,
    pub tree: String,
    pub branch: String,
    pub defconfig: String,
    pub test: String,
    /// Composite name, see [`job_name`].
    pub name: String,
    /// Crawled artifacts plus the `rootfs` role.
    pub artifacts: ArtifactBundle,
}

#[derive(Serialize)]
struct JobDocument<'a> {
    job_name: &'a str,
    device_type: &'a str,
    metadata: JobMetadata<'a>,
    artifacts: &'a ArtifactBundle,
}

#[derive(Serialize)]
struct JobMetadata<'a> {
    board: &'a str,
    tree: &'a str,
    branch: &'a str,
    defconfig: &'a str,
    test: &'a str,
}

impl Job {
    /// Renders the job descriptor document submitted to the scheduler or
    /// written to disk.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&JobDocument {
            job_name: &self.name,
            device_type: &self.device_type,
            metadata: JobMetadata {
                board: &self.board,
                tree: &self.tree,
                branch: &self.branch,
                defconfig: &self.defconfig,
                test: &self.test,
            },
            artifacts: &self.artifacts,
        })
    }
}

/// Computes the composite name of the job for `(board, config, test)`.
pub fn job_name(board: &str, config: &ConfigEntry, test: &str) -> String {
    [
        board,
        config.tree.as_str(),
        config.branch.as_str(),
        config.defconfig.as_str(),
        test,
    ]
    .join(NAME_DELIMITER)
}

/// Assembles a job from resolved artifacts and the board's rootfs.
///
/// The rootfs URL is attached to the bundle under [`ROOTFS_ROLE`], replacing
/// any rootfs a crawler may have reported.
pub fn assemble(
    board: &Board,
    config: &ConfigEntry,
    test: &str,
    mut artifacts: ArtifactBundle,
    rootfs_url: &str,
) -> Job {
    debug_assert!(!artifacts.is_empty(), "jobs are only built from artifacts");
    artifacts.insert(ROOTFS_ROLE, rootfs_url);

    Job {
        board: board.id.clone(),
        device_type: board.device_type.clone(),
        tree: config.tree.clone(),
        branch: config.branch.clone(),
        defconfig: config.defconfig.clone(),
        test: test.to_string(),
        name: job_name(&board.id, config, test),
        artifacts,
    }
}
