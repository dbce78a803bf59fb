//! File dispatch backend.
//!
//! Writes each job descriptor to `<output_dir>/<job_name>.<extension>`,
//! creating the output directory on first use. Useful for dry runs and for
//! labs that pick jobs up from a spool directory.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{DispatchError, DispatchResult, Dispatcher};
use crate::board::Board;
use crate::config::FileDispatchConfig;
use crate::job::Job;

/// Writes job descriptors to a directory.
#[derive(Debug, Clone)]
pub struct FileDispatcher {
    output_dir: PathBuf,
    extension: String,
}

impl FileDispatcher {
    pub fn new(output_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &FileDispatchConfig) -> Self {
        let output_dir = shellexpand::tilde(&config.output_dir.to_string_lossy()).into_owned();
        Self::new(output_dir, config.extension.trim_start_matches('.'))
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", name, self.extension))
    }
}

#[async_trait]
impl Dispatcher for FileDispatcher {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write(&self, _board: &Board, name: &str, job: &Job) -> DispatchResult<Vec<String>> {
        let document = job.render()?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| DispatchError::WriteUnavailable {
                path: self.output_dir.clone(),
                source,
            })?;

        let path = self.path_for(name);
        tokio::fs::write(&path, document)
            .await
            .map_err(|source| DispatchError::WriteUnavailable {
                path: path.clone(),
                source,
            })?;

        debug!("  Wrote {}", path.display());
        Ok(vec![path.display().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ArtifactBundle, assemble};
    use crate::plan::ConfigEntry;
    use tempfile::TempDir;

    fn job() -> (Board, Job) {
        let board = Board::new("rpi3");
        let job = assemble(
            &board,
            &ConfigEntry::new("mainline", "master", "defconfig"),
            "boot",
            ArtifactBundle::new().with("kernel", "http://y/zImage"),
            "http://x/rootfs.img",
        );
        (board, job)
    }

    #[tokio::test]
    async fn test_write_creates_directory_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("spool/jobs");
        let dispatcher = FileDispatcher::new(&output_dir, "yaml");
        let (board, job) = job();

        let locations = dispatcher.write(&board, &job.name, &job).await.unwrap();

        let expected = output_dir.join("rpi3--mainline--master--defconfig--boot.yaml");
        assert_eq!(locations, vec![expected.display().to_string()]);
        let content = std::fs::read_to_string(&expected).unwrap();
        assert!(content.contains("http://y/zImage"));
        assert!(content.contains("http://x/rootfs.img"));
    }

    #[tokio::test]
    async fn test_write_is_idempotent_on_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dispatcher = FileDispatcher::new(temp_dir.path(), "yaml");
        let (board, job) = job();

        dispatcher.write(&board, &job.name, &job).await.unwrap();
        let locations = dispatcher.write(&board, &job.name, &job).await.unwrap();
        assert_eq!(locations.len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_location_is_write_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let dispatcher = FileDispatcher::new(&blocker, "yaml");
        let (board, job) = job();

        let err = dispatcher.write(&board, &job.name, &job).await.unwrap_err();
        assert!(matches!(err, DispatchError::WriteUnavailable { .. }));
    }

    #[test]
    fn test_from_config_strips_leading_dot() {
        let dispatcher = FileDispatcher::from_config(&FileDispatchConfig {
            output_dir: PathBuf::from("/tmp/jobs"),
            extension: ".yml".to_string(),
        });
        assert_eq!(
            dispatcher.path_for("a--b"),
            PathBuf::from("/tmp/jobs/a--b.yml")
        );
    }
}
