//! Dispatch backends.
//!
//! A [`Dispatcher`] takes an assembled [`Job`] and delivers it: either by
//! writing the job descriptor to disk or by submitting it to a remote
//! scheduler. Whatever the backend, the outcome is a list of result locations
//! (file paths or job URLs), so callers never care which backend ran or how
//! many sub-jobs a submission produced.
//!
//! # Built-in Backends
//!
//! | Backend | Module | Result locations |
//! |---------|--------|------------------|
//! | File | [`file`] | `<output_dir>/<job_name>.<ext>` |
//! | LAVA | [`lava`] | `<web_ui_address>/scheduler/job/<id>` per sub-job |

pub mod file;
pub mod lava;
pub mod xmlrpc;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::board::Board;
use crate::job::Job;

pub use file::FileDispatcher;
pub use lava::LavaDispatcher;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Reasons a job was not delivered.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The descriptor file could not be created or written.
    #[error("Couldn't save job file {}: {source}", path.display())]
    WriteUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scheduler endpoint is unusable or rejected the submission.
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),

    /// The job could not be rendered to a descriptor.
    #[error("Failed to render job: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Destination of assembled jobs.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Delivers `job` under `name` and returns where its results can be found.
    async fn write(&self, board: &Board, name: &str, job: &Job) -> DispatchResult<Vec<String>>;
}
