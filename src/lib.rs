//! lablaunch: kernel CI job launcher for board labs.
//!
//! Given a registry of boards and a static test plan, lablaunch locates
//! freshly built kernel artifacts for each `(board, tree, branch, defconfig)`,
//! assembles test jobs, and hands them to a dispatch backend (job files on
//! disk or a LAVA scheduler).
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Device**: Gate boards on their scheduler status
//! - **Rootfs**: Choose a root filesystem image per board
//! - **Plan**: Resolve each test's effective config list
//! - **Crawler**: Find build artifacts, trying providers in priority order
//! - **Job**: Assemble artifacts into a deterministically named job
//! - **Dispatch**: Write or submit jobs (file, LAVA)
//! - **Launcher**: Drive boards through the pipeline and summarise the run
//!
//! # Example
//!
//! ```no_run
//! use lablaunch::config::load_config;
//! use lablaunch::launcher::Launcher;
//! use lablaunch::plan::load_plan;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("lablaunch.toml"))?;
//!     let plan = load_plan(&config.launcher.plan)?;
//!     let launcher = Launcher::from_config(&config, plan, None)?;
//!
//!     let boards = launcher.select_boards(&[])?;
//!     let summary = launcher.run(&boards).await;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod board;
pub mod config;
pub mod crawler;
pub mod device;
pub mod dispatch;
pub mod job;
pub mod launcher;
pub mod plan;
pub mod report;
pub mod rootfs;

// Re-export commonly used types
pub use board::{Board, BoardRegistry};
pub use config::{Config, load_config};
pub use crawler::{ArtifactResolver, Crawler};
pub use dispatch::Dispatcher;
pub use job::{ArtifactBundle, Job};
pub use launcher::{Launcher, RunSummary};
pub use plan::{ConfigEntry, TestPlan};
