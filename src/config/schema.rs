//! Configuration schema definitions for lablaunch.
//!
//! This module defines all configuration types that can be deserialized from
//! the TOML launcher configuration. Crawler and dispatch backends are selected
//! with tagged enums keyed on their `type` field.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── LauncherConfig         - Plan location, parallelism, policies
//! ├── boards.<id>            - Board registry (BoardConfig)
//! ├── RootfsConfig           - Rootfs image catalog
//! ├── [[crawlers]]           - Ordered artifact sources (CrawlerConfig)
//! │   ├── Command            - External program printing JSON
//! │   └── Http               - JSON artifact index over HTTP
//! └── DispatchConfig         - Where assembled jobs go
//!     ├── File               - One descriptor file per job
//!     └── Lava               - Remote LAVA scheduler over XML-RPC
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for lablaunch.
///
/// # TOML Structure
///
/// ```toml
/// [launcher]
/// plan = "ci_tests.json"
/// max_parallel = 4
///
/// [boards.rpi3]
/// arch = "arm64"
/// rootfs = { arch = "arm64" }
///
/// [rootfs]
/// base_url = "http://images.lab/rootfs"
///
/// [rootfs.images]
/// arm64 = "arm64/rootfs.cpio.gz"
///
/// [[crawlers]]
/// type = "http"
/// name = "lab-builds"
/// index_url = "http://builds.lab/{tree}/{branch}/{arch}/{defconfig}/artifacts.json"
///
/// [dispatch]
/// type = "file"
/// output_dir = "jobs"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core launcher settings.
    #[serde(default)]
    pub launcher: LauncherConfig,

    /// Board registry, keyed by board id.
    #[serde(default)]
    pub boards: BTreeMap<String, BoardConfig>,

    /// Rootfs image catalog.
    #[serde(default)]
    pub rootfs: RootfsConfig,

    /// Artifact crawlers in priority order. The first one yielding artifacts wins.
    #[serde(default)]
    pub crawlers: Vec<CrawlerConfig>,

    /// Dispatch backend receiving assembled jobs.
    pub dispatch: DispatchConfig,
}

/// Core launcher settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `plan` | `ci_tests.json` |
/// | `max_parallel` | 1 (boards processed one at a time) |
/// | `exclusion_policy` | `strict` |
/// | `color` | `auto` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LauncherConfig {
    /// Path to the JSON test plan.
    ///
    /// Relative paths are resolved against the directory holding the
    /// configuration file.
    #[serde(default = "default_plan")]
    pub plan: PathBuf,

    /// Maximum number of boards evaluated concurrently.
    ///
    /// Tests and configs of a single board are always processed in order.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// How exclusions naming configs absent from the base list are handled.
    #[serde(default)]
    pub exclusion_policy: ExclusionPolicy,

    /// Whether log output is colorized by severity.
    #[serde(default)]
    pub color: ColorChoice,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            plan: default_plan(),
            max_parallel: default_max_parallel(),
            exclusion_policy: ExclusionPolicy::default(),
            color: ColorChoice::default(),
        }
    }
}

fn default_plan() -> PathBuf {
    PathBuf::from("ci_tests.json")
}

fn default_max_parallel() -> usize {
    1
}

/// Handling of `exclude_configs` entries missing from the base config list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionPolicy {
    /// Fail the test with `ConfigNotFound`, surfacing plan authoring errors.
    #[default]
    Strict,
    /// Ignore absent entries.
    Lenient,
}

/// Log colorization mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    /// Colorize when stderr is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

/// A single board registry entry.
///
/// ```toml
/// [boards.beaglebone-black]
/// arch = "arm"
/// device_type = "beaglebone-black"
/// rootfs = { arch = "armv7", flavor = "eabihf" }
/// soc = "am335x"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BoardConfig {
    /// Kernel architecture, substituted into crawler templates as `{arch}`.
    pub arch: Option<String>,

    /// Scheduler device type. Defaults to the board id.
    pub device_type: Option<String>,

    /// Requirements used to pick a rootfs image.
    pub rootfs: Option<RootfsDescriptor>,

    /// Any other string keys, available to crawler templates as `{key}`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// What a board needs from its root filesystem image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RootfsDescriptor {
    /// Userspace architecture (e.g. `armv7`, `arm64`).
    pub arch: String,

    /// Optional variant such as `eabihf` or `be`.
    pub flavor: Option<String>,
}

/// Rootfs image catalog.
///
/// Images are looked up by `arch-flavor` first, then by `arch`. The resulting
/// path is appended to `base_url`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RootfsConfig {
    /// Base URL every image path is relative to.
    pub base_url: Option<String>,

    /// Image paths keyed by `arch` or `arch-flavor`.
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

/// An artifact source.
///
/// Templates accept the placeholders `{board}`, `{arch}`, `{tree}`,
/// `{branch}` and `{defconfig}`.
///
/// ```toml
/// [[crawlers]]
/// type = "command"
/// name = "local-builds"
/// command = "find-artifacts --tree {tree} --branch {branch} {defconfig}"
///
/// [[crawlers]]
/// type = "http"
/// index_url = "https://storage.example.org/{tree}/{branch}/latest/{arch}/{defconfig}/index.json"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CrawlerConfig {
    /// Run an external program that prints a JSON object of role to URL.
    Command(CommandCrawlerConfig),

    /// Fetch a JSON object of role to URL over HTTP.
    Http(HttpCrawlerConfig),
}

/// Configuration for the command crawler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandCrawlerConfig {
    /// Name used in logs. Defaults to the program name.
    pub name: Option<String>,

    /// Command line template, split with shell quoting rules before
    /// placeholders are substituted.
    pub command: String,

    /// Working directory for the program.
    pub working_dir: Option<PathBuf>,

    /// Kill the program and report the source unreachable after this long.
    ///
    /// Default: 300
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    300
}

/// Configuration for the HTTP index crawler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpCrawlerConfig {
    /// Name used in logs. Defaults to the index host.
    pub name: Option<String>,

    /// URL template of the JSON artifact index.
    pub index_url: String,

    /// Request timeout in seconds.
    ///
    /// Default: 60
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    60
}

/// Dispatch backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispatchConfig {
    /// Write one job descriptor file per job.
    File(FileDispatchConfig),

    /// Submit jobs to a LAVA scheduler.
    Lava(LavaDispatchConfig),
}

/// Configuration for the file dispatch backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileDispatchConfig {
    /// Directory receiving `<job_name>.<extension>` files. Created if absent.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File extension of written descriptors.
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for FileDispatchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            extension: default_extension(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("jobs")
}

fn default_extension() -> String {
    "yaml".to_string()
}

/// Configuration for the LAVA dispatch backend.
///
/// `username` and `token` accept `${VAR}` references so credentials can stay
/// out of the file.
///
/// ```toml
/// [dispatch]
/// type = "lava"
/// server = "https://lava.example.org/RPC2"
/// username = "ci-bot"
/// token = "${LAVA_TOKEN}"
/// web_ui_address = "https://lava.example.org"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LavaDispatchConfig {
    /// Scheduler address. Only scheme and host are kept; the path is
    /// always `/RPC2`.
    pub server: String,

    pub username: String,

    pub token: String,

    /// Base URL of the web UI used to render job links.
    pub web_ui_address: String,

    /// Appended to a board id to form the scheduler device name.
    ///
    /// Default: `_01`
    #[serde(default = "default_device_suffix")]
    pub device_suffix: String,

    /// Per-call transport timeout in seconds.
    ///
    /// Default: 120
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

fn default_device_suffix() -> String {
    "_01".to_string()
}

fn default_rpc_timeout() -> u64 {
    120
}
