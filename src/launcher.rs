//! Board-by-board job launching.
//!
//! The [`Launcher`] walks the test plan and, for every selected board, runs
//! the pipeline below. Boards are processed with bounded parallelism; work
//! within a board is sequential.
//!
//! ```text
//!   board ──► device status ──► rootfs ──► for each test:
//!               │ offline/         │ none        resolve configs ── ConfigNotFound ──► skip test
//!               │ retired          │                   │
//!               ▼                  ▼                   ▼ for each config:
//!          skip board         skip board          resolve artifacts ── NotFound ──► skip unit
//!                                                      │
//!                                                      ▼
//!                                                 assemble job ──► dispatch
//! ```
//!
//! No board's or job's failure aborts its siblings; every outcome is recorded
//! in the [`RunSummary`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use futures::stream;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::board::{Board, BoardRegistry};
use crate::config::{Config, DispatchConfig, ExclusionPolicy, FileDispatchConfig};
use crate::crawler::ArtifactResolver;
use crate::device::{self, AlwaysOnline, DeviceError, DeviceStatus, DeviceStatusProvider};
use crate::dispatch::{Dispatcher, FileDispatcher, LavaDispatcher};
use crate::job;
use crate::plan::{ConfigEntry, TestPlan, TestSpec, resolve_configs};
use crate::rootfs::{CatalogChooser, RootfsChooser};

/// Outcome of one `(test, config)` unit, or of a whole test when its config
/// list could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Dispatched {
        job_name: String,
        locations: Vec<String>,
    },
    /// Every crawler came back empty-handed.
    NoArtifacts,
    DispatchFailed(String),
    /// The test's exclusions named a config absent from its list.
    ConfigNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub test: String,
    /// `None` when the outcome concerns the whole test.
    pub config: Option<ConfigEntry>,
    pub outcome: UnitOutcome,
}

/// What happened to a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardOutcome {
    /// Offline or retired; nothing was attempted.
    Unavailable(DeviceStatus),
    /// The status query failed; nothing was attempted.
    StatusUnknown(String),
    RootfsUnavailable(String),
    Processed(Vec<UnitReport>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardReport {
    pub board: String,
    pub outcome: BoardOutcome,
}

impl BoardReport {
    pub fn units(&self) -> &[UnitReport] {
        match &self.outcome {
            BoardOutcome::Processed(units) => units,
            _ => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        !matches!(self.outcome, BoardOutcome::Processed(_))
    }
}

/// Results of a launcher run, in board selection order.
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every built job was dispatched |
/// | 1 | A job failed to dispatch, or a test's exclusions were invalid |
///
/// Skipped boards and configs without artifacts are normal lab conditions and
/// don't affect the exit code.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub boards: Vec<BoardReport>,
}

impl RunSummary {
    fn units(&self) -> impl Iterator<Item = &UnitReport> {
        self.boards.iter().flat_map(BoardReport::units)
    }

    /// Names of dispatched jobs, in dispatch order per board.
    pub fn job_names(&self) -> Vec<&str> {
        self.units()
            .filter_map(|u| match &u.outcome {
                UnitOutcome::Dispatched { job_name, .. } => Some(job_name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn dispatched(&self) -> usize {
        self.units()
            .filter(|u| matches!(u.outcome, UnitOutcome::Dispatched { .. }))
            .count()
    }

    pub fn no_artifacts(&self) -> usize {
        self.units()
            .filter(|u| u.outcome == UnitOutcome::NoArtifacts)
            .count()
    }

    pub fn skipped_boards(&self) -> usize {
        self.boards.iter().filter(|b| b.is_skipped()).count()
    }

    /// Dispatch failures plus tests rejected for invalid exclusions.
    pub fn failures(&self) -> usize {
        self.units()
            .filter(|u| {
                matches!(
                    u.outcome,
                    UnitOutcome::DispatchFailed(_) | UnitOutcome::ConfigNotFound(_)
                )
            })
            .count()
    }

    pub fn success(&self) -> bool {
        self.failures() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Drives boards through status gating, rootfs selection, artifact
/// resolution and dispatch.
pub struct Launcher {
    registry: BoardRegistry,
    plan: TestPlan,
    status: Arc<dyn DeviceStatusProvider>,
    rootfs: Arc<dyn RootfsChooser>,
    resolver: ArtifactResolver,
    dispatcher: Arc<dyn Dispatcher>,
    policy: ExclusionPolicy,
    max_parallel: usize,
}

impl Launcher {
    pub fn new(
        registry: BoardRegistry,
        plan: TestPlan,
        status: Arc<dyn DeviceStatusProvider>,
        rootfs: Arc<dyn RootfsChooser>,
        resolver: ArtifactResolver,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            registry,
            plan,
            status,
            rootfs,
            resolver,
            dispatcher,
            policy: ExclusionPolicy::default(),
            max_parallel: 1,
        }
    }

    pub fn with_policy(mut self, policy: ExclusionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of boards processed concurrently. Zero is treated as one.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Wires the configured backends.
    ///
    /// `output_dir` forces the file backend, turning any configuration into a
    /// dry run that writes descriptors instead of submitting them.
    pub fn from_config(config: &Config, plan: TestPlan, output_dir: Option<&Path>) -> Result<Self> {
        let registry =
            BoardRegistry::from_config(&config.boards).context("Invalid board registry")?;
        let resolver = ArtifactResolver::from_config(&config.crawlers)?;
        if resolver.is_empty() {
            warn!("No crawlers configured, no job can be built");
        }

        let (status, dispatcher): (Arc<dyn DeviceStatusProvider>, Arc<dyn Dispatcher>) =
            match (&config.dispatch, output_dir) {
                (DispatchConfig::File(file), dir) => {
                    let mut file = file.clone();
                    if let Some(dir) = dir {
                        file.output_dir = dir.to_path_buf();
                    }
                    (
                        Arc::new(AlwaysOnline),
                        Arc::new(FileDispatcher::from_config(&file)),
                    )
                }
                (DispatchConfig::Lava(_), Some(dir)) => {
                    let file = FileDispatchConfig {
                        output_dir: dir.to_path_buf(),
                        ..Default::default()
                    };
                    (
                        Arc::new(AlwaysOnline),
                        Arc::new(FileDispatcher::from_config(&file)),
                    )
                }
                (DispatchConfig::Lava(lava), None) => {
                    let lava = Arc::new(LavaDispatcher::from_config(lava)?);
                    (lava.clone(), lava)
                }
            };

        Ok(Self::new(
            registry,
            plan,
            status,
            Arc::new(CatalogChooser::new(&config.rootfs)),
            resolver,
            dispatcher,
        )
        .with_policy(config.launcher.exclusion_policy)
        .with_max_parallel(config.launcher.max_parallel))
    }

    /// Resolves the boards to process.
    ///
    /// An empty request selects every planned board. Requested boards must be
    /// known to the registry or the plan; duplicates are dropped.
    pub fn select_boards(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.plan.board_ids().map(str::to_string).collect());
        }

        let mut selected: Vec<String> = Vec::with_capacity(requested.len());
        for id in requested {
            if !self.registry.contains(id) && self.plan.get(id).is_none() {
                bail!("Unknown board: {}", id);
            }
            if !selected.contains(id) {
                selected.push(id.clone());
            }
        }
        Ok(selected)
    }

    /// Processes `boards` and returns their reports in the same order.
    pub async fn run(&self, boards: &[String]) -> RunSummary {
        info!(
            "Launching jobs for {} board(s) with {} via {}",
            boards.len(),
            self.resolver.crawler_names().collect::<Vec<_>>().join(", "),
            self.dispatcher.name()
        );

        let reports = stream::iter(boards.iter().map(|id| {
            self.process_board(id)
                .instrument(info_span!("board", board = %id))
        }))
        .buffered(self.max_parallel)
        .collect::<Vec<_>>()
        .await;

        RunSummary { boards: reports }
    }

    fn board(&self, id: &str) -> Board {
        self.registry
            .get(id)
            .cloned()
            .unwrap_or_else(|| Board::new(id))
    }

    async fn process_board(&self, id: &str) -> BoardReport {
        let report = |outcome| BoardReport {
            board: id.to_string(),
            outcome,
        };

        let board_plan = match self.plan.get(id) {
            Some(plan) if !plan.tests.is_empty() => plan,
            _ => {
                info!("No test set for board {}", id);
                return report(BoardOutcome::Processed(Vec::new()));
            }
        };

        let board = self.board(id);

        match device::check_board(self.status.as_ref(), &board).await {
            Ok(()) => {}
            Err(DeviceError::Unavailable(status)) => {
                error!("Device is {}, not sending jobs", status);
                return report(BoardOutcome::Unavailable(status));
            }
            Err(e) => {
                error!("{}, not sending jobs", e);
                return report(BoardOutcome::StatusUnknown(e.to_string()));
            }
        }

        let rootfs_url = match self.rootfs.get_url(&board).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Couldn't get rootfs: {}", e);
                return report(BoardOutcome::RootfsUnavailable(e.to_string()));
            }
        };
        debug!("Using rootfs {}", rootfs_url);

        let mut units = Vec::new();
        for test in &board_plan.tests {
            self.process_test(&board, test, &board_plan.configs, &rootfs_url, &mut units)
                .await;
        }

        report(BoardOutcome::Processed(units))
    }

    async fn process_test(
        &self,
        board: &Board,
        test: &TestSpec,
        defaults: &[ConfigEntry],
        rootfs_url: &str,
        units: &mut Vec<UnitReport>,
    ) {
        info!("Building job(s) for {}", test.name);

        let configs = match resolve_configs(test, defaults, self.policy) {
            Ok(configs) => configs,
            Err(e) => {
                error!("{}", e);
                units.push(UnitReport {
                    test: test.name.clone(),
                    config: None,
                    outcome: UnitOutcome::ConfigNotFound(e.to_string()),
                });
                return;
            }
        };

        for config in configs {
            let outcome = self.process_unit(board, test, &config, rootfs_url).await;
            units.push(UnitReport {
                test: test.name.clone(),
                config: Some(config),
                outcome,
            });
        }
    }

    async fn process_unit(
        &self,
        board: &Board,
        test: &TestSpec,
        config: &ConfigEntry,
        rootfs_url: &str,
    ) -> UnitOutcome {
        info!("  Fetching artifacts for {}", config);

        let artifacts = match self.resolver.resolve(board, config).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!("  {}", e);
                return UnitOutcome::NoArtifacts;
            }
        };

        info!("  Making {} job for {}", test.name, config);
        let job = job::assemble(board, config, &test.name, artifacts, rootfs_url);

        match self.dispatcher.write(board, &job.name, &job).await {
            Ok(locations) => {
                for location in &locations {
                    info!("  Job {} dispatched: {}", job.name, location);
                }
                UnitOutcome::Dispatched {
                    job_name: job.name,
                    locations,
                }
            }
            Err(e) => {
                error!("  Failed to dispatch {}: {}", job.name, e);
                UnitOutcome::DispatchFailed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{CrawlError, CrawlResult, Crawler};
    use crate::device::DeviceResult;
    use crate::dispatch::{DispatchError, DispatchResult};
    use crate::job::{ArtifactBundle, Job};
    use crate::plan::BoardPlan;
    use crate::rootfs::{RootfsError, RootfsResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type CrawlFn = Box<dyn Fn(&ConfigEntry) -> CrawlResult<ArtifactBundle> + Send + Sync>;

    struct FnCrawler {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        crawl: CrawlFn,
    }

    #[async_trait]
    impl Crawler for FnCrawler {
        fn name(&self) -> &str {
            self.name
        }

        async fn crawl(&self, _board: &Board, config: &ConfigEntry) -> CrawlResult<ArtifactBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.crawl)(config)
        }
    }

    fn crawler(
        name: &'static str,
        crawl: impl Fn(&ConfigEntry) -> CrawlResult<ArtifactBundle> + Send + Sync + 'static,
    ) -> (Box<dyn Crawler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let crawler = FnCrawler {
            name,
            calls: calls.clone(),
            crawl: Box::new(crawl),
        };
        (Box::new(crawler), calls)
    }

    fn empty(_: &ConfigEntry) -> CrawlResult<ArtifactBundle> {
        Err(CrawlError::Empty("nothing built".to_string()))
    }

    fn kernel_for(config: &ConfigEntry) -> CrawlResult<ArtifactBundle> {
        Ok(ArtifactBundle::new().with("kernel", format!("http://y/{}/zImage", config.tree)))
    }

    #[derive(Default)]
    struct Status(HashMap<&'static str, DeviceStatus>);

    #[async_trait]
    impl DeviceStatusProvider for Status {
        async fn device_status(&self, board: &Board) -> DeviceResult<DeviceStatus> {
            Ok(self
                .0
                .get(board.id.as_str())
                .copied()
                .unwrap_or(DeviceStatus::Online))
        }
    }

    #[derive(Default)]
    struct Rootfs {
        missing: Vec<&'static str>,
        delay_ms: HashMap<&'static str, u64>,
    }

    #[async_trait]
    impl RootfsChooser for Rootfs {
        async fn get_url(&self, board: &Board) -> RootfsResult<String> {
            if let Some(ms) = self.delay_ms.get(board.id.as_str()) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.missing.iter().any(|m| *m == board.id) {
                return Err(RootfsError::NoDescriptor(board.id.clone()));
            }
            Ok("http://x/rootfs.img".to_string())
        }
    }

    #[derive(Default)]
    struct Recorder {
        jobs: Mutex<Vec<Job>>,
        fail_tests: Vec<&'static str>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.jobs.lock().unwrap().iter().map(|j| j.name.clone()).collect()
        }
    }

    #[async_trait]
    impl Dispatcher for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn write(&self, _board: &Board, name: &str, job: &Job) -> DispatchResult<Vec<String>> {
            if self.fail_tests.iter().any(|t| *t == job.test) {
                return Err(DispatchError::Unavailable("submission rejected".to_string()));
            }
            self.jobs.lock().unwrap().push(job.clone());
            Ok(vec![format!("file:///jobs/{}.yaml", name)])
        }
    }

    fn mainline() -> ConfigEntry {
        ConfigEntry::new("mainline", "master", "defconfig")
    }

    fn next() -> ConfigEntry {
        ConfigEntry::new("next", "master", "defconfig")
    }

    fn stable() -> ConfigEntry {
        ConfigEntry::new("stable", "linux-6.1.y", "defconfig")
    }

    fn plan(entries: Vec<(&str, BoardPlan)>) -> TestPlan {
        let mut plan = TestPlan::default();
        for (board, entry) in entries {
            plan.insert(board, entry);
        }
        plan
    }

    fn boot_plan(configs: Vec<ConfigEntry>) -> BoardPlan {
        BoardPlan {
            configs,
            tests: vec![TestSpec::new("boot")],
        }
    }

    fn launcher(
        plan: TestPlan,
        status: Status,
        rootfs: Rootfs,
        crawlers: Vec<Box<dyn Crawler>>,
        recorder: Arc<Recorder>,
    ) -> Launcher {
        let registry: BoardRegistry = plan.board_ids().map(Board::new).collect();
        Launcher::new(
            registry,
            plan,
            Arc::new(status),
            Arc::new(rootfs),
            ArtifactResolver::new(crawlers),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_rpi3_falls_back_to_second_crawler() {
        let (a, a_calls) = crawler("a", empty);
        let (b, b_calls) = crawler("b", |_| {
            Ok(ArtifactBundle::new().with("kernel", "http://y/zImage"))
        });
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![("rpi3", boot_plan(vec![mainline()]))]),
            Status::default(),
            Rootfs::default(),
            vec![a, b],
            recorder.clone(),
        );

        let summary = launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(summary.job_names(), vec!["rpi3--mainline--master--defconfig--boot"]);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);

        let jobs = recorder.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].artifacts.get("kernel"), Some("http://y/zImage"));
        assert_eq!(jobs[0].artifacts.get("rootfs"), Some("http://x/rootfs.img"));
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_retired_board_does_no_work() {
        let (a, a_calls) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![("bbb", boot_plan(vec![mainline(), next()]))]),
            Status(HashMap::from([("bbb", DeviceStatus::Retired)])),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        let summary = launcher.run(&["bbb".to_string()]).await;

        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert!(recorder.names().is_empty());
        assert_eq!(
            summary.boards[0].outcome,
            BoardOutcome::Unavailable(DeviceStatus::Retired)
        );
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_offline_board_is_skipped_but_siblings_run() {
        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![
                ("bbb", boot_plan(vec![mainline()])),
                ("rpi3", boot_plan(vec![mainline()])),
            ]),
            Status(HashMap::from([("bbb", DeviceStatus::Offline)])),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        let boards = launcher.select_boards(&[]).unwrap();
        let summary = launcher.run(&boards).await;

        assert_eq!(summary.skipped_boards(), 1);
        assert_eq!(recorder.names(), vec!["rpi3--mainline--master--defconfig--boot"]);
    }

    #[tokio::test]
    async fn test_missing_rootfs_skips_board() {
        let (a, a_calls) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![("rpi3", boot_plan(vec![mainline()]))]),
            Status::default(),
            Rootfs {
                missing: vec!["rpi3"],
                ..Default::default()
            },
            vec![a],
            recorder.clone(),
        );

        let summary = launcher.run(&["rpi3".to_string()]).await;

        assert!(matches!(
            summary.boards[0].outcome,
            BoardOutcome::RootfsUnavailable(_)
        ));
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert!(recorder.names().is_empty());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    /// Captures every event at debug and above until the guard drops.
    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn test_no_artifacts_anywhere() {
        let (logs, _guard) = capture_logs();

        let (a, _) = crawler("a", empty);
        let (b, _) = crawler("b", empty);
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![("rpi3", boot_plan(vec![mainline()]))]),
            Status::default(),
            Rootfs::default(),
            vec![a, b],
            recorder.clone(),
        );

        let summary = launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(summary.dispatched(), 0);
        assert_eq!(summary.no_artifacts(), 1);
        assert!(recorder.names().is_empty());
        assert_eq!(summary.exit_code(), 0);

        let lines = logs.lines();
        let errors: Vec<_> = lines.iter().filter(|l| l.contains("ERROR")).collect();
        assert_eq!(errors.len(), 1, "{:#?}", lines);
        assert!(errors[0].contains("No artifacts found for mainline/master/defconfig on rpi3"));
        assert!(!lines.iter().any(|l| l.contains("WARN")), "{:#?}", lines);
        let fall_throughs = lines
            .iter()
            .filter(|l| l.contains("DEBUG") && l.contains("No artifacts returned by crawler"))
            .count();
        assert_eq!(fall_throughs, 2);
    }

    #[tokio::test]
    async fn test_override_replaces_defaults() {
        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let board_plan = BoardPlan {
            configs: vec![mainline()],
            tests: vec![TestSpec::new("ltp").with_configs(vec![next()])],
        };
        let launcher = launcher(
            plan(vec![("rpi3", board_plan)]),
            Status::default(),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(recorder.names(), vec!["rpi3--next--master--defconfig--ltp"]);
    }

    #[tokio::test]
    async fn test_excluded_config_never_built() {
        let (logs, _guard) = capture_logs();
        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let board_plan = BoardPlan {
            configs: vec![mainline(), next(), stable()],
            tests: vec![TestSpec::new("boot").with_excludes(vec![next()])],
        };
        let launcher = launcher(
            plan(vec![("rpi3", board_plan)]),
            Status::default(),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(
            recorder.names(),
            vec![
                "rpi3--mainline--master--defconfig--boot",
                "rpi3--stable--linux-6.1.y--defconfig--boot"
            ]
        );

        let resolved = logs
            .lines()
            .iter()
            .filter(|l| l.contains("Using new configs"))
            .count();
        assert_eq!(resolved, 1);
    }

    #[tokio::test]
    async fn test_strict_absent_exclusion_skips_only_that_test() {
        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let board_plan = BoardPlan {
            configs: vec![mainline()],
            tests: vec![
                TestSpec::new("boot").with_excludes(vec![stable()]),
                TestSpec::new("ltp"),
            ],
        };
        let launcher = launcher(
            plan(vec![("rpi3", board_plan.clone())]),
            Status::default(),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        let summary = launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(recorder.names(), vec!["rpi3--mainline--master--defconfig--ltp"]);
        assert!(matches!(
            summary.boards[0].units()[0].outcome,
            UnitOutcome::ConfigNotFound(_)
        ));
        assert_eq!(summary.exit_code(), 1);

        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let lenient = self::launcher(
            plan(vec![("rpi3", board_plan)]),
            Status::default(),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        )
        .with_policy(ExclusionPolicy::Lenient);

        let summary = lenient.run(&["rpi3".to_string()]).await;
        assert_eq!(summary.dispatched(), 2);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_does_not_stop_siblings() {
        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder {
            fail_tests: vec!["boot"],
            ..Default::default()
        });
        let board_plan = BoardPlan {
            configs: vec![mainline()],
            tests: vec![TestSpec::new("boot"), TestSpec::new("ltp")],
        };
        let launcher = launcher(
            plan(vec![("rpi3", board_plan)]),
            Status::default(),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        let summary = launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(summary.failures(), 1);
        assert_eq!(recorder.names(), vec!["rpi3--mainline--master--defconfig--ltp"]);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_parallel_run_preserves_board_order() {
        let (a, _) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![
                ("a-board", boot_plan(vec![mainline()])),
                ("b-board", boot_plan(vec![mainline()])),
                ("c-board", boot_plan(vec![mainline()])),
            ]),
            Status::default(),
            Rootfs {
                delay_ms: HashMap::from([("a-board", 60), ("b-board", 30)]),
                ..Default::default()
            },
            vec![a],
            recorder.clone(),
        )
        .with_max_parallel(3);

        let boards = launcher.select_boards(&[]).unwrap();
        let summary = launcher.run(&boards).await;

        let order: Vec<_> = summary.boards.iter().map(|b| b.board.as_str()).collect();
        assert_eq!(order, vec!["a-board", "b-board", "c-board"]);
        assert_eq!(summary.dispatched(), 3);
    }

    #[tokio::test]
    async fn test_board_without_tests_is_noop() {
        let (a, a_calls) = crawler("a", kernel_for);
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![("rpi3", BoardPlan::default())]),
            Status::default(),
            Rootfs::default(),
            vec![a],
            recorder.clone(),
        );

        let summary = launcher.run(&["rpi3".to_string()]).await;

        assert_eq!(summary.boards[0].outcome, BoardOutcome::Processed(Vec::new()));
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_select_boards() {
        let recorder = Arc::new(Recorder::default());
        let launcher = launcher(
            plan(vec![
                ("rpi3", boot_plan(vec![mainline()])),
                ("bbb", boot_plan(vec![mainline()])),
            ]),
            Status::default(),
            Rootfs::default(),
            Vec::new(),
            recorder,
        );

        assert_eq!(launcher.select_boards(&[]).unwrap(), vec!["bbb", "rpi3"]);
        assert_eq!(
            launcher
                .select_boards(&["rpi3".to_string(), "bbb".to_string(), "rpi3".to_string()])
                .unwrap(),
            vec!["rpi3", "bbb"]
        );
        assert!(launcher.select_boards(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_from_config_output_dir_forces_file_backend() {
        let config = crate::config::load_config_str(
            r#"
            [dispatch]
            type = "lava"
            server = "https://lava.example.org"
            username = "ci"
            token = "secret"
            web_ui_address = "https://lava.example.org"
            "#,
        )
        .unwrap();

        let launcher =
            Launcher::from_config(&config, TestPlan::default(), Some(Path::new("/tmp/jobs")))
                .unwrap();
        assert_eq!(launcher.dispatcher.name(), "file");

        let launcher = Launcher::from_config(&config, TestPlan::default(), None).unwrap();
        assert_eq!(launcher.dispatcher.name(), "lava");
    }
}
