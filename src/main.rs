//! lablaunch CLI - kernel CI job launcher.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use lablaunch::board::BoardRegistry;
use lablaunch::config::{self, Config};
use lablaunch::crawler::ArtifactResolver;
use lablaunch::launcher::Launcher;
use lablaunch::plan::{self, resolve_configs};
use lablaunch::report;

#[derive(Parser)]
#[command(name = "lablaunch")]
#[command(about = "Kernel CI job launcher for board labs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "lablaunch.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known boards
    List,

    /// Build and dispatch jobs
    Run {
        /// Boards to process (default: every board in the test plan)
        boards: Vec<String>,

        /// Override the number of boards processed concurrently
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Write job files to this directory instead of dispatching
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Validate configuration and test plan
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = config::load_config(&cli.config);
    let color = loaded
        .as_ref()
        .map(|c| c.launcher.color)
        .unwrap_or_default();
    report::init_logging(cli.verbose, color)?;

    let config = loaded
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::List => list_boards(&config),
        Commands::Run {
            boards,
            parallel,
            output_dir,
        } => run_jobs(config, &boards, parallel, output_dir.as_deref()).await,
        Commands::Validate => validate(&config),
    }
}

fn list_boards(config: &Config) -> Result<()> {
    let registry = BoardRegistry::from_config(&config.boards).context("Invalid board registry")?;
    for id in registry.ids() {
        println!("{}", id);
    }
    Ok(())
}

async fn run_jobs(
    mut config: Config,
    boards: &[String],
    parallel_override: Option<usize>,
    output_dir: Option<&Path>,
) -> Result<()> {
    if let Some(parallel) = parallel_override {
        config.launcher.max_parallel = parallel;
    }

    let plan = plan::load_plan(&config.launcher.plan)?;
    info!("Loaded test plan from {}", config.launcher.plan.display());

    let launcher = Launcher::from_config(&config, plan, output_dir)?;
    let boards = launcher.select_boards(boards)?;

    let summary = launcher.run(&boards).await;
    report::print_summary(&summary);

    if !summary.success() {
        std::process::exit(summary.exit_code());
    }
    Ok(())
}

/// Checks everything that can go wrong before talking to the lab.
fn validate(config: &Config) -> Result<()> {
    let registry = BoardRegistry::from_config(&config.boards).context("Invalid board registry")?;
    let plan = plan::load_plan(&config.launcher.plan)?;
    let resolver = ArtifactResolver::from_config(&config.crawlers)?;

    let mut errors = 0;
    for (board, board_plan) in plan.iter() {
        if !registry.contains(board) {
            warn!("Board {} is planned but not in the registry", board);
        }
        for test in &board_plan.tests {
            if let Err(e) =
                resolve_configs(test, &board_plan.configs, config.launcher.exclusion_policy)
            {
                error!("{}: {}", board, e);
                errors += 1;
            }
        }
    }

    if resolver.is_empty() {
        warn!("No crawlers configured");
    }

    if errors > 0 {
        eprintln!("Test plan has {} error(s)", errors);
        std::process::exit(1);
    }

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Boards: {}", registry.len());
    println!("  Planned boards: {}", plan.board_ids().count());
    println!("  Max parallel: {}", config.launcher.max_parallel);
    println!(
        "  Crawlers: {}",
        resolver.crawler_names().collect::<Vec<_>>().join(", ")
    );
    let dispatch = match &config.dispatch {
        config::DispatchConfig::File(_) => "file",
        config::DispatchConfig::Lava(_) => "lava",
    };
    println!("  Dispatch: {}", dispatch);

    Ok(())
}
