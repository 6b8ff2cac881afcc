//! tidyfs - declarative file organizing
//!
//! `tidyfs daemon` watches the configured directories and applies rules
//! as files change; `tidyfs run` applies them once and exits. The
//! remaining subcommands talk to a running daemon over its control
//! socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tidyfs_core::config::Config;
use tidyfs_engine::report::RecordingReporter;
use tidyfs_engine::{LogReporter, RuleRunner};
use tidyfs_fs::{DryRunFs, OsFs, Vfs};
use tidyfs_ipc::{Request, Response};
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser)]
#[command(name = "tidyfs", version, about = "Watch directories and tidy files by rule")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the daemon control socket.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground.
    Daemon,
    /// Execute all enabled rules once, without watching.
    Run {
        /// Evaluate rules against a copy-on-write view; touch nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the daemon's status.
    Status,
    /// Ask the daemon to re-read its configuration.
    Reload,
    /// Resume watching after a disable.
    Enable,
    /// Stop watching; the daemon stays reachable.
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    init_tracing(&config_path, matches!(cli.command, Commands::Daemon));

    match &cli.command {
        Commands::Daemon => tidyfs_daemon::run_daemon(config_path).await,
        Commands::Run { dry_run } => run_once(&config_path, *dry_run),
        Commands::Status => control(&cli, &config_path, Request::Status).await,
        Commands::Reload => control(&cli, &config_path, Request::Reload).await,
        Commands::Enable => control(&cli, &config_path, Request::Enable).await,
        Commands::Disable => control(&cli, &config_path, Request::Disable).await,
    }
}

fn init_tracing(config_path: &Path, daemon: bool) {
    // The daemon logs at the configured level; one-shot commands keep
    // quiet unless RUST_LOG says otherwise.
    let default_level = if daemon {
        Config::load(config_path).map(|c| c.logging.level).unwrap_or_else(|_| "warn".into())
    } else {
        "warn".to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// One-shot execution of every enabled rule, optionally against a
/// copy-on-write view of the filesystem.
fn run_once(config_path: &Path, dry_run: bool) -> Result<()> {
    let config = tidyfs_daemon::load_config(config_path)?;
    if config.rules.is_empty() {
        println!("no rules configured in {}", config_path.display());
        return Ok(());
    }

    let fs: Arc<dyn Vfs> = if dry_run {
        Arc::new(DryRunFs::new(Arc::new(OsFs::new())))
    } else {
        Arc::new(OsFs::new())
    };

    for rule in &config.rules {
        if !rule.enabled {
            continue;
        }
        let name = rule.name.clone();
        let mut runner = RuleRunner::new(rule.clone());

        let stats = if dry_run {
            let mut recorder = RecordingReporter::new();
            let stats = runner.execute(fs.as_ref(), &mut recorder);
            println!("{name}:");
            output::print_trace(&recorder.events);
            stats
        } else {
            let mut reporter = LogReporter;
            runner.execute(fs.as_ref(), &mut reporter)
        };
        output::print_run_summary(&name, &stats, dry_run);
    }
    Ok(())
}

/// Sends one control request to the daemon and renders the reply.
async fn control(cli: &Cli, config_path: &Path, request: Request) -> Result<()> {
    let socket = match &cli.socket {
        Some(path) => path.clone(),
        None => Config::load(config_path)
            .ok()
            .and_then(|c| c.daemon.socket)
            .unwrap_or_else(tidyfs_ipc::socket_path),
    };

    let response = tidyfs_ipc::request(&socket, &request)
        .await
        .with_context(|| "is the daemon running?".to_string())?;

    match response {
        Response::Status(report) => output::print_status(&report),
        Response::Ok { message } => println!("{message}"),
        Response::Error { message } => bail!("daemon error: {message}"),
    }
    Ok(())
}
