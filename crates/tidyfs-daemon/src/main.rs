//! tidyfsd - the tidyfs background daemon
//!
//! Watches the configured directories and applies rules as files change.
//! Control it with `tidyfs status|reload|enable|disable` over the local
//! socket, or run it under systemd as a Type=notify service.

use std::path::PathBuf;

use clap::Parser;
use tidyfs_core::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tidyfsd", version, about = "tidyfs background daemon")]
struct Args {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);

    // The configured level applies unless RUST_LOG overrides it; read it
    // leniently here since load_config re-validates with real errors.
    let level = Config::load(&config_path)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    tidyfs_daemon::run_daemon(config_path).await
}
