//! tidyfs daemon internals
//!
//! The `tidyfsd` binary (and the CLI's `daemon` subcommand) wire four
//! pieces together:
//!
//! ```text
//! NotifySource ──events──→ Controller ←──requests── IpcServer
//!                              │
//!                    WatchManager + Scheduler + RuleRunners
//! ```
//!
//! [`run_daemon`] performs the full startup sequence: materialize a
//! starter config on first run, load and validate, bind the control
//! socket, install signal handlers, notify readiness, and drive the
//! controller until shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tidyfs_core::config::Config;
use tidyfs_core::state::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod controller;
pub mod ipc;
pub mod readiness;
pub mod scheduler;

pub use controller::{ControlRequest, Controller};
pub use ipc::IpcServer;

/// Loads the configuration, refusing to start on any validation error.
pub fn load_config(config_path: &Path) -> Result<Config> {
    if let Err(err) = Config::write_default(config_path) {
        warn!(error = %format!("{err:#}"), "Cannot materialize starter configuration");
    }
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let problems = config.validate();
    if !problems.is_empty() {
        let joined = problems.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  ");
        bail!("configuration invalid:\n  {joined}");
    }
    Ok(config)
}

/// Runs the daemon in the foreground until SIGINT/SIGTERM.
pub async fn run_daemon(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let socket_path = config.daemon.socket.clone().unwrap_or_else(tidyfs_ipc::socket_path);
    let state = Arc::new(StateStore::load(StateStore::default_path()));
    let cancel = CancellationToken::new();

    let (mut controller, control_tx) =
        Controller::new(config_path, config, state, cancel.clone());
    let ipc = IpcServer::bind(socket_path, control_tx, cancel.clone())?;
    let ipc_task = tokio::spawn(ipc.run());

    spawn_signal_handler(cancel.clone());
    readiness::notify_ready();

    let result = controller.run().await;

    readiness::notify_stopping();
    cancel.cancel();
    let _ = ipc_task.await;
    result
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Cannot install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutdown signal received");
        cancel.cancel();
    });
}
