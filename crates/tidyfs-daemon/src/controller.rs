//! The controller event loop
//!
//! One task owns every piece of mutable daemon state: the watch manager,
//! the scheduler's timers, the rule runners, and the recreated-roots
//! queue. Everything arrives over channels and is handled in priority
//! order:
//!
//! 1. ready rule executions (drained completely first),
//! 2. cancellation,
//! 3. raw filesystem events,
//! 4. watcher errors,
//! 5. fired create-debounce timers,
//! 6. recreated-root signals,
//! 7. newly ready rule executions.
//!
//! The up-front drain is load-bearing: when two rules share a location
//! their timers fire nearly together, and an event processed between the
//! two executions could reset a timer for a rule that is already queued,
//! losing its trigger. Draining first guarantees queued work completes
//! before any new signal touches the timers.
//!
//! Rule execution deliberately blocks the loop: rules run to completion
//! before further events are processed, which keeps executions serialized
//! and makes the cooldown gate meaningful.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tidyfs_core::config::Config;
use tidyfs_core::state::StateStore;
use tidyfs_engine::{LogReporter, RuleRunner};
use tidyfs_fs::{OsFs, Vfs};
use tidyfs_ipc::protocol::{RuleStatus, StatusReport};
use tidyfs_watch::{FsEvent, NotifySource, WatchManager};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::Scheduler;

/// Control-plane request, forwarded from the IPC server with a reply slot.
pub enum ControlRequest {
    Status(oneshot::Sender<StatusReport>),
    Reload(oneshot::Sender<std::result::Result<String, String>>),
    Enable(oneshot::Sender<std::result::Result<String, String>>),
    Disable(oneshot::Sender<std::result::Result<String, String>>),
}

/// What woke the controller loop up.
enum Wake {
    Cancelled,
    Event(FsEvent),
    WatcherError(String),
    Debounced(PathBuf),
    Recreated,
    RunReady(String),
    Control(ControlRequest),
}

/// Owns the daemon's moving parts and drives the event loop.
pub struct Controller {
    config_path: PathBuf,
    config: Config,
    fs: Arc<dyn Vfs>,
    state: Arc<StateStore>,
    runners: Vec<RuleRunner>,
    scheduler: Scheduler,
    manager: Option<WatchManager>,
    run_tx: mpsc::UnboundedSender<String>,
    run_rx: mpsc::UnboundedReceiver<String>,
    control_rx: mpsc::Receiver<ControlRequest>,
    event_rx: mpsc::Receiver<FsEvent>,
    error_rx: mpsc::Receiver<String>,
    debounce_rx: mpsc::Receiver<PathBuf>,
    recreated_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl Controller {
    /// Builds a controller. Watching starts inside [`Controller::run`];
    /// the returned sender feeds control requests into the loop.
    pub fn new(
        config_path: PathBuf,
        config: Config,
        state: Arc<StateStore>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Sender<ControlRequest>) {
        let (run_tx, run_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(8);

        let runners = config.rules.iter().cloned().map(RuleRunner::new).collect();
        let scheduler = Scheduler::new(config.daemon.debounce, run_tx.clone());

        // Watcher channels start closed; start_watcher replaces them.
        let (_, event_rx) = mpsc::channel(1);
        let (_, error_rx) = mpsc::channel(1);
        let (_, debounce_rx) = mpsc::channel(1);
        let (_, recreated_rx) = mpsc::channel(1);

        let controller = Self {
            config_path,
            config,
            fs: Arc::new(OsFs::new()),
            state,
            runners,
            scheduler,
            manager: None,
            run_tx,
            run_rx,
            control_rx,
            event_rx,
            error_rx,
            debounce_rx,
            recreated_rx,
            cancel,
        };
        (controller, control_tx)
    }

    /// Runs until cancelled. Failure to create the initial watcher is
    /// fatal; everything after that is handled in-loop.
    pub async fn run(&mut self) -> Result<()> {
        self.start_watcher().context("initial watcher setup")?;
        info!(rules = self.runners.len(), "Controller started");

        loop {
            // Drain discipline: every ready rule executes before any
            // other signal is looked at.
            while let Ok(name) = self.run_rx.try_recv() {
                self.execute_rule(&name);
            }

            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                Some(event) = self.event_rx.recv() => Wake::Event(event),
                Some(err) = self.error_rx.recv() => Wake::WatcherError(err),
                Some(path) = self.debounce_rx.recv() => Wake::Debounced(path),
                Some(()) = self.recreated_rx.recv() => Wake::Recreated,
                Some(name) = self.run_rx.recv() => Wake::RunReady(name),
                Some(request) = self.control_rx.recv() => Wake::Control(request),
            };

            match wake {
                Wake::Cancelled => break,
                Wake::Event(event) => {
                    if let Some(manager) = self.manager.as_mut() {
                        manager.process_event(&event);
                    }
                    self.route_signal(&event.path, event.at);
                }
                Wake::WatcherError(err) => {
                    warn!(error = %err, "Filesystem watcher reported an error");
                }
                Wake::Debounced(path) => {
                    if let Some(manager) = self.manager.as_mut() {
                        manager.evaluate_debounced(&path);
                    }
                }
                Wake::Recreated => {
                    let recreated = self
                        .manager
                        .as_mut()
                        .map(|m| m.take_recreated())
                        .unwrap_or_default();
                    for root in recreated {
                        info!(path = %root.path.display(), "Watch root recreated");
                        self.route_signal(&root.path, root.at);
                    }
                }
                Wake::RunReady(name) => self.execute_rule(&name),
                Wake::Control(request) => self.handle_control(request),
            }
        }

        self.stop_watcher();
        info!("Controller stopped");
        Ok(())
    }

    // ========================================================================
    // Watcher lifecycle
    // ========================================================================

    fn start_watcher(&mut self) -> Result<()> {
        let (source, event_rx, error_rx) = NotifySource::new()?;
        let (debounce_tx, debounce_rx) = mpsc::channel(64);
        let (recreated_tx, recreated_rx) = mpsc::channel(1);

        let mut manager = WatchManager::new(
            Box::new(source),
            self.config.daemon.debounce,
            debounce_tx,
            recreated_tx,
        );

        // One add_root call per distinct location; recursive wins when
        // rules disagree.
        let mut roots: std::collections::BTreeMap<PathBuf, bool> = Default::default();
        for rule in self.config.rules.iter().filter(|r| r.enabled) {
            for location in &rule.locations {
                let recursive = roots.entry(location.clone()).or_insert(false);
                *recursive = *recursive || rule.recursive;
            }
        }
        for (path, recursive) in roots {
            manager.add_root(&path, recursive);
        }

        info!(watches = manager.watch_count(), "Watcher started");
        self.event_rx = event_rx;
        self.error_rx = error_rx;
        self.debounce_rx = debounce_rx;
        self.recreated_rx = recreated_rx;
        self.manager = Some(manager);
        Ok(())
    }

    fn stop_watcher(&mut self) {
        self.scheduler.stop();
        if let Some(mut manager) = self.manager.take() {
            manager.destroy();
        }
    }

    // ========================================================================
    // Signal routing & execution
    // ========================================================================

    fn route_signal(&mut self, path: &Path, at: SystemTime) {
        for runner in &self.runners {
            self.scheduler.route(runner.rule(), runner.last_completed(), path, at);
        }
    }

    fn execute_rule(&mut self, name: &str) {
        let Some(runner) = self.runners.iter_mut().find(|r| r.rule().name == name) else {
            debug!(rule = name, "Queued rule no longer configured");
            return;
        };

        let mut reporter = LogReporter;
        let stats = runner.execute(self.fs.as_ref(), &mut reporter);

        if let Err(err) = self.state.update_rule_stats(
            name,
            stats.started_at,
            stats.duration,
            stats.files_processed,
            stats.error_count,
        ) {
            warn!(rule = name, error = %format!("{err:#}"), "Cannot persist rule stats");
        }
    }

    // ========================================================================
    // Control plane
    // ========================================================================

    fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Status(reply) => {
                let _ = reply.send(self.status_report());
            }
            ControlRequest::Reload(reply) => {
                let _ = reply.send(self.reload());
            }
            ControlRequest::Enable(reply) => {
                let result = if self.manager.is_some() {
                    Ok("already watching".to_string())
                } else {
                    self.start_watcher()
                        .map(|_| "watching enabled".to_string())
                        .map_err(|err| format!("{err:#}"))
                };
                let _ = reply.send(result);
            }
            ControlRequest::Disable(reply) => {
                let result = if self.manager.is_none() {
                    Ok("already stopped".to_string())
                } else {
                    self.stop_watcher();
                    info!("Watching disabled by request");
                    Ok("watching disabled".to_string())
                };
                let _ = reply.send(result);
            }
        }
    }

    fn reload(&mut self) -> std::result::Result<String, String> {
        let config = Config::load(&self.config_path).map_err(|err| err.to_string())?;
        let problems = config.validate();
        if !problems.is_empty() {
            let joined =
                problems.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            return Err(format!("configuration invalid: {joined}"));
        }

        let was_watching = self.manager.is_some();
        self.stop_watcher();

        // Rules are replaced wholesale; runner state does not survive a
        // reload.
        self.config = config;
        self.runners = self.config.rules.iter().cloned().map(RuleRunner::new).collect();
        self.scheduler = Scheduler::new(self.config.daemon.debounce, self.run_tx.clone());

        if was_watching {
            self.start_watcher().map_err(|err| format!("{err:#}"))?;
        }
        info!(rules = self.runners.len(), "Configuration reloaded");
        Ok(format!("reloaded {} rules", self.runners.len()))
    }

    fn status_report(&self) -> StatusReport {
        StatusReport {
            config_path: self.config_path.clone(),
            enabled: self.manager.is_some(),
            watch_count: self.manager.as_ref().map(|m| m.watch_count()).unwrap_or(0),
            rules: self
                .runners
                .iter()
                .map(|runner| {
                    let name = runner.rule().name.clone();
                    let stats = self.state.get(&name);
                    (name, RuleStatus { enabled: runner.rule().enabled, stats })
                })
                .collect(),
        }
    }
}
