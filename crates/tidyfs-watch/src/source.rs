//! Event source abstraction
//!
//! The watch manager talks to the OS watch primitive through the
//! [`EventSource`] trait: add a path, remove a path. Raw events arrive
//! separately, timestamped at ingress, on a bounded channel - the
//! [`NotifySource`] wires the `notify` crate's callback to that channel,
//! the [`MockSource`] lets tests inspect add/remove calls and inject
//! events directly.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the raw-event channel. Bursts larger than this apply
/// backpressure to the notify callback thread.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// The event kinds the watch table cares about. Everything is
/// single-path: a native rename surfaces as Rename (old path) plus
/// Create (new path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

/// A raw filesystem event, timestamped when it left the OS primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
    pub at: SystemTime,
}

/// Minimal interface over the OS watch primitive. All watches are
/// non-recursive: subtree coverage is the watch manager's job.
pub trait EventSource: Send {
    fn add(&mut self, path: &Path) -> Result<()>;
    fn remove(&mut self, path: &Path) -> Result<()>;
}

// ============================================================================
// NotifySource
// ============================================================================

/// [`EventSource`] backed by the `notify` crate.
pub struct NotifySource {
    watcher: RecommendedWatcher,
}

impl NotifySource {
    /// Creates the watcher and the channels raw events and watcher errors
    /// arrive on. Failure here is fatal for the daemon.
    pub fn new() -> Result<(Self, mpsc::Receiver<FsEvent>, mpsc::Receiver<String>)> {
        let (event_tx, event_rx) = mpsc::channel::<FsEvent>(EVENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel::<String>(16);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let at = SystemTime::now();
                    for mapped in map_notify_event(&event, at) {
                        if event_tx.blocking_send(mapped).is_err() {
                            // Receiver gone; the daemon is shutting down.
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = error_tx.blocking_send(err.to_string());
                }
            },
            notify::Config::default(),
        )
        .context("creating filesystem watcher")?;

        Ok((Self { watcher }, event_rx, error_rx))
    }
}

impl EventSource for NotifySource {
    fn add(&mut self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "Installing native watch");
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", path.display()))
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "Releasing native watch");
        self.watcher
            .unwatch(path)
            .with_context(|| format!("unwatching {}", path.display()))
    }
}

/// Flattens a `notify::Event` into our single-path event kinds.
///
/// - `Create(*)` -> Create per path
/// - `Remove(*)` -> Remove per path
/// - `Modify(Name(From))` -> Rename (the old path is gone)
/// - `Modify(Name(To))` -> Create (a path appeared)
/// - `Modify(Name(Both))` -> Rename for the old path, Create for the new
/// - `Modify(Name(Any))` -> Rename (platform could not tell us more)
/// - `Modify(Metadata(*))` -> Chmod
/// - other `Modify(*)` -> Write
/// - Access and the rest are dropped
fn map_notify_event(event: &notify::Event, at: SystemTime) -> Vec<FsEvent> {
    let mk = |path: &PathBuf, kind| FsEvent { path: path.clone(), kind, at };

    match &event.kind {
        EventKind::Create(_) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Create)).collect()
        }
        EventKind::Remove(_) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Remove)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Rename)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Create)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(old) = event.paths.first() {
                out.push(mk(old, FsEventKind::Rename));
            }
            if let Some(new) = event.paths.get(1) {
                out.push(mk(new, FsEventKind::Create));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Rename)).collect()
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Chmod)).collect()
        }
        EventKind::Modify(_) => {
            event.paths.iter().map(|p| mk(p, FsEventKind::Write)).collect()
        }
        other => {
            debug!(kind = ?other, "Ignoring event kind");
            Vec::new()
        }
    }
}

// ============================================================================
// MockSource
// ============================================================================

#[derive(Debug, Default)]
struct MockState {
    active: Vec<PathBuf>,
    add_history: Vec<PathBuf>,
    remove_history: Vec<PathBuf>,
    fail_adds: Vec<PathBuf>,
}

/// Recording [`EventSource`] for tests. The cloneable handle inspects the
/// calls the watch manager made.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths with a currently installed (not yet removed) watch.
    pub fn active(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().active.clone()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.state.lock().unwrap().active.iter().any(|p| p == path)
    }

    /// Every `add` call ever made, in order.
    pub fn add_history(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().add_history.clone()
    }

    pub fn remove_history(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().remove_history.clone()
    }

    /// Makes future `add` calls for `path` fail.
    pub fn fail_adds_for(&self, path: &Path) {
        self.state.lock().unwrap().fail_adds.push(path.to_path_buf());
    }
}

impl EventSource for MockSource {
    fn add(&mut self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.add_history.push(path.to_path_buf());
        if state.fail_adds.iter().any(|p| p == path) {
            anyhow::bail!("mock add failure for {}", path.display());
        }
        state.active.push(path.to_path_buf());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.remove_history.push(path.to_path_buf());
        match state.active.iter().position(|p| p == path) {
            Some(idx) => {
                state.active.remove(idx);
                Ok(())
            }
            None => {
                warn!(path = %path.display(), "Mock remove for path without a watch");
                anyhow::bail!("no watch installed on {}", path.display());
            }
        }
    }
}
