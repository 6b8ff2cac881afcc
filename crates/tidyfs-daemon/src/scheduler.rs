//! Rule scheduling: debounce and cooldown
//!
//! Every "path touched" signal is routed to the rules whose locations
//! cover the path. A covered rule's single-shot debounce timer is reset;
//! when it fires, the rule's name lands on the execution queue. Two gates
//! protect against feedback:
//!
//! - **Cooldown**: signals timestamped within one second of a rule's last
//!   completed execution are assumed to be echoes of that rule's own
//!   filesystem effects and are dropped.
//! - **Drain** (enforced by the controller loop): every queued execution
//!   completes before the next external signal can reset a timer.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tidyfs_core::rule::Rule;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Post-execution window during which a rule ignores new signals.
pub const COOLDOWN: Duration = Duration::from_secs(1);

/// Per-rule debounce timers feeding the execution queue.
pub struct Scheduler {
    debounce: Duration,
    timers: HashMap<String, JoinHandle<()>>,
    run_tx: mpsc::UnboundedSender<String>,
    done: CancellationToken,
}

impl Scheduler {
    pub fn new(debounce: Duration, run_tx: mpsc::UnboundedSender<String>) -> Self {
        Self { debounce, timers: HashMap::new(), run_tx, done: CancellationToken::new() }
    }

    /// Whether a rule's locations cover `path`: exact match always; direct
    /// children for non-recursive rules; any descendant for recursive ones.
    pub fn covers(rule: &Rule, path: &Path) -> bool {
        rule.locations.iter().any(|location| {
            if path == location {
                return true;
            }
            if path.parent() == Some(location.as_path()) {
                return true;
            }
            rule.recursive && path.starts_with(location)
        })
    }

    /// Routes one signal to one rule, resetting its debounce timer when
    /// the rule covers the path and the cooldown gate passes.
    pub fn route(
        &mut self,
        rule: &Rule,
        last_completed: Option<SystemTime>,
        path: &Path,
        at: SystemTime,
    ) {
        if !rule.enabled || !Self::covers(rule, path) {
            return;
        }

        if let Some(completed) = last_completed {
            if at < completed + COOLDOWN {
                debug!(
                    rule = %rule.name,
                    path = %path.display(),
                    "Signal within cooldown, dropping"
                );
                return;
            }
        }

        debug!(rule = %rule.name, path = %path.display(), "Resetting rule debounce");
        self.reset_timer(&rule.name);
    }

    fn reset_timer(&mut self, rule: &str) {
        if let Some(old) = self.timers.remove(rule) {
            old.abort();
        }
        let delay = self.debounce;
        let tx = self.run_tx.clone();
        let done = self.done.clone();
        let name = rule.to_string();
        self.timers.insert(
            rule.to_string(),
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if done.is_cancelled() {
                    return;
                }
                let _ = tx.send(name);
            }),
        );
    }

    /// Stops all pending timers. Used on reload, disable and shutdown.
    pub fn stop(&mut self) {
        self.done.cancel();
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.done = CancellationToken::new();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
