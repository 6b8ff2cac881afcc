//! Execution reporting contract
//!
//! A [`Reporter`] receives the full trace of a rule execution: rule and
//! file frames, every filter verdict, operator frames for `any`/`not`
//! groups, and per-action outcomes. Three implementations:
//!
//! - [`NullReporter`] discards everything. It is also the signal that the
//!   filter engine may short-circuit: with any other reporter every
//!   subexpression is evaluated so the trace is complete.
//! - [`LogReporter`] forwards to `tracing`.
//! - [`RecordingReporter`] captures events for tests and dry-run output.

use std::path::{Path, PathBuf};

use tidyfs_core::rule::ExecutionStats;
use tracing::{debug, info};

/// Outcome of one action against one file, as reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The file now lives at this path (move/rename/copy).
    PathChanged(PathBuf),
    Deleted,
    /// Conflict with `skip` mode; the chain stopped.
    Conflict,
    /// Nothing to do (no-op move, log action).
    NoChange,
    Failed(String),
}

/// Receiver for execution traces. Frames nest:
/// `start_rule { start_file { record_filter*, push/pop_operator*,
/// mark_filters_passed?, report_action* } end_file }* end_rule`.
pub trait Reporter {
    fn start_rule(&mut self, rule: &str);
    fn end_rule(&mut self, rule: &str, stats: &ExecutionStats);
    fn start_file(&mut self, path: &Path);
    fn end_file(&mut self, path: &Path);

    /// One leaf filter verdict. `detail` is a human-readable note such as
    /// the observed size or MIME type.
    fn record_filter(&mut self, name: &str, matched: bool, detail: &str);

    /// Opens an operator frame (`any` / `not`). Frames may nest.
    fn push_operator(&mut self, name: &str);

    /// Closes an operator frame with its combined verdict.
    fn pop_operator(&mut self, name: &str, matched: bool);

    /// The file passed all filters; actions follow.
    fn mark_filters_passed(&mut self);

    fn report_action(&mut self, name: &str, outcome: &ActionOutcome);

    /// True only for the null reporter; enables short-circuit evaluation.
    fn is_null(&self) -> bool {
        false
    }
}

// ============================================================================
// NullReporter
// ============================================================================

/// Discards all events and unlocks filter short-circuiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn start_rule(&mut self, _rule: &str) {}
    fn end_rule(&mut self, _rule: &str, _stats: &ExecutionStats) {}
    fn start_file(&mut self, _path: &Path) {}
    fn end_file(&mut self, _path: &Path) {}
    fn record_filter(&mut self, _name: &str, _matched: bool, _detail: &str) {}
    fn push_operator(&mut self, _name: &str) {}
    fn pop_operator(&mut self, _name: &str, _matched: bool) {}
    fn mark_filters_passed(&mut self) {}
    fn report_action(&mut self, _name: &str, _outcome: &ActionOutcome) {}

    fn is_null(&self) -> bool {
        true
    }
}

// ============================================================================
// LogReporter
// ============================================================================

/// Forwards the trace to `tracing`: file-level outcomes at info, filter
/// details at debug.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn start_rule(&mut self, rule: &str) {
        info!(rule, "Rule execution started");
    }

    fn end_rule(&mut self, rule: &str, stats: &ExecutionStats) {
        info!(
            rule,
            files_processed = stats.files_processed,
            errors = stats.error_count,
            duration_ms = stats.duration.as_millis() as u64,
            "Rule execution finished"
        );
    }

    fn start_file(&mut self, path: &Path) {
        debug!(path = %path.display(), "Evaluating");
    }

    fn end_file(&mut self, _path: &Path) {}

    fn record_filter(&mut self, name: &str, matched: bool, detail: &str) {
        debug!(filter = name, matched, detail, "Filter evaluated");
    }

    fn push_operator(&mut self, name: &str) {
        debug!(operator = name, "Entering operator group");
    }

    fn pop_operator(&mut self, name: &str, matched: bool) {
        debug!(operator = name, matched, "Leaving operator group");
    }

    fn mark_filters_passed(&mut self) {}

    fn report_action(&mut self, name: &str, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::PathChanged(to) => {
                info!(action = name, to = %to.display(), "Action applied")
            }
            ActionOutcome::Deleted => info!(action = name, "File removed"),
            ActionOutcome::Conflict => info!(action = name, "Skipped: destination exists"),
            ActionOutcome::NoChange => debug!(action = name, "Action applied (no path change)"),
            ActionOutcome::Failed(err) => info!(action = name, error = %err, "Action failed"),
        }
    }
}

// ============================================================================
// RecordingReporter
// ============================================================================

/// One captured reporter event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    StartRule(String),
    EndRule(String),
    StartFile(PathBuf),
    EndFile(PathBuf),
    Filter { name: String, matched: bool },
    PushOperator(String),
    PopOperator { name: String, matched: bool },
    FiltersPassed,
    Action { name: String, outcome: ActionOutcome },
}

/// Captures the full event stream; used by tests and dry-run output.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub events: Vec<ReportEvent>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for assertions: all filter verdicts in order.
    pub fn filter_verdicts(&self) -> Vec<(&str, bool)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Filter { name, matched } => Some((name.as_str(), *matched)),
                _ => None,
            })
            .collect()
    }

    /// Convenience for assertions: all action outcomes in order.
    pub fn actions(&self) -> Vec<(&str, &ActionOutcome)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Action { name, outcome } => Some((name.as_str(), outcome)),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn start_rule(&mut self, rule: &str) {
        self.events.push(ReportEvent::StartRule(rule.to_string()));
    }

    fn end_rule(&mut self, rule: &str, _stats: &ExecutionStats) {
        self.events.push(ReportEvent::EndRule(rule.to_string()));
    }

    fn start_file(&mut self, path: &Path) {
        self.events.push(ReportEvent::StartFile(path.to_path_buf()));
    }

    fn end_file(&mut self, path: &Path) {
        self.events.push(ReportEvent::EndFile(path.to_path_buf()));
    }

    fn record_filter(&mut self, name: &str, matched: bool, _detail: &str) {
        self.events.push(ReportEvent::Filter { name: name.to_string(), matched });
    }

    fn push_operator(&mut self, name: &str) {
        self.events.push(ReportEvent::PushOperator(name.to_string()));
    }

    fn pop_operator(&mut self, name: &str, matched: bool) {
        self.events.push(ReportEvent::PopOperator { name: name.to_string(), matched });
    }

    fn mark_filters_passed(&mut self) {
        self.events.push(ReportEvent::FiltersPassed);
    }

    fn report_action(&mut self, name: &str, outcome: &ActionOutcome) {
        self.events.push(ReportEvent::Action { name: name.to_string(), outcome: outcome.clone() });
    }
}
