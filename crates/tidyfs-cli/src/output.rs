//! Human-readable console output
//!
//! The daemon reports through `tracing`; the CLI turns status snapshots
//! and dry-run traces into something readable at a terminal.

use tidyfs_core::rule::ExecutionStats;
use tidyfs_engine::report::{ActionOutcome, ReportEvent};
use tidyfs_ipc::StatusReport;

pub fn print_status(report: &StatusReport) {
    println!("config:   {}", report.config_path.display());
    println!("watching: {}", if report.enabled { "yes" } else { "no (disabled)" });
    println!("watches:  {}", report.watch_count);

    if report.rules.is_empty() {
        println!("rules:    none configured");
        return;
    }
    println!("rules:");
    for (name, rule) in &report.rules {
        let state = if rule.enabled { "enabled" } else { "disabled" };
        match &rule.stats {
            Some(stats) => {
                println!(
                    "  {name} [{state}] last run {} ({} files, {} errors, {} ms)",
                    stats.last_run_at.format("%Y-%m-%d %H:%M:%S"),
                    stats.files_processed,
                    stats.error_count,
                    stats.last_duration / 1_000_000,
                );
            }
            None => println!("  {name} [{state}] never run"),
        }
    }
}

pub fn print_run_summary(rule: &str, stats: &ExecutionStats, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    println!(
        "{prefix}{rule}: {} files processed, {} errors in {} ms",
        stats.files_processed,
        stats.error_count,
        stats.duration.as_millis(),
    );
}

/// Renders a recorded execution trace, indenting per-file detail.
pub fn print_trace(events: &[ReportEvent]) {
    let mut matched_current = false;
    for event in events {
        match event {
            ReportEvent::StartFile(path) => {
                matched_current = false;
                println!("  {}", path.display());
            }
            ReportEvent::Filter { name, matched } => {
                println!("    filter {name}: {}", if *matched { "match" } else { "no match" });
            }
            ReportEvent::PopOperator { name, matched } => {
                println!("    {name}: {}", if *matched { "match" } else { "no match" });
            }
            ReportEvent::FiltersPassed => matched_current = true,
            ReportEvent::Action { name, outcome } => {
                let detail = match outcome {
                    ActionOutcome::PathChanged(to) => format!("-> {}", to.display()),
                    ActionOutcome::Deleted => "deleted".to_string(),
                    ActionOutcome::Conflict => "skipped (destination exists)".to_string(),
                    ActionOutcome::NoChange => "ok".to_string(),
                    ActionOutcome::Failed(err) => format!("FAILED: {err}"),
                };
                println!("    {name} {detail}");
            }
            ReportEvent::EndFile(_) if matched_current => println!(),
            _ => {}
        }
    }
}
