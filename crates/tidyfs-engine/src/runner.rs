//! Rule runner
//!
//! Executes one rule end to end: snapshot each location, traverse the
//! descendants in the rule's order, filter, run the action chain, and
//! collect [`ExecutionStats`]. Item-level errors never abort the rule;
//! a missing or non-directory location is warned about and skipped.

use std::path::Path;
use std::time::{Instant, SystemTime};

use chrono::Utc;
use tidyfs_core::errors::is_fs_error;
use tidyfs_core::rule::{ExecutionStats, Rule, Traversal};
use tidyfs_fs::Vfs;
use tracing::{debug, error, warn};

use crate::action;
use crate::filter;
use crate::report::Reporter;
use crate::snapshot::{self, SnapshotNode, Visit};

/// Owns one rule and its last-completion clock.
///
/// The completion time feeds the scheduler's cooldown gate: events
/// timestamped before `last_completed + cooldown` are assumed to be
/// echoes of this rule's own filesystem effects.
#[derive(Debug)]
pub struct RuleRunner {
    rule: Rule,
    last_completed: Option<SystemTime>,
}

impl RuleRunner {
    pub fn new(rule: Rule) -> Self {
        Self { rule, last_completed: None }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Wall-clock time the last execution finished; `None` before the
    /// first run.
    pub fn last_completed(&self) -> Option<SystemTime> {
        self.last_completed
    }

    /// Executes the rule once. Never fails: all errors are contained at
    /// item scope and surface in the stats.
    pub fn execute(&mut self, fs: &dyn Vfs, reporter: &mut dyn Reporter) -> ExecutionStats {
        let started_at = Utc::now();
        if !self.rule.enabled {
            debug!(rule = %self.rule.name, "Rule disabled, skipping");
            return ExecutionStats::zero(started_at);
        }

        let t0 = Instant::now();
        reporter.start_rule(&self.rule.name);

        let mut files_processed = 0u64;
        let mut error_count = 0u64;

        for location in self.rule.locations.clone() {
            match fs.stat(&location) {
                Err(err) => {
                    warn!(
                        rule = %self.rule.name,
                        location = %location.display(),
                        error = %err,
                        "Location missing, skipping"
                    );
                    continue;
                }
                Ok(meta) if !meta.is_dir => {
                    warn!(
                        rule = %self.rule.name,
                        location = %location.display(),
                        "Location is not a directory, skipping"
                    );
                    continue;
                }
                Ok(_) => {}
            }

            let tree = match snapshot::build_snapshot(fs, &location, self.rule.recursive) {
                Ok(tree) => tree,
                Err(err) => {
                    warn!(
                        rule = %self.rule.name,
                        location = %location.display(),
                        error = %err,
                        "Cannot snapshot location"
                    );
                    error_count += 1;
                    continue;
                }
            };

            // dirname(location) as parent path: visited paths are the
            // absolute paths of the snapshot entries.
            let parent = location.parent().unwrap_or_else(|| Path::new("/"));
            let mut visitor = |node: &SnapshotNode, path: &Path| {
                self.visit_item(node, path, fs, reporter, &mut files_processed, &mut error_count)
            };
            match self.rule.traversal {
                Traversal::DepthFirst => {
                    snapshot::traverse_children_dfs(&tree, parent, &mut visitor)
                }
                Traversal::BreadthFirst => {
                    snapshot::traverse_children_bfs(&tree, parent, &mut visitor)
                }
            }
        }

        let stats = ExecutionStats {
            started_at,
            duration: t0.elapsed(),
            files_processed,
            error_count,
        };
        self.last_completed = Some(SystemTime::now());
        reporter.end_rule(&self.rule.name, &stats);
        stats
    }

    /// Evaluates one snapshot item: filters, then the action chain.
    fn visit_item(
        &self,
        node: &SnapshotNode,
        path: &Path,
        fs: &dyn Vfs,
        reporter: &mut dyn Reporter,
        files_processed: &mut u64,
        error_count: &mut u64,
    ) -> Visit {
        reporter.start_file(path);

        match filter::evaluate_groups(&self.rule.filters, path, fs, reporter) {
            Ok(false) => {
                reporter.end_file(path);
                return Visit::proceed();
            }
            Ok(true) => {}
            Err(err) if is_fs_error(&err) => {
                warn!(
                    rule = %self.rule.name,
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "Filter evaluation hit a filesystem error"
                );
                reporter.end_file(path);
                *error_count += 1;
                return Visit::proceed();
            }
            Err(err) => {
                error!(
                    rule = %self.rule.name,
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "Filter evaluation failed"
                );
                reporter.end_file(path);
                *error_count += 1;
                return Visit::proceed();
            }
        }

        reporter.mark_filters_passed();

        let chain = match action::run_chain(&self.rule.actions, path, fs, reporter) {
            Ok(chain) => chain,
            Err(err) => {
                error!(
                    rule = %self.rule.name,
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "Action chain failed"
                );
                reporter.end_file(path);
                *error_count += 1;
                return Visit::proceed();
            }
        };

        if chain.attempted > 0 {
            *files_processed += 1;
        }
        if chain.errored {
            *error_count += 1;
        }
        reporter.end_file(path);

        if chain.deleted && node.is_dir {
            // The subtree no longer exists; descending would only produce
            // stale-path errors.
            return Visit::skip_children();
        }
        if node.is_dir && chain.final_path != path {
            return Visit::rerooted(chain.final_path);
        }
        Visit::proceed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullReporter;
    use std::path::PathBuf;
    use tidyfs_core::rule::{
        Action, ConflictMode, FilterExpression, FilterGroups, FilterLeaf, NameMatcher,
    };
    use tidyfs_fs::MemFs;

    fn move_rule(locations: Vec<&str>, filters: FilterGroups) -> Rule {
        Rule {
            name: "test-rule".into(),
            enabled: true,
            recursive: false,
            traversal: Traversal::DepthFirst,
            locations: locations.into_iter().map(PathBuf::from).collect(),
            filters,
            actions: vec![Action::Move {
                dest: "/dest".into(),
                on_conflict: ConflictMode::default(),
            }],
        }
    }

    fn not_filter(glob: &str) -> FilterGroups {
        FilterGroups(vec![FilterExpression {
            leaves: Vec::new(),
            any: Vec::new(),
            not: vec![FilterExpression {
                leaves: vec![FilterLeaf::Name(NameMatcher::Glob(glob.into()))],
                any: Vec::new(),
                not: Vec::new(),
            }],
        }])
    }

    #[test]
    fn test_disabled_rule_returns_zero_stats() {
        let fs = MemFs::new();
        fs.add_file("/src/a.txt", b"");

        let mut rule = move_rule(vec!["/src"], FilterGroups::default());
        rule.enabled = false;
        let mut runner = RuleRunner::new(rule);

        let stats = runner.execute(&fs, &mut NullReporter);
        assert_eq!(stats.files_processed, 0);
        assert_eq!(stats.error_count, 0);
        assert!(runner.last_completed().is_none());
        assert!(fs.exists(Path::new("/src/a.txt")));
    }

    #[test]
    fn test_moves_all_files() {
        let fs = MemFs::new();
        fs.add_file("/src/a.txt", b"a");
        fs.add_file("/src/b.txt", b"b");

        let mut runner = RuleRunner::new(move_rule(vec!["/src"], FilterGroups::default()));
        let stats = runner.execute(&fs, &mut NullReporter);

        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.error_count, 0);
        assert!(fs.exists(Path::new("/dest/a.txt")));
        assert!(fs.exists(Path::new("/dest/b.txt")));
        assert!(!fs.exists(Path::new("/src/a.txt")));
        assert!(runner.last_completed().is_some());
    }

    #[test]
    fn test_missing_location_warns_and_skips() {
        let fs = MemFs::new();
        fs.add_file("/src/a.txt", b"");

        let mut runner =
            RuleRunner::new(move_rule(vec!["/nonexistent", "/src"], FilterGroups::default()));
        let stats = runner.execute(&fs, &mut NullReporter);

        // The good location still ran; the missing one cost nothing.
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.error_count, 0);
    }

    #[test]
    fn test_not_filter_excludes() {
        let fs = MemFs::new();
        fs.add_file("/src/test.txt", b"");
        fs.add_file("/src/backup.bak", b"");

        let mut runner = RuleRunner::new(move_rule(vec!["/src"], not_filter("*.bak")));
        let stats = runner.execute(&fs, &mut NullReporter);

        assert_eq!(stats.files_processed, 1);
        assert!(fs.exists(Path::new("/dest/test.txt")));
        assert!(fs.exists(Path::new("/src/backup.bak")));
        assert!(!fs.exists(Path::new("/dest/backup.bak")));
    }

    #[test]
    fn test_filters_match_directories_too() {
        // A non-recursive rule still sees subdirectory entries as items.
        let fs = MemFs::new();
        fs.add_dir("/src/subdir.bak");
        fs.add_file("/src/keep.txt", b"");

        let mut runner = RuleRunner::new(move_rule(vec!["/src"], not_filter("*.bak")));
        runner.execute(&fs, &mut NullReporter);

        assert!(fs.exists(Path::new("/src/subdir.bak")));
        assert!(fs.exists(Path::new("/dest/keep.txt")));
    }

    #[test]
    fn test_files_processed_counts_errored_chains() {
        let fs = MemFs::new();
        fs.add_file("/src/a.txt", b"");

        let rule = Rule {
            name: "r".into(),
            enabled: true,
            recursive: false,
            traversal: Traversal::DepthFirst,
            locations: vec![PathBuf::from("/src")],
            filters: FilterGroups::default(),
            // Trash is unsupported on MemFs: a filesystem-error after the
            // filters matched.
            actions: vec![Action::Trash],
        };
        let mut runner = RuleRunner::new(rule);
        let stats = runner.execute(&fs, &mut NullReporter);

        assert_eq!(stats.files_processed, 1, "attempted actions count as processed");
        assert_eq!(stats.error_count, 1);
    }

    #[test]
    fn test_recursive_rule_reaches_nested_files() {
        let fs = MemFs::new();
        fs.add_file("/src/nested/deep/file.txt", b"");

        let mut rule = move_rule(vec!["/src"], FilterGroups::default());
        rule.recursive = true;
        rule.filters = FilterGroups(vec![FilterExpression {
            leaves: vec![FilterLeaf::Name(NameMatcher::Glob("*.txt".into()))],
            any: Vec::new(),
            not: Vec::new(),
        }]);
        let mut runner = RuleRunner::new(rule);
        let stats = runner.execute(&fs, &mut NullReporter);

        assert_eq!(stats.files_processed, 1);
        assert!(fs.exists(Path::new("/dest/file.txt")));
    }

    #[test]
    fn test_deleted_directory_skips_children() {
        let fs = MemFs::new();
        fs.add_file("/src/junk/one.tmp", b"");
        fs.add_file("/src/junk/two.tmp", b"");

        let rule = Rule {
            name: "r".into(),
            enabled: true,
            recursive: true,
            // Pre-order: the directory is visited (and deleted) before
            // its children would be.
            traversal: Traversal::BreadthFirst,
            locations: vec![PathBuf::from("/src")],
            filters: FilterGroups(vec![FilterExpression {
                leaves: vec![FilterLeaf::Name(NameMatcher::Glob("junk".into()))],
                any: Vec::new(),
                not: Vec::new(),
            }]),
            actions: vec![Action::Delete],
        };
        let mut runner = RuleRunner::new(rule);
        let stats = runner.execute(&fs, &mut NullReporter);

        // One deletion, no stale-path errors from the children.
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.error_count, 0);
        assert!(!fs.exists(Path::new("/src/junk")));
    }

    #[test]
    fn test_stats_flow_to_reporter() {
        let fs = MemFs::new();
        fs.add_file("/src/a.txt", b"");

        let mut recorder = crate::report::RecordingReporter::new();
        let mut runner = RuleRunner::new(move_rule(vec!["/src"], FilterGroups::default()));
        runner.execute(&fs, &mut recorder);

        use crate::report::ReportEvent;
        assert_eq!(recorder.events.first(), Some(&ReportEvent::StartRule("test-rule".into())));
        assert_eq!(recorder.events.last(), Some(&ReportEvent::EndRule("test-rule".into())));
        assert!(recorder.events.contains(&ReportEvent::FiltersPassed));
    }
}
