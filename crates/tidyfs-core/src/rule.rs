//! Rule data model
//!
//! A [`Rule`] is immutable after configuration load: a set of watched
//! locations, an optional filter tree, and an ordered action chain. The
//! filter tree is a self-referential owned structure - each
//! [`FilterExpression`] owns its `any`/`not` subtrees - so no registry or
//! reference counting is involved.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

// ============================================================================
// Rule
// ============================================================================

/// How a rule walks the children of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Post-order: children are visited before their parent directory.
    #[default]
    DepthFirst,
    /// Pre-order: a directory is visited before its children.
    BreadthFirst,
}

impl Traversal {
    /// Parses the configuration spelling of a traversal mode.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "depth-first" => Some(Traversal::DepthFirst),
            "breadth-first" => Some(Traversal::BreadthFirst),
            _ => None,
        }
    }
}

/// A single declarative rule: locations, filters, and an action chain.
///
/// Invariants (enforced by the config decoder):
/// - `locations` is non-empty and every entry is absolute after
///   tilde-expansion and lexical cleaning.
/// - `name` is non-empty.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub enabled: bool,
    pub recursive: bool,
    pub traversal: Traversal,
    pub locations: Vec<PathBuf>,
    pub filters: FilterGroups,
    pub actions: Vec<Action>,
}

// ============================================================================
// Filters
// ============================================================================

/// Top-level sequence of filter expressions, AND-joined.
///
/// An empty sequence passes every path.
#[derive(Debug, Clone, Default)]
pub struct FilterGroups(pub Vec<FilterExpression>);

impl FilterGroups {
    /// Returns true when no filters are configured at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One node of the filter expression tree.
///
/// Semantics: `(AND of leaves) AND (OR of any-children, if any present)
/// AND NOT (AND of not-children, if any present)`. A node with no leaves
/// and no children evaluates to true.
#[derive(Debug, Clone, Default)]
pub struct FilterExpression {
    pub leaves: Vec<FilterLeaf>,
    pub any: Vec<FilterExpression>,
    pub not: Vec<FilterExpression>,
}

impl FilterExpression {
    /// True when the node carries neither leaves nor child groups.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.any.is_empty() && self.not.is_empty()
    }
}

/// Name matching: glob or compiled regex, exactly one of the two.
///
/// Globs are kept as strings and compiled at evaluation time (an invalid
/// glob is an evaluation error, matching the original behavior); regexes
/// are compiled at configuration load.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Glob(String),
    Regex(regex::Regex),
}

/// A leaf filter, evaluated against a single path.
#[derive(Debug, Clone)]
pub enum FilterLeaf {
    /// Match the basename against a glob or regex.
    Name(NameMatcher),
    /// Match the basename's (single-component) extension against glob
    /// patterns with the leading dot stripped. An empty pattern matches
    /// files without an extension.
    Extension(Vec<String>),
    /// Compare the file size in bytes. Directories never match.
    Size(SizeFilter),
    /// Match the lstat file type (symlinks are not followed).
    FileType(Vec<FileKind>),
    /// Glob patterns over the sniffed MIME type. Directories never match.
    Mime(Vec<String>),
    /// Compare one timestamp axis against optional before/after bounds.
    Date {
        axis: DateAxis,
        before: Option<DateSpec>,
        after: Option<DateSpec>,
    },
}

impl FilterLeaf {
    /// Configuration-facing name of this leaf kind, used in traces.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FilterLeaf::Name(_) => "name",
            FilterLeaf::Extension(_) => "extension",
            FilterLeaf::Size(_) => "size",
            FilterLeaf::FileType(_) => "type",
            FilterLeaf::Mime(_) => "mime",
            FilterLeaf::Date { axis, .. } => axis.filter_name(),
        }
    }
}

/// Size comparison, already resolved to bytes by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFilter {
    GreaterThan(u64),
    LessThan(u64),
    AtLeast(u64),
    AtMost(u64),
    Between { min: u64, max: u64 },
}

impl SizeFilter {
    /// Whether `size` satisfies the comparison.
    pub fn matches(&self, size: u64) -> bool {
        match *self {
            SizeFilter::GreaterThan(n) => size > n,
            SizeFilter::LessThan(n) => size < n,
            SizeFilter::AtLeast(n) => size >= n,
            SizeFilter::AtMost(n) => size <= n,
            SizeFilter::Between { min, max } => size >= min && size <= max,
        }
    }
}

/// File type as reported by lstat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl FileKind {
    /// Parses the configuration spelling, including aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(FileKind::File),
            "directory" | "dir" | "folder" => Some(FileKind::Directory),
            "symlink" => Some(FileKind::Symlink),
            _ => None,
        }
    }
}

/// The metadata axis a date filter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateAxis {
    Modified,
    Accessed,
    Changed,
    Created,
}

impl DateAxis {
    pub fn filter_name(&self) -> &'static str {
        match self {
            DateAxis::Modified => "date_modified",
            DateAxis::Accessed => "date_accessed",
            DateAxis::Changed => "date_changed",
            DateAxis::Created => "date_created",
        }
    }
}

/// Unit for relative date specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl RelativeUnit {
    /// Seconds per unit. Months and years use calendar approximations
    /// (30.44 and 365.25 days).
    pub fn seconds(&self) -> f64 {
        match self {
            RelativeUnit::Seconds => 1.0,
            RelativeUnit::Minutes => 60.0,
            RelativeUnit::Hours => 3600.0,
            RelativeUnit::Days => 86_400.0,
            RelativeUnit::Weeks => 7.0 * 86_400.0,
            RelativeUnit::Months => 30.44 * 86_400.0,
            RelativeUnit::Years => 365.25 * 86_400.0,
        }
    }
}

/// One bound of a date filter: relative to now, a Unix timestamp, or a
/// calendar date (interpreted as UTC).
#[derive(Debug, Clone, PartialEq)]
pub enum DateSpec {
    /// `N <unit> ago`; negative amounts denote future instants.
    Relative { amount: f64, unit: RelativeUnit },
    /// Positive epoch seconds.
    Unix(i64),
    /// `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`, UTC.
    Date(NaiveDateTime),
}

impl DateSpec {
    /// Resolves the spec to an absolute instant, relative specs against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DateSpec::Relative { amount, unit } => {
                let secs = amount * unit.seconds();
                now - chrono::Duration::milliseconds((secs * 1000.0) as i64)
            }
            DateSpec::Unix(epoch) => {
                Utc.timestamp_opt(*epoch, 0).single().unwrap_or_default()
            }
            DateSpec::Date(naive) => Utc.from_utc_datetime(naive),
        }
    }

    /// Parses the `date:` string forms.
    pub fn parse_date_string(s: &str) -> Option<NaiveDateTime> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Some(dt);
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap()).ok()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// What to do when the target of a move/copy/rename already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// Insert `_2`, `_3`, ... before the compound extension until the
    /// destination is free.
    #[default]
    RenameWithSuffix,
    /// Leave both files alone and stop the action chain for this file.
    Skip,
    /// Remove the destination first.
    Overwrite,
    /// Reserved: trash the destination first. Backends report unsupported.
    Trash,
}

impl ConflictMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rename_with_suffix" => Some(ConflictMode::RenameWithSuffix),
            "skip" => Some(ConflictMode::Skip),
            "overwrite" => Some(ConflictMode::Overwrite),
            "trash" => Some(ConflictMode::Trash),
            _ => None,
        }
    }
}

/// Log level for the `log` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// One step of a rule's action chain.
///
/// `dest`, `new_name` and `msg` are templates: `${name}`, `${ext}` and
/// strftime-style `%` tokens are expanded per file at execution time.
/// `dest` and `msg` additionally undergo leading-tilde expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move { dest: String, on_conflict: ConflictMode },
    Copy { new_name: String, on_conflict: ConflictMode },
    Rename { new_name: String, on_conflict: ConflictMode },
    Delete,
    Trash,
    Log { msg: String, level: LogLevel },
}

impl Action {
    /// Configuration-facing name of this action, used in traces.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Copy { .. } => "copy",
            Action::Rename { .. } => "rename",
            Action::Delete => "delete",
            Action::Trash => "trash",
            Action::Log { .. } => "log",
        }
    }
}

// ============================================================================
// Execution results & stats
// ============================================================================

/// Outcome of one action against one file.
///
/// `None` from an action means "no change; keep processing". At most one
/// of `deleted` / `conflict_already_exists` is set; either one terminates
/// the chain for the current file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// New path of the file after a move/rename/copy, if it changed.
    pub new_path: Option<PathBuf>,
    /// The file no longer exists (delete/trash).
    pub deleted: bool,
    /// A conflict with `on_conflict: skip` stopped the chain.
    pub conflict_already_exists: bool,
}

impl ExecutionResult {
    pub fn moved_to(path: PathBuf) -> Self {
        Self { new_path: Some(path), ..Default::default() }
    }

    pub fn deleted() -> Self {
        Self { deleted: true, ..Default::default() }
    }

    pub fn conflict() -> Self {
        Self { conflict_already_exists: true, ..Default::default() }
    }
}

/// Statistics for one rule execution.
#[derive(Debug, Clone)]
pub struct ExecutionStats {
    /// Wall-clock time the execution started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock duration.
    pub duration: Duration,
    /// Files that matched the filters and had at least one action
    /// attempted (counted even when a later action errored).
    pub files_processed: u64,
    /// Item-scoped errors encountered and skipped over.
    pub error_count: u64,
}

impl ExecutionStats {
    pub fn zero(started_at: DateTime<Utc>) -> Self {
        Self { started_at, duration: Duration::ZERO, files_processed: 0, error_count: 0 }
    }
}
