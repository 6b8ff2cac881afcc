//! Action execution and chaining
//!
//! Actions run in configured order against one file, threading the
//! current path: a rename updates the path the next action sees, a copy
//! hands the chain over to the copy. The chain ends early at the first
//! deletion or conflict-skip; a filesystem-error ends the chain with the
//! file counted as skipped-with-error, any other error is propagated to
//! the item level.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use tidyfs_core::errors::is_fs_error;
use tidyfs_core::rule::{Action, ConflictMode, ExecutionResult, LogLevel};
use tidyfs_core::template;
use tidyfs_fs::{resolve_conflict, Vfs};
use tracing::{debug, error, info, warn};

use crate::report::{ActionOutcome, Reporter};

/// Mode for directories created by the move action.
const DEST_DIR_MODE: u32 = 0o755;

/// Result of running a whole action chain for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainResult {
    /// Where the file ended up (equals the input when nothing moved it).
    pub final_path: PathBuf,
    /// The chain ended in a deletion.
    pub deleted: bool,
    /// Number of actions attempted (including a failed final one).
    pub attempted: usize,
    /// The chain ended early on a filesystem-error.
    pub errored: bool,
}

/// Runs `actions` in order against `input` per the threading discipline.
///
/// Filesystem-errors are contained here (reported, chain ended,
/// `errored` set); other errors propagate.
pub fn run_chain(
    actions: &[Action],
    input: &Path,
    fs: &dyn Vfs,
    reporter: &mut dyn Reporter,
) -> Result<ChainResult> {
    let mut current = input.to_path_buf();
    let mut attempted = 0usize;

    for action in actions {
        attempted += 1;
        let name = action.kind_name();

        let result = match execute_action(action, &current, fs) {
            Ok(result) => result,
            Err(err) if is_fs_error(&err) => {
                warn!(
                    action = name,
                    path = %current.display(),
                    error = %format!("{err:#}"),
                    "Action failed"
                );
                reporter.report_action(name, &ActionOutcome::Failed(format!("{err:#}")));
                return Ok(ChainResult { final_path: current, deleted: false, attempted, errored: true });
            }
            Err(err) => return Err(err),
        };

        let Some(result) = result else {
            reporter.report_action(name, &ActionOutcome::NoChange);
            continue;
        };

        if result.conflict_already_exists {
            // A later delete must not fire against a file we chose to keep.
            reporter.report_action(name, &ActionOutcome::Conflict);
            return Ok(ChainResult { final_path: current, deleted: false, attempted, errored: false });
        }

        if result.deleted {
            reporter.report_action(name, &ActionOutcome::Deleted);
            return Ok(ChainResult { final_path: current, deleted: true, attempted, errored: false });
        }

        match result.new_path {
            Some(new_path) => {
                reporter.report_action(name, &ActionOutcome::PathChanged(new_path.clone()));
                current = new_path;
            }
            None => reporter.report_action(name, &ActionOutcome::NoChange),
        }
    }

    Ok(ChainResult { final_path: current, deleted: false, attempted, errored: false })
}

/// Executes one action against `path`. `Ok(None)` means "no change; keep
/// processing".
pub fn execute_action(
    action: &Action,
    path: &Path,
    fs: &dyn Vfs,
) -> Result<Option<ExecutionResult>> {
    match action {
        Action::Move { dest, on_conflict } => execute_move(dest, *on_conflict, path, fs),
        Action::Copy { new_name, on_conflict } => {
            execute_sibling(new_name, *on_conflict, path, fs, true)
        }
        Action::Rename { new_name, on_conflict } => {
            execute_sibling(new_name, *on_conflict, path, fs, false)
        }
        Action::Delete => execute_delete(path, fs),
        Action::Trash => {
            fs.trash(path).context("moving to trash")?;
            Ok(Some(ExecutionResult::deleted()))
        }
        Action::Log { msg, level } => {
            let expanded = expand_with_tilde(msg, path);
            match level {
                LogLevel::Debug => debug!(path = %path.display(), "{expanded}"),
                LogLevel::Info => info!(path = %path.display(), "{expanded}"),
                LogLevel::Warn => warn!(path = %path.display(), "{expanded}"),
                LogLevel::Error => error!(path = %path.display(), "{expanded}"),
            }
            Ok(None)
        }
    }
}

/// Tilde expansion first, then `${name}`/`${ext}` and strftime tokens.
fn expand_with_tilde(template_str: &str, path: &Path) -> String {
    let tilded = template::expand_tilde(template_str);
    template::expand(&tilded.to_string_lossy(), path, Local::now())
}

fn execute_move(
    dest_template: &str,
    on_conflict: ConflictMode,
    path: &Path,
    fs: &dyn Vfs,
) -> Result<Option<ExecutionResult>> {
    let dest = PathBuf::from(expand_with_tilde(dest_template, path));

    let basename = path
        .file_name()
        .ok_or_else(|| anyhow!("cannot move a path without a filename: {}", path.display()))?;
    let target = dest.join(basename);
    if target == path {
        return Ok(None);
    }

    match fs.stat(&dest) {
        Ok(meta) if !meta.is_dir => {
            return Err(anyhow::Error::from(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("move destination {} exists and is not a directory", dest.display()),
            )));
        }
        _ => {}
    }

    fs.mkdir_all(&dest, DEST_DIR_MODE).context("creating move destination")?;

    let target = if fs.exists(&target) {
        let (resolved, proceed) =
            resolve_conflict(fs, on_conflict, &target).context("resolving move conflict")?;
        if !proceed {
            return Ok(Some(ExecutionResult::conflict()));
        }
        resolved
    } else {
        target
    };

    fs.rename(path, &target).context("moving file")?;
    Ok(Some(ExecutionResult::moved_to(target)))
}

/// Shared body of copy and rename: same directory, new (template) name.
fn execute_sibling(
    name_template: &str,
    on_conflict: ConflictMode,
    path: &Path,
    fs: &dyn Vfs,
    copy: bool,
) -> Result<Option<ExecutionResult>> {
    let new_name = expand_with_tilde(name_template, path);
    if new_name.contains(MAIN_SEPARATOR) || new_name.contains('/') {
        return Err(anyhow!(
            "new_name `{new_name}` must not contain a path separator"
        ));
    }
    if new_name.is_empty() {
        return Err(anyhow!("new_name expanded to an empty string"));
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("cannot rename a path without a parent: {}", path.display()))?;
    let target = parent.join(&new_name);
    if target == path {
        return Ok(None);
    }

    let target = if fs.exists(&target) {
        let (resolved, proceed) =
            resolve_conflict(fs, on_conflict, &target).context("resolving name conflict")?;
        if !proceed {
            return Ok(Some(ExecutionResult::conflict()));
        }
        resolved
    } else {
        target
    };

    if copy {
        fs.copy(path, &target).context("copying file")?;
    } else {
        fs.rename(path, &target).context("renaming file")?;
    }
    Ok(Some(ExecutionResult::moved_to(target)))
}

fn execute_delete(path: &Path, fs: &dyn Vfs) -> Result<Option<ExecutionResult>> {
    let meta = fs.stat(path).context("stat before delete")?;
    if meta.is_dir {
        fs.remove_all(path).context("removing directory")?;
    } else {
        fs.remove(path).context("removing file")?;
    }
    Ok(Some(ExecutionResult::deleted()))
}
