//! The watch table
//!
//! One [`WatchManager`] owns every native watch the daemon holds. Each
//! entry in the table is there for at least one of three reasons:
//! - it is a configured root (recursive or not),
//! - it sits inside a recursively watched subtree,
//! - it is the closest accessible ancestor of one or more *lost roots* -
//!   configured targets that do not currently exist.
//!
//! As directories appear, lost roots migrate downward entry by entry
//! until the target itself exists, at which point a recreation signal is
//! queued for the scheduler. As watched directories vanish, their
//! responsibilities relocate upward to the nearest surviving ancestor.
//!
//! All mutation happens from the controller's event loop; the only
//! concurrency here is the per-entry create-debounce timer, which posts
//! the parent path back onto a channel instead of touching state. A timer
//! firing for a path that has since left the table is a no-op.
//!
//! The re-stat after installing a watch (in [`WatchManager::add_root`] and
//! the race re-check in `add_lost_root`) closes the window between "the OS
//! said the directory exists" and "the native watch is actually in place":
//! a directory deleted inside that window would otherwise leave a watch
//! entry for a path nobody will ever send events about.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::EventSource;
use crate::source::{FsEvent, FsEventKind};

/// Pending-set size at which `evaluate_debounced` switches from per-path
/// stats to a single `read_dir`.
const STAT_THRESHOLD: usize = 3;

/// Whether this entry's path is itself a configured root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootType {
    #[default]
    None,
    NonRecursive,
    Recursive,
}

/// A configured root that does not currently exist, parked on its
/// closest accessible ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LostRoot {
    target: PathBuf,
    recursive: bool,
}

/// Per-path watch state. An entry exists iff a native watch is installed
/// on its path, and only while it has a reason to: a root type, the
/// recursive flag, or lost roots.
#[derive(Debug, Default)]
struct WatchEntry {
    root_type: RootType,
    recursive: bool,
    lost_roots: Vec<LostRoot>,
    /// Child paths with create events since the timer last fired.
    pending: HashSet<PathBuf>,
    /// Single-shot create-debounce timer; reset on every child create.
    timer: Option<JoinHandle<()>>,
}

impl WatchEntry {
    fn is_useless(&self) -> bool {
        self.root_type == RootType::None && !self.recursive && self.lost_roots.is_empty()
    }
}

/// A lost root whose target came back into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecreatedRoot {
    pub path: PathBuf,
    pub at: SystemTime,
}

/// Owns the watch table and the native watches behind it.
pub struct WatchManager {
    entries: HashMap<PathBuf, WatchEntry>,
    source: Box<dyn EventSource>,
    /// Quiet period for the per-entry create-debounce timers.
    debounce: Duration,
    /// Timers post the parent path here; the controller loop calls
    /// [`WatchManager::evaluate_debounced`] with it.
    debounce_tx: mpsc::Sender<PathBuf>,
    recreated: VecDeque<RecreatedRoot>,
    /// Non-blocking nudge telling the controller the queue is non-empty.
    recreated_tx: mpsc::Sender<()>,
    done: CancellationToken,
}

impl WatchManager {
    pub fn new(
        source: Box<dyn EventSource>,
        debounce: Duration,
        debounce_tx: mpsc::Sender<PathBuf>,
        recreated_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            source,
            debounce,
            debounce_tx,
            recreated: VecDeque::new(),
            recreated_tx,
            done: CancellationToken::new(),
        }
    }

    /// Number of live watch entries.
    pub fn watch_count(&self) -> usize {
        self.entries.len()
    }

    /// Drains the recreated-roots queue.
    pub fn take_recreated(&mut self) -> Vec<RecreatedRoot> {
        self.recreated.drain(..).collect()
    }

    /// Releases every native watch and stops all timers.
    pub fn destroy(&mut self) {
        self.done.cancel();
        for (path, entry) in self.entries.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            if let Err(err) = self.source.remove(&path) {
                debug!(path = %path.display(), error = %err, "Release on destroy failed");
            }
        }
    }

    // ========================================================================
    // Root installation
    // ========================================================================

    /// Starts covering a configured root. If the target is missing (or not
    /// a directory), its nearest accessible ancestor takes it on as a lost
    /// root instead.
    pub fn add_root(&mut self, target: &Path, recursive: bool) {
        if let Some(entry) = self.entries.get(target) {
            let already_covered = match entry.root_type {
                RootType::Recursive => true,
                RootType::NonRecursive => !recursive,
                RootType::None => false,
            };
            if already_covered {
                return;
            }
        }

        if !is_dir(target) {
            let mut attempted = HashSet::from([target.to_path_buf()]);
            match find_suitable_ancestor(target, &attempted) {
                Some(ancestor) => {
                    info!(
                        target = %target.display(),
                        ancestor = %ancestor.display(),
                        "Root does not exist yet, watching ancestor"
                    );
                    self.add_lost_root(&ancestor, target, recursive, &mut attempted);
                }
                None => warn!(
                    target = %target.display(),
                    "No accessible ancestor for missing root"
                ),
            }
            return;
        }

        if !self.add_root_inner(target, recursive) {
            return;
        }

        // Close the stat-then-watch race: the directory may have vanished
        // between the stat above and the watch install.
        if !is_dir(target) {
            debug!(target = %target.display(), "Root vanished during install, falling back");
            self.drop_entry(target);
            let mut attempted = HashSet::from([target.to_path_buf()]);
            if let Some(ancestor) = find_suitable_ancestor(target, &attempted) {
                self.add_lost_root(&ancestor, target, recursive, &mut attempted);
            }
        }
    }

    /// Creates or upgrades the entry at an *existing* directory.
    /// Returns false when the native watch could not be installed.
    fn add_root_inner(&mut self, path: &Path, recursive: bool) -> bool {
        if let Some(entry) = self.entries.get(path) {
            // Equal-or-stronger root type already present.
            let covered = match entry.root_type {
                RootType::Recursive => true,
                RootType::NonRecursive => !recursive,
                RootType::None => false,
            };
            if covered {
                return true;
            }
        }

        let existed = self.entries.contains_key(path);
        let was_recursive = self.entries.get(path).map(|e| e.recursive).unwrap_or(false);

        if !existed {
            if let Err(err) = self.source.add(path) {
                warn!(path = %path.display(), error = %err, "Cannot install watch");
                return false;
            }
            self.entries.insert(path.to_path_buf(), WatchEntry::default());
        }

        let entry = self.entries.get_mut(path).expect("entry just ensured");
        entry.root_type = if recursive { RootType::Recursive } else { RootType::NonRecursive };
        entry.recursive = entry.recursive || recursive;

        if recursive && !was_recursive {
            self.recursively_add_subdirectories(path);
        }
        true
    }

    /// Installs watches down a subtree. The parent entry is already
    /// delivering events for `path`, so no re-stat is needed here: a
    /// vanished directory surfaces as a read_dir error.
    fn recursively_add_subdirectories(&mut self, path: &Path) {
        let listing = match std::fs::read_dir(path) {
            Ok(listing) => listing,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Subtree listing failed");
                self.remove(path, &mut HashSet::new());
                return;
            }
        };

        if !self.entries.contains_key(path) {
            if let Err(err) = self.source.add(path) {
                warn!(path = %path.display(), error = %err, "Cannot watch subdirectory");
                return;
            }
            self.entries.insert(path.to_path_buf(), WatchEntry::default());
        }
        self.entries.get_mut(path).expect("entry just ensured").recursive = true;

        for entry in listing.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                self.recursively_add_subdirectories(&path.join(entry.file_name()));
            }
        }
    }

    /// Parks `target` as a lost root on `ancestor`, installing a watch
    /// there if needed.
    ///
    /// When the entry was created by this call, a race re-check runs with
    /// a fresh view of the filesystem: the world may have changed between
    /// choosing the ancestor and having its watch live.
    fn add_lost_root(
        &mut self,
        ancestor: &Path,
        target: &Path,
        recursive: bool,
        attempted: &mut HashSet<PathBuf>,
    ) {
        let newly_created = !self.entries.contains_key(ancestor);
        if newly_created {
            if let Err(err) = self.source.add(ancestor) {
                warn!(
                    ancestor = %ancestor.display(),
                    error = %err,
                    "Cannot watch ancestor for lost root"
                );
                return;
            }
            self.entries.insert(ancestor.to_path_buf(), WatchEntry::default());
        }

        let entry = self.entries.get_mut(ancestor).expect("entry just ensured");
        assert!(
            !entry.lost_roots.iter().any(|lr| lr.target == target),
            "duplicate lost root {} under {}",
            target.display(),
            ancestor.display()
        );
        entry.lost_roots.push(LostRoot { target: target.to_path_buf(), recursive });
        debug!(
            ancestor = %ancestor.display(),
            target = %target.display(),
            "Lost root registered"
        );

        if !newly_created {
            return;
        }

        // Race re-check with a fresh (empty) attempted map.
        let fresh = if is_dir(target) {
            Some(target.to_path_buf())
        } else {
            find_suitable_ancestor(target, &HashSet::new())
        };
        match fresh {
            None => {
                debug!(target = %target.display(), "No ancestor left during re-check");
                self.drop_entry(ancestor);
            }
            Some(better) if better == ancestor => {}
            Some(better) => {
                debug!(
                    from = %ancestor.display(),
                    to = %better.display(),
                    "Re-check moved the lost root"
                );
                self.drop_entry(ancestor);
                if better == target {
                    if self.add_root_inner(target, recursive) {
                        self.record_recreated(target);
                    }
                } else {
                    self.add_lost_root(&better, target, recursive, attempted);
                }
            }
        }
    }

    // ========================================================================
    // Event intake
    // ========================================================================

    /// Updates the table for one raw event. Signal routing to rules is the
    /// scheduler's job; this only maintains watches.
    pub fn process_event(&mut self, event: &FsEvent) {
        let path = &event.path;

        if self.entries.contains_key(path) {
            match event.kind {
                FsEventKind::Chmod => {
                    if !is_dir(path) {
                        self.remove(path, &mut HashSet::new());
                    }
                }
                // Rename gets an explicit remove even on platforms where
                // the OS primitive drops the watch itself; a double
                // release is logged and ignored.
                FsEventKind::Remove | FsEventKind::Rename => {
                    self.remove(path, &mut HashSet::new());
                }
                FsEventKind::Create => {
                    // Unexpected: we already watch this path. Re-verify and
                    // reinstall so the watch tracks the new inode.
                    if !is_dir(path) {
                        self.remove(path, &mut HashSet::new());
                    } else {
                        let _ = self.source.remove(path);
                        if let Err(err) = self.source.add(path) {
                            warn!(path = %path.display(), error = %err, "Reinstall failed");
                            self.remove(path, &mut HashSet::new());
                        }
                    }
                }
                FsEventKind::Write => {}
            }
        }

        if event.kind == FsEventKind::Create {
            if let Some(parent) = path.parent() {
                if self.entries.contains_key(parent) {
                    let entry = self.entries.get_mut(parent).expect("checked above");
                    entry.pending.insert(path.clone());
                    self.reset_debounce_timer(parent);
                }
            }
        }
    }

    fn reset_debounce_timer(&mut self, path: &Path) {
        let delay = self.debounce;
        let tx = self.debounce_tx.clone();
        let done = self.done.clone();
        let fire_for = path.to_path_buf();

        let Some(entry) = self.entries.get_mut(path) else { return };
        if let Some(old) = entry.timer.take() {
            old.abort();
        }
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::select! {
                _ = done.cancelled() => {}
                _ = tx.send(fire_for) => {}
            }
        }));
    }

    /// Handles a fired create-debounce timer: discovers which pending
    /// children are new directories and advances subtree watches and lost
    /// roots into them.
    pub fn evaluate_debounced(&mut self, path: &Path) {
        let Some(entry) = self.entries.get_mut(path) else { return };
        let pending: Vec<PathBuf> = entry.pending.drain().collect();
        entry.timer = None;
        if !entry.recursive && entry.lost_roots.is_empty() {
            return;
        }
        let is_recursive = entry.recursive;

        let new_dirs = new_directories(path, pending);

        for dir in &new_dirs {
            if is_recursive {
                self.recursively_add_subdirectories(dir);
            }

            // Lost roots this directory is on the route to.
            let advancing: Vec<LostRoot> = match self.entries.get_mut(path) {
                Some(entry) => {
                    let mut advancing = Vec::new();
                    entry.lost_roots.retain(|lr| {
                        if is_path_closer(path, &lr.target, dir) {
                            advancing.push(lr.clone());
                            false
                        } else {
                            true
                        }
                    });
                    advancing
                }
                None => Vec::new(),
            };

            for lost in advancing {
                if dir == &lost.target {
                    info!(target = %lost.target.display(), "Lost root recreated");
                    if self.add_root_inner(&lost.target, lost.recursive) {
                        self.record_recreated(&lost.target);
                    }
                } else {
                    debug!(
                        target = %lost.target.display(),
                        via = %dir.display(),
                        "Lost root advancing"
                    );
                    self.add_lost_root(dir, &lost.target, lost.recursive, &mut HashSet::new());
                }
            }
        }

        if self.entries.get(path).map(|e| e.is_useless()).unwrap_or(false) {
            self.remove(path, &mut HashSet::new());
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes an entry and relocates its responsibilities (its own root
    /// type and any lost roots) to the nearest surviving ancestor.
    /// `attempted` breaks relocation cycles when ancestors are vanishing
    /// underneath us.
    pub fn remove(&mut self, path: &Path, attempted: &mut HashSet<PathBuf>) {
        let Some(entry) = self.entries.remove(path) else { return };
        if let Err(err) = self.source.remove(path) {
            debug!(path = %path.display(), error = %err, "Watch release failed");
        }
        if let Some(timer) = entry.timer {
            timer.abort();
        }

        let mut responsibilities = Vec::new();
        if entry.root_type != RootType::None {
            responsibilities.push(LostRoot {
                target: path.to_path_buf(),
                recursive: entry.root_type == RootType::Recursive,
            });
        }
        responsibilities.extend(entry.lost_roots);
        if responsibilities.is_empty() {
            return;
        }

        attempted.insert(path.to_path_buf());
        let Some(ancestor) = find_suitable_ancestor(path, attempted) else {
            warn!(path = %path.display(), "No ancestor left to relocate responsibilities to");
            return;
        };
        debug!(
            path = %path.display(),
            ancestor = %ancestor.display(),
            count = responsibilities.len(),
            "Relocating watch responsibilities"
        );
        for lost in responsibilities {
            self.add_lost_root(&ancestor, &lost.target, lost.recursive, attempted);
        }
    }

    /// Deletes an entry and releases its watch without relocating
    /// anything. Used when an installation attempt is being unwound.
    fn drop_entry(&mut self, path: &Path) {
        if let Some(entry) = self.entries.remove(path) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            if let Err(err) = self.source.remove(path) {
                debug!(path = %path.display(), error = %err, "Watch release failed");
            }
        }
    }

    fn record_recreated(&mut self, path: &Path) {
        self.recreated.push_back(RecreatedRoot { path: path.to_path_buf(), at: SystemTime::now() });
        // Full channel means a wakeup is already queued.
        let _ = self.recreated_tx.try_send(());
    }

    // ========================================================================
    // Test inspection
    // ========================================================================

    /// Lost-root targets parked on `path`, for tests and status output.
    pub fn lost_roots_of(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .get(path)
            .map(|e| e.lost_roots.iter().map(|lr| lr.target.clone()).collect())
            .unwrap_or_default()
    }

    /// The root type recorded at `path`.
    pub fn root_type_of(&self, path: &Path) -> RootType {
        self.entries.get(path).map(|e| e.root_type).unwrap_or(RootType::None)
    }

    pub fn is_entry(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

/// True iff `path` is a strict descendant of `cur` and lies on the route
/// to `target` (it is the target, or the target is strictly below it).
fn is_path_closer(cur: &Path, target: &Path, path: &Path) -> bool {
    if !path.starts_with(cur) || path == cur {
        return false;
    }
    path == target || (target.starts_with(path) && target != path)
}

/// Walks parents of `target` upward, skipping `attempted`, and returns
/// the first existing directory. Reaching past the filesystem root yields
/// `None`.
fn find_suitable_ancestor(target: &Path, attempted: &HashSet<PathBuf>) -> Option<PathBuf> {
    let mut current = target.parent()?.to_path_buf();
    loop {
        if !attempted.contains(&current) && is_dir(&current) {
            return Some(current);
        }
        current = match current.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return None,
        };
    }
}

fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Which of the pending children are directories right now. Small sets
/// are stat-ed individually; larger ones are intersected with one
/// read_dir listing. Paths gone by now are dropped.
fn new_directories(parent: &Path, pending: Vec<PathBuf>) -> Vec<PathBuf> {
    if pending.len() < STAT_THRESHOLD {
        return pending.into_iter().filter(|p| is_dir(p)).collect();
    }
    match std::fs::read_dir(parent) {
        Ok(listing) => {
            let dirs: HashSet<PathBuf> = listing
                .flatten()
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| parent.join(e.file_name()))
                .collect();
            pending.into_iter().filter(|p| dirs.contains(p)).collect()
        }
        Err(_) => pending.into_iter().filter(|p| is_dir(p)).collect(),
    }
}
