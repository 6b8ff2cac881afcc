//! Dry-run backend: copy-on-write over a read-only base
//!
//! Writes land in a memory layer; the base filesystem is never touched.
//! Later actions in the same dry run observe the effects of earlier ones,
//! so a rename-then-move chain reports the same final paths a real run
//! would produce.
//!
//! Per the dry-run contract:
//! - `remove` / `remove_all` / `trash` are no-ops (the base is read-only,
//!   and a dry run must not pretend files vanished from under later rules)
//! - `rename` performs a recursive copy; the original stays in place but
//!   subsequent actions operate on the new path

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::{DirEntry, FileMeta, MemFs, Vfs};

/// Copy-on-write view over `base`. All mutation goes to the overlay.
pub struct DryRunFs {
    base: Arc<dyn Vfs>,
    overlay: MemFs,
}

impl DryRunFs {
    pub fn new(base: Arc<dyn Vfs>) -> Self {
        Self { base, overlay: MemFs::new() }
    }

    /// Whether a path exists only in the overlay (i.e. was produced by
    /// the dry run itself). Used by reporting.
    pub fn is_synthetic(&self, path: &Path) -> bool {
        self.overlay.stat(path).is_ok() && self.base.stat(path).is_err()
    }

    /// Recursively materializes `src` (wherever it lives) at `dst` in the
    /// overlay.
    fn copy_into_overlay(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        let meta = self.stat(src)?;
        if meta.is_dir {
            self.overlay.add_dir(dst);
            for entry in self.read_dir(src)? {
                self.copy_into_overlay(&src.join(&entry.name), &dst.join(&entry.name))?;
            }
            Ok(())
        } else {
            let mut reader = self.open_read(src)?;
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            self.overlay.add_file(dst, &data);
            Ok(())
        }
    }
}

impl Vfs for DryRunFs {
    fn stat(&self, path: &Path) -> std::io::Result<FileMeta> {
        self.overlay.stat(path).or_else(|_| self.base.stat(path))
    }

    fn lstat(&self, path: &Path) -> std::io::Result<FileMeta> {
        self.overlay.lstat(path).or_else(|_| self.base.lstat(path))
    }

    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
        let mut entries = match self.base.read_dir(path) {
            Ok(entries) => entries,
            Err(_) => Vec::new(),
        };
        if let Ok(overlay_entries) = self.overlay.read_dir(path) {
            for entry in overlay_entries {
                if !entries.iter().any(|e| e.name == entry.name) {
                    entries.push(entry);
                }
            }
        } else if entries.is_empty() {
            // Neither layer knows the directory.
            return self.base.read_dir(path);
        }
        Ok(entries)
    }

    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read + Send>> {
        self.overlay.open_read(path).or_else(|_| self.base.open_read(path))
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        self.overlay.mkdir_all(path, mode)
    }

    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        debug!(from = %from.display(), to = %to.display(), "Dry-run rename (copying)");
        self.copy_into_overlay(from, to)
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        debug!(path = %path.display(), "Dry-run remove (no-op)");
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> std::io::Result<()> {
        debug!(path = %path.display(), "Dry-run remove_all (no-op)");
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        self.copy_into_overlay(src, dst)
    }

    fn trash(&self, path: &Path) -> std::io::Result<()> {
        debug!(path = %path.display(), "Dry-run trash (no-op)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_with_files() -> Arc<MemFs> {
        let base = MemFs::new();
        base.add_file("/src/a.txt", b"alpha");
        base.add_file("/src/nested/b.txt", b"beta");
        Arc::new(base)
    }

    #[test]
    fn test_reads_fall_through_to_base() {
        let base = base_with_files();
        let dry = DryRunFs::new(base);

        assert_eq!(dry.stat(Path::new("/src/a.txt")).unwrap().len, 5);
        let mut content = String::new();
        dry.open_read(Path::new("/src/a.txt")).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "alpha");
    }

    #[test]
    fn test_rename_leaves_base_intact() {
        let base = base_with_files();
        let dry = DryRunFs::new(base.clone());

        dry.rename(Path::new("/src/a.txt"), Path::new("/src/renamed.txt")).unwrap();

        // The new path is visible through the dry-run view...
        assert!(dry.exists(Path::new("/src/renamed.txt")));
        // ...the original is still there (copy, not move)...
        assert!(dry.exists(Path::new("/src/a.txt")));
        // ...and the base never saw the new file.
        assert!(!base.exists(Path::new("/src/renamed.txt")));
    }

    #[test]
    fn test_rename_of_directory_copies_tree() {
        let base = base_with_files();
        let dry = DryRunFs::new(base);

        dry.rename(Path::new("/src"), Path::new("/moved")).unwrap();
        assert!(dry.exists(Path::new("/moved/nested/b.txt")));
    }

    #[test]
    fn test_removes_are_noops() {
        let base = base_with_files();
        let dry = DryRunFs::new(base);

        dry.remove(Path::new("/src/a.txt")).unwrap();
        dry.remove_all(Path::new("/src")).unwrap();
        dry.trash(Path::new("/src/a.txt")).unwrap();

        assert!(dry.exists(Path::new("/src/a.txt")));
    }

    #[test]
    fn test_read_dir_merges_layers() {
        let base = base_with_files();
        let dry = DryRunFs::new(base);
        dry.copy(Path::new("/src/a.txt"), Path::new("/src/copy.txt")).unwrap();

        let mut names: Vec<_> =
            dry.read_dir(Path::new("/src")).unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "copy.txt", "nested"]);
    }

    #[test]
    fn test_later_actions_see_earlier_effects() {
        let base = base_with_files();
        let dry = DryRunFs::new(base);

        dry.rename(Path::new("/src/a.txt"), Path::new("/src/a_renamed.txt")).unwrap();
        dry.mkdir_all(Path::new("/dest"), 0o755).unwrap();
        dry.copy(Path::new("/src/a_renamed.txt"), Path::new("/dest/a_renamed.txt")).unwrap();

        let mut content = String::new();
        dry.open_read(Path::new("/dest/a_renamed.txt"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "alpha");
        assert!(dry.is_synthetic(Path::new("/dest/a_renamed.txt")));
    }
}
