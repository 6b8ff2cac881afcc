//! Real-filesystem backend over `std::fs`

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

use tracing::debug;

use crate::{DirEntry, FileMeta, Vfs};

/// Adapter that executes [`Vfs`] operations against the real filesystem.
///
/// Zero-sized: all context comes from the path arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl OsFs {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn meta_from(md: &fs::Metadata) -> FileMeta {
    FileMeta {
        is_dir: md.is_dir(),
        is_file: md.is_file(),
        is_symlink: md.file_type().is_symlink(),
        len: md.len(),
        mode: mode_of(md),
        modified: md.modified().ok(),
        accessed: md.accessed().ok(),
        changed: ctime_of(md),
        created: md.created().ok(),
    }
}

#[cfg(unix)]
fn mode_of(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(_md: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn ctime_of(md: &fs::Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    let secs = md.ctime();
    let nanos = md.ctime_nsec();
    if secs >= 0 {
        Some(SystemTime::UNIX_EPOCH + std::time::Duration::new(secs as u64, nanos as u32))
    } else {
        None
    }
}

#[cfg(not(unix))]
fn ctime_of(_md: &fs::Metadata) -> Option<SystemTime> {
    None
}

impl Vfs for OsFs {
    fn stat(&self, path: &Path) -> std::io::Result<FileMeta> {
        fs::metadata(path).map(|md| meta_from(&md))
    }

    fn lstat(&self, path: &Path) -> std::io::Result<FileMeta> {
        fs::symlink_metadata(path).map(|md| meta_from(&md))
    }

    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(entries)
    }

    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    #[cfg(unix)]
    fn mkdir_all(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(mode).create(path)
    }

    #[cfg(not(unix))]
    fn mkdir_all(&self, path: &Path, _mode: u32) -> std::io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_all(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn copy(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        let md = fs::metadata(src)?;
        if md.is_dir() {
            copy_dir(src, dst)
        } else {
            debug!(src = %src.display(), dst = %dst.display(), "Copying file");
            fs::copy(src, dst).map(|_| ())
        }
    }

    fn trash(&self, path: &Path) -> std::io::Result<()> {
        crate::trash::trash_path(path)
    }
}

/// Recursive directory copy. `fs::copy` preserves permissions on the
/// individual files; directory modes follow the source.
fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stat_file_and_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();

        let fs_impl = OsFs::new();
        let meta = fs_impl.stat(&file).unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.len, 5);
        assert!(meta.modified.is_some());

        let meta = fs_impl.stat(dir.path()).unwrap();
        assert!(meta.is_dir);
    }

    #[test]
    fn test_stat_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = OsFs::new().stat(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_lstat_does_not_follow_symlinks() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target.txt");
        let link = dir.path().join("link.txt");
        fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let fs_impl = OsFs::new();
        assert!(fs_impl.lstat(&link).unwrap().is_symlink);
        assert!(fs_impl.stat(&link).unwrap().is_file);
    }

    #[test]
    fn test_read_dir_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let mut entries = OsFs::new().read_dir(dir.path()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "f.txt".into(), is_dir: false },
                DirEntry { name: "sub".into(), is_dir: true },
            ]
        );
    }

    #[test]
    fn test_copy_directory_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        fs::write(src.join("nested/b.txt"), b"b").unwrap();

        let dst = dir.path().join("dst");
        OsFs::new().copy(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(dst.join("nested/b.txt")).unwrap(), b"b");
        assert!(src.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_mkdir_all_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a/b/c");
        OsFs::new().mkdir_all(&deep, 0o700).unwrap();

        let mode = fs::metadata(&deep).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
