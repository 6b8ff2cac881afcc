//! Platform trash primitive
//!
//! On Linux this follows the FreeDesktop Trash specification: files are
//! renamed into `<base>/Trash/files/` with a matching
//! `<base>/Trash/info/<name>.trashinfo` record. On macOS the Finder is
//! asked to do it. Elsewhere the operation reports unsupported; callers
//! treat that as a filesystem-error.

#[cfg(all(unix, not(target_os = "macos")))]
pub fn trash_path(path: &std::path::Path) -> std::io::Result<()> {
    freedesktop::trash(path)
}

#[cfg(target_os = "macos")]
pub fn trash_path(path: &std::path::Path) -> std::io::Result<()> {
    use std::io::{Error, ErrorKind};
    use std::process::Command;

    let script = format!(
        "tell application \"Finder\" to delete POSIX file \"{}\"",
        path.display()
    );
    let status = Command::new("osascript").arg("-e").arg(script).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Finder refused to trash the file"))
    }
}

#[cfg(not(unix))]
pub fn trash_path(_path: &std::path::Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "trash is not supported on this platform",
    ))
}

#[cfg(all(unix, not(target_os = "macos")))]
mod freedesktop {
    use std::fs;
    use std::io::{Error, ErrorKind};
    use std::os::unix::fs::DirBuilderExt;
    use std::path::{Path, PathBuf};

    use tracing::debug;

    /// `$XDG_DATA_HOME/Trash`, defaulting to `~/.local/share/Trash`.
    fn trash_base() -> std::io::Result<PathBuf> {
        if let Some(data_home) = std::env::var_os("XDG_DATA_HOME") {
            let p = PathBuf::from(data_home);
            if p.is_absolute() {
                return Ok(p.join("Trash"));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "home directory unknown"))?;
        Ok(home.join(".local/share/Trash"))
    }

    /// Picks a free name in `files/`, appending `.N` on collision.
    fn free_name(files_dir: &Path, name: &str) -> String {
        if !files_dir.join(name).exists() {
            return name.to_string();
        }
        for n in 1u64.. {
            let candidate = format!("{name}.{n}");
            if !files_dir.join(&candidate).exists() {
                return candidate;
            }
        }
        unreachable!("collision search is unbounded")
    }

    pub fn trash(path: &Path) -> std::io::Result<()> {
        let base = trash_base()?;
        let files_dir = base.join("files");
        let info_dir = base.join("info");
        for dir in [&files_dir, &info_dir] {
            fs::DirBuilder::new().recursive(true).mode(0o700).create(dir).or_else(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;
        }

        let name = path
            .file_name()
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "path has no filename"))?
            .to_string_lossy()
            .into_owned();
        let trashed_name = free_name(&files_dir, &name);

        let deletion_date = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        let info = format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            path.display(),
            deletion_date
        );
        let info_path = info_dir.join(format!("{trashed_name}.trashinfo"));
        fs::write(&info_path, info)?;

        if let Err(err) = fs::rename(path, files_dir.join(&trashed_name)) {
            // The info record must not outlive a failed trash.
            let _ = fs::remove_file(&info_path);
            return Err(err);
        }

        debug!(path = %path.display(), name = %trashed_name, "Moved to trash");
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::{Mutex, MutexGuard, OnceLock};
        use tempfile::TempDir;

        // XDG_DATA_HOME is process-global; serialize the tests touching it.
        fn env_lock() -> &'static Mutex<()> {
            static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
            LOCK.get_or_init(|| Mutex::new(()))
        }

        struct EnvGuard {
            previous: Option<std::ffi::OsString>,
            _lock: MutexGuard<'static, ()>,
        }

        impl EnvGuard {
            fn set(dir: &Path) -> Self {
                let lock = env_lock().lock().unwrap_or_else(|e| e.into_inner());
                let previous = std::env::var_os("XDG_DATA_HOME");
                std::env::set_var("XDG_DATA_HOME", dir);
                Self { previous, _lock: lock }
            }
        }

        impl Drop for EnvGuard {
            fn drop(&mut self) {
                match &self.previous {
                    Some(v) => std::env::set_var("XDG_DATA_HOME", v),
                    None => std::env::remove_var("XDG_DATA_HOME"),
                }
            }
        }

        #[test]
        fn test_trash_creates_layout_and_info() {
            let data = TempDir::new().unwrap();
            let _guard = EnvGuard::set(data.path());

            let work = TempDir::new().unwrap();
            let victim = work.path().join("victim.txt");
            fs::write(&victim, b"bye").unwrap();

            trash(&victim).unwrap();

            assert!(!victim.exists());
            let files = data.path().join("Trash/files/victim.txt");
            assert_eq!(fs::read(&files).unwrap(), b"bye");

            let info =
                fs::read_to_string(data.path().join("Trash/info/victim.txt.trashinfo")).unwrap();
            assert!(info.starts_with("[Trash Info]\n"));
            assert!(info.contains(&format!("Path={}\n", victim.display())));
            assert!(info.contains("DeletionDate="));
        }

        #[test]
        fn test_trash_disambiguates_names() {
            let data = TempDir::new().unwrap();
            let _guard = EnvGuard::set(data.path());

            let work = TempDir::new().unwrap();
            for content in [b"one" as &[u8], b"two"] {
                let victim = work.path().join("dup.txt");
                fs::write(&victim, content).unwrap();
                trash(&victim).unwrap();
            }

            assert!(data.path().join("Trash/files/dup.txt").exists());
            assert!(data.path().join("Trash/files/dup.txt.1").exists());
            assert!(data.path().join("Trash/info/dup.txt.1.trashinfo").exists());
        }
    }
}
