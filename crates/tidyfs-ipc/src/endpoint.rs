//! Control socket location
//!
//! POSIX: a Unix domain socket under `$XDG_RUNTIME_DIR/tidyfs/`, falling
//! back to the user cache directory when no runtime dir is available.
//! (A Windows port would use the named pipe `\\.\pipe\tidyfs` instead;
//! the daemon currently targets Unix.)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

const SOCKET_NAME: &str = "tidyfs.sock";

/// Default path for the control socket.
pub fn socket_path() -> PathBuf {
    let dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("tidyfs");
    dir.join(SOCKET_NAME)
}

/// Prepares `path` for binding: creates the parent directory and removes
/// a stale socket file left behind by an earlier daemon.
pub fn prepare(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating socket directory {}", parent.display()))?;
    }
    if path.exists() {
        warn!(path = %path.display(), "Removing stale control socket");
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_socket_path_ends_with_name() {
        let path = socket_path();
        assert_eq!(path.file_name().unwrap(), SOCKET_NAME);
    }

    #[test]
    fn test_prepare_creates_parent_and_clears_stale() {
        let tmp = TempDir::new().unwrap();
        let sock = tmp.path().join("nested/tidyfs.sock");

        prepare(&sock).unwrap();
        assert!(sock.parent().unwrap().is_dir());

        // A stale file in the way is removed.
        std::fs::write(&sock, b"stale").unwrap();
        prepare(&sock).unwrap();
        assert!(!sock.exists());
    }
}
