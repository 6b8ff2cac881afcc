//! In-memory backend for tests
//!
//! A path-keyed node map behind a mutex. Paths must be absolute and
//! lexically clean; the helpers create parent directories implicitly the
//! way test fixtures want them to.

use std::collections::BTreeMap;
use std::io::{Cursor, Error, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::{DirEntry, FileMeta, Vfs};

#[derive(Debug, Clone)]
enum NodeKind {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    stamp: SystemTime,
}

/// In-memory filesystem. Cloneable handles are not provided; share via
/// reference or `Arc` like any other backend.
#[derive(Debug)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// An empty filesystem containing only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            PathBuf::from("/"),
            Node { kind: NodeKind::Dir, mode: 0o755, stamp: SystemTime::now() },
        );
        Self { nodes: Mutex::new(nodes) }
    }

    /// Creates a file (and any missing parent directories) with `data`.
    pub fn add_file(&self, path: impl AsRef<Path>, data: &[u8]) {
        let path = path.as_ref().to_path_buf();
        let mut nodes = self.nodes.lock().unwrap();
        ensure_parents(&mut nodes, &path);
        nodes.insert(
            path,
            Node { kind: NodeKind::File(data.to_vec()), mode: 0o644, stamp: SystemTime::now() },
        );
    }

    /// Creates a directory and any missing parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut nodes = self.nodes.lock().unwrap();
        ensure_parents(&mut nodes, &path);
        nodes
            .entry(path)
            .or_insert(Node { kind: NodeKind::Dir, mode: 0o755, stamp: SystemTime::now() });
    }

    /// Sets a file's timestamps, for date-filter tests.
    pub fn set_stamp(&self, path: impl AsRef<Path>, stamp: SystemTime) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(path.as_ref()) {
            node.stamp = stamp;
        }
    }

    /// File contents, for assertions.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path.as_ref()) {
            Some(Node { kind: NodeKind::File(data), .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn node_meta(node: &Node) -> FileMeta {
        match &node.kind {
            NodeKind::Dir => FileMeta::dir(node.mode, node.stamp),
            NodeKind::File(data) => FileMeta::file(data.len() as u64, node.mode, node.stamp),
        }
    }
}

fn ensure_parents(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
    let mut ancestors: Vec<_> = path.ancestors().skip(1).collect();
    ancestors.reverse();
    for dir in ancestors {
        nodes
            .entry(dir.to_path_buf())
            .or_insert(Node { kind: NodeKind::Dir, mode: 0o755, stamp: SystemTime::now() });
    }
}

fn not_found(path: &Path) -> Error {
    Error::new(ErrorKind::NotFound, format!("no such path: {}", path.display()))
}

/// Keys strictly below `root`, shallowest first.
fn descendants(nodes: &BTreeMap<PathBuf, Node>, root: &Path) -> Vec<PathBuf> {
    nodes.keys().filter(|p| p.starts_with(root) && p.as_path() != root).cloned().collect()
}

impl Vfs for MemFs {
    fn stat(&self, path: &Path) -> std::io::Result<FileMeta> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(path).map(Self::node_meta).ok_or_else(|| not_found(path))
    }

    fn lstat(&self, path: &Path) -> std::io::Result<FileMeta> {
        // MemFs has no symlinks; lstat and stat agree.
        self.stat(path)
    }

    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(Node { kind: NodeKind::Dir, .. }) => {}
            Some(_) => return Err(Error::new(ErrorKind::Other, "not a directory")),
            None => return Err(not_found(path)),
        }
        Ok(nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, node)| DirEntry {
                name: p.file_name().unwrap_or_default().to_string_lossy().into_owned(),
                is_dir: matches!(node.kind, NodeKind::Dir),
            })
            .collect())
    }

    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read + Send>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node { kind: NodeKind::File(data), .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(_) => Err(Error::new(ErrorKind::Other, "is a directory")),
            None => Err(not_found(path)),
        }
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(Node { kind: NodeKind::File(_), .. }) = nodes.get(path) {
            return Err(Error::new(ErrorKind::AlreadyExists, "file in the way"));
        }
        ensure_parents(&mut nodes, path);
        nodes
            .entry(path.to_path_buf())
            .or_insert(Node { kind: NodeKind::Dir, mode, stamp: SystemTime::now() });
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.remove(from).ok_or_else(|| not_found(from))?;
        for desc in descendants(&nodes.clone(), from) {
            let tail = desc.strip_prefix(from).expect("descendant under root");
            let moved = nodes.remove(&desc).expect("descendant exists");
            nodes.insert(to.join(tail), moved);
        }
        nodes.insert(to.to_path_buf(), node);
        Ok(())
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if !descendants(&nodes, path).is_empty() {
            return Err(Error::new(ErrorKind::Other, "directory not empty"));
        }
        nodes.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    fn remove_all(&self, path: &Path) -> std::io::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.remove(path).is_none() {
            return Err(not_found(path));
        }
        for desc in descendants(&nodes.clone(), path) {
            nodes.remove(&desc);
        }
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get(src).cloned().ok_or_else(|| not_found(src))?;
        let descs: Vec<_> = descendants(&nodes, src)
            .into_iter()
            .map(|p| {
                let node = nodes.get(&p).cloned().expect("descendant exists");
                (p, node)
            })
            .collect();
        ensure_parents(&mut nodes, dst);
        nodes.insert(dst.to_path_buf(), node);
        for (p, node) in descs {
            let tail = p.strip_prefix(src).expect("descendant under root");
            nodes.insert(dst.join(tail), node);
        }
        Ok(())
    }

    fn trash(&self, _path: &Path) -> std::io::Result<()> {
        Err(Error::new(ErrorKind::Unsupported, "trash not supported by the in-memory backend"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let fs = MemFs::new();
        fs.add_file("/a/b/c.txt", b"data");

        assert!(fs.stat(Path::new("/a")).unwrap().is_dir);
        assert!(fs.stat(Path::new("/a/b")).unwrap().is_dir);
        assert_eq!(fs.stat(Path::new("/a/b/c.txt")).unwrap().len, 4);
    }

    #[test]
    fn test_read_dir_direct_children_only() {
        let fs = MemFs::new();
        fs.add_file("/dir/a.txt", b"");
        fs.add_file("/dir/sub/deep.txt", b"");

        let mut names: Vec<_> =
            fs.read_dir(Path::new("/dir")).unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let fs = MemFs::new();
        fs.add_file("/old/f.txt", b"x");
        fs.add_file("/old/sub/g.txt", b"y");

        fs.rename(Path::new("/old"), Path::new("/new")).unwrap();

        assert!(fs.stat(Path::new("/old")).is_err());
        assert_eq!(fs.contents("/new/f.txt").unwrap(), b"x");
        assert_eq!(fs.contents("/new/sub/g.txt").unwrap(), b"y");
    }

    #[test]
    fn test_remove_refuses_nonempty_dir() {
        let fs = MemFs::new();
        fs.add_file("/dir/f.txt", b"");

        assert!(fs.remove(Path::new("/dir")).is_err());
        fs.remove_all(Path::new("/dir")).unwrap();
        assert!(fs.stat(Path::new("/dir")).is_err());
        assert!(fs.stat(Path::new("/dir/f.txt")).is_err());
    }

    #[test]
    fn test_copy_clones_subtree() {
        let fs = MemFs::new();
        fs.add_file("/src/f.txt", b"x");
        fs.add_file("/src/sub/g.txt", b"y");

        fs.copy(Path::new("/src"), Path::new("/dst")).unwrap();

        assert_eq!(fs.contents("/dst/f.txt").unwrap(), b"x");
        assert_eq!(fs.contents("/dst/sub/g.txt").unwrap(), b"y");
        assert_eq!(fs.contents("/src/f.txt").unwrap(), b"x");
    }

    #[test]
    fn test_open_read_roundtrip() {
        let fs = MemFs::new();
        fs.add_file("/f.bin", b"\x89PNG rest");

        let mut reader = fs.open_read(Path::new("/f.bin")).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"\x89PNG rest");
    }
}
