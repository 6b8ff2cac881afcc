//! Location snapshots and traversal
//!
//! A rule execution never walks the live filesystem: it first captures an
//! immutable [`SnapshotNode`] tree, then traverses that. Actions may move
//! or delete files mid-run without confusing the walk; paths that vanished
//! since the snapshot surface as per-item filesystem-errors downstream.

use std::path::{Path, PathBuf};

use tidyfs_fs::Vfs;

/// One node of a location snapshot. Children are sorted by name so
/// traversal order is deterministic.
///
/// For non-recursive snapshots, subdirectory children are leaves with an
/// empty `children` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNode {
    pub name: String,
    pub is_dir: bool,
    pub children: Vec<SnapshotNode>,
}

/// Captures the state of `path`. A non-directory yields a childless
/// file node.
pub fn build_snapshot(
    fs: &dyn Vfs,
    path: &Path,
    recursive: bool,
) -> std::io::Result<SnapshotNode> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let meta = fs.stat(path)?;
    if !meta.is_dir {
        return Ok(SnapshotNode { name, is_dir: false, children: Vec::new() });
    }

    let mut entries = fs.read_dir(path)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut children = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_dir && recursive {
            children.push(build_snapshot(fs, &path.join(&entry.name), true)?);
        } else {
            children.push(SnapshotNode {
                name: entry.name,
                is_dir: entry.is_dir,
                children: Vec::new(),
            });
        }
    }

    Ok(SnapshotNode { name, is_dir: true, children })
}

/// Traversal control returned by a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Do not descend into this node's children (pre-order only).
    SkipChildren,
    /// Terminate the entire traversal.
    Stop,
}

/// Visitor verdict: control flow plus an optional path rewrite.
///
/// `new_path` is honored by the pre-order traversal only: when an action
/// renamed a directory, descent into its children continues under the new
/// path. Post-order ignores it (children were already visited).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub flow: Flow,
    pub new_path: Option<PathBuf>,
}

impl Visit {
    pub fn proceed() -> Self {
        Self { flow: Flow::Continue, new_path: None }
    }

    pub fn skip_children() -> Self {
        Self { flow: Flow::SkipChildren, new_path: None }
    }

    pub fn stop() -> Self {
        Self { flow: Flow::Stop, new_path: None }
    }

    pub fn rerooted(new_path: PathBuf) -> Self {
        Self { flow: Flow::Continue, new_path: Some(new_path) }
    }
}

/// Depth-first (post-order) traversal of the tree's descendants: children
/// before their parent. The root node itself is never visited.
///
/// `parent_path` is the directory containing the snapshot root, so each
/// visited path is the absolute path of the corresponding file.
pub fn traverse_children_dfs<V>(tree: &SnapshotNode, parent_path: &Path, visit: &mut V)
where
    V: FnMut(&SnapshotNode, &Path) -> Visit,
{
    let root_path = parent_path.join(&tree.name);
    for child in &tree.children {
        if !dfs_node(child, &root_path, visit) {
            return;
        }
    }
}

fn dfs_node<V>(node: &SnapshotNode, parent: &Path, visit: &mut V) -> bool
where
    V: FnMut(&SnapshotNode, &Path) -> Visit,
{
    let path = parent.join(&node.name);
    for child in &node.children {
        if !dfs_node(child, &path, visit) {
            return false;
        }
    }
    // Post-order: SkipChildren is meaningless here and new_path has
    // nothing left to apply to.
    visit(node, &path).flow != Flow::Stop
}

/// Breadth-first (pre-order) traversal of the tree's descendants: a node
/// before its children. The root node itself is never visited.
pub fn traverse_children_bfs<V>(tree: &SnapshotNode, parent_path: &Path, visit: &mut V)
where
    V: FnMut(&SnapshotNode, &Path) -> Visit,
{
    let root_path = parent_path.join(&tree.name);
    for child in &tree.children {
        if !bfs_node(child, &root_path, visit) {
            return;
        }
    }
}

fn bfs_node<V>(node: &SnapshotNode, parent: &Path, visit: &mut V) -> bool
where
    V: FnMut(&SnapshotNode, &Path) -> Visit,
{
    let path = parent.join(&node.name);
    let verdict = visit(node, &path);
    match verdict.flow {
        Flow::Stop => return false,
        Flow::SkipChildren => return true,
        Flow::Continue => {}
    }

    let descend = verdict.new_path.unwrap_or(path);
    for child in &node.children {
        if !bfs_node(child, &descend, visit) {
            return false;
        }
    }
    true
}
