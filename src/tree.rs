//! The file tree known to the build.
//!
//! Every path the build ever talks about (sources, headers, objects,
//! dependency files) is represented by a [`Node`] in a single [`FileTree`].
//! Nodes are interned: walking to the same location twice yields the same
//! handle, so nodes can be compared by identity and used as map keys.
//!
//! The tree is a `petgraph` graph whose edges point from a directory to its
//! entries. Entries are created lazily, either unconditionally through
//! [`FileTree::make_node`] (for outputs that do not exist yet) or only when
//! the location exists on disk through [`FileTree::find_node`] and friends.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use petgraph::Direction;
use petgraph::graph::{Graph, NodeIndex};

use crate::core::{ArcStr, Hash32};

/// Handle to a location in the [`FileTree`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Node(NodeIndex);

/// The lookup surface the dependency pipeline needs from the build graph.
///
/// [`FileTree`] is the production implementation; the trait exists so the
/// path cache and the extraction pipeline can be driven by any graph.
pub trait NodeLookup: Send + Sync {
    /// Finds an existing file below `base`. Directories never qualify.
    fn find_resource(&self, base: Node, path: &[&str]) -> Option<Node>;

    /// Returns the parent directory, or `None` for the root.
    fn parent(&self, node: Node) -> Option<Node>;

    /// Whether `node` is `ancestor` or lies somewhere below it.
    fn is_child_of(&self, node: Node, ancestor: Node) -> bool;
}

#[derive(Debug)]
struct Entry {
    name: ArcStr,
}

pub struct FileTree {
    graph: RwLock<Graph<Entry, ()>>,
    root: Node,
}

impl FileTree {
    /// Creates a tree containing only the filesystem root.
    pub fn new() -> Self {
        let mut graph = Graph::new();
        let root = graph.add_node(Entry { name: "".into() });

        Self {
            graph: RwLock::new(graph),
            root: Node(root),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Graph<Entry, ()>> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Graph<Entry, ()>> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> Node {
        self.root
    }

    pub fn name(&self, node: Node) -> ArcStr {
        self.read()[node.0].name.clone()
    }

    pub fn parent(&self, node: Node) -> Option<Node> {
        self.read()
            .neighbors_directed(node.0, Direction::Incoming)
            .next()
            .map(Node)
    }

    /// Number of nodes currently materialized in the tree.
    pub fn len(&self) -> usize {
        self.read().node_count()
    }

    pub fn is_empty(&self) -> bool {
        // the root is always present
        false
    }

    /// Absolute filesystem path of `node`.
    pub fn abspath(&self, node: Node) -> Utf8PathBuf {
        let graph = self.read();
        let mut names = Vec::new();
        let mut cursor = node.0;

        while let Some(parent) = graph.neighbors_directed(cursor, Direction::Incoming).next() {
            names.push(graph[cursor].name.clone());
            cursor = parent;
        }

        names.reverse();

        if cfg!(windows) {
            let joined: Vec<&str> = names.iter().map(|name| &**name).collect();
            Utf8PathBuf::from(joined.join("\\"))
        } else {
            let mut path = Utf8PathBuf::from("/");
            path.extend(names.iter().map(|name| &**name));
            path
        }
    }

    /// Path of `node` relative to `ancestor`, if it lies below it.
    pub fn relpath(&self, node: Node, ancestor: Node) -> Option<Utf8PathBuf> {
        let graph = self.read();
        let mut names = Vec::new();
        let mut cursor = node.0;

        while cursor != ancestor.0 {
            names.push(graph[cursor].name.clone());
            cursor = graph
                .neighbors_directed(cursor, Direction::Incoming)
                .next()?;
        }

        Some(names.iter().rev().map(|name| &**name).collect())
    }

    pub fn is_child_of(&self, node: Node, ancestor: Node) -> bool {
        let graph = self.read();
        let mut cursor = node.0;

        loop {
            if cursor == ancestor.0 {
                return true;
            }
            match graph.neighbors_directed(cursor, Direction::Incoming).next() {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    fn child(&self, parent: Node, name: &str) -> Option<Node> {
        let graph = self.read();
        graph
            .neighbors_directed(parent.0, Direction::Outgoing)
            .find(|&child| &*graph[child].name == name)
            .map(Node)
    }

    fn child_or_insert(&self, parent: Node, name: &str) -> Node {
        if let Some(child) = self.child(parent, name) {
            return child;
        }

        let mut graph = self.write();

        // another worker may have inserted it between the two locks
        if let Some(child) = graph
            .neighbors_directed(parent.0, Direction::Outgoing)
            .find(|&child| &*graph[child].name == name)
        {
            return Node(child);
        }

        let child = graph.add_node(Entry { name: name.into() });
        graph.add_edge(parent.0, child, ());
        Node(child)
    }

    /// Returns the node at `path` below `base`, creating entries as needed.
    ///
    /// The filesystem is not consulted, which makes this the right call for
    /// outputs that a task is about to produce. `.` segments are skipped and
    /// `..` walks up, stopping at the root.
    pub fn make_node<S: AsRef<str>>(&self, base: Node, path: &[S]) -> Node {
        let mut cursor = base;

        for segment in path {
            match segment.as_ref() {
                "" | "." => {}
                ".." => cursor = self.parent(cursor).unwrap_or(cursor),
                name => cursor = self.child_or_insert(cursor, name),
            }
        }

        cursor
    }

    /// Shorthand for [`make_node`](Self::make_node) from the root with an
    /// absolute path.
    pub fn make_path(&self, path: &Utf8Path) -> Node {
        self.make_node(self.root, &segments(path))
    }

    /// Returns the node at `path` below `base` if that location exists on
    /// disk.
    pub fn find_node<S: AsRef<str>>(&self, base: Node, path: &[S]) -> Option<Node> {
        let mut cursor = base;

        for segment in path {
            match segment.as_ref() {
                "" | "." => {}
                ".." => cursor = self.parent(cursor).unwrap_or(cursor),
                name => {
                    cursor = match self.child(cursor, name) {
                        Some(child) => child,
                        None if self.abspath(cursor).join(name).exists() => {
                            self.child_or_insert(cursor, name)
                        }
                        None => return None,
                    }
                }
            }
        }

        // cached entries may point at files removed since
        self.abspath(cursor).exists().then_some(cursor)
    }

    /// Like [`find_node`](Self::find_node), restricted to directories.
    pub fn find_dir<S: AsRef<str>>(&self, base: Node, path: &[S]) -> Option<Node> {
        self.find_node(base, path)
            .filter(|&node| self.abspath(node).is_dir())
    }

    /// Like [`find_node`](Self::find_node), rejecting directories.
    pub fn find_resource<S: AsRef<str>>(&self, base: Node, path: &[S]) -> Option<Node> {
        self.find_node(base, path)
            .filter(|&node| !self.abspath(node).is_dir())
    }

    /// BLAKE3 signature of the file contents behind `node`.
    pub fn signature(&self, node: Node) -> std::io::Result<Hash32> {
        Hash32::hash_file(self.abspath(node))
    }
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLookup for FileTree {
    fn find_resource(&self, base: Node, path: &[&str]) -> Option<Node> {
        FileTree::find_resource(self, base, path)
    }

    fn parent(&self, node: Node) -> Option<Node> {
        FileTree::parent(self, node)
    }

    fn is_child_of(&self, node: Node, ancestor: Node) -> bool {
        FileTree::is_child_of(self, node, ancestor)
    }
}

/// Splits a path into the segment list understood by [`FileTree`].
///
/// Root markers are dropped since every lookup is anchored at an explicit
/// base node, while drive prefixes are kept as a leading segment.
pub(crate) fn segments(path: &Utf8Path) -> Vec<&str> {
    path.components()
        .filter_map(|component| match component {
            Utf8Component::Prefix(prefix) => Some(prefix.as_str()),
            Utf8Component::RootDir | Utf8Component::CurDir => None,
            Utf8Component::ParentDir => Some(".."),
            Utf8Component::Normal(name) => Some(name),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tempdir() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_make_node_is_interned() {
        let tree = FileTree::new();
        let a = tree.make_path(Utf8Path::new("/project/src/main.c"));
        let b = tree.make_node(tree.root(), &["project", "src", "main.c"]);
        assert_eq!(a, b);
        assert_eq!(tree.abspath(a), Utf8Path::new("/project/src/main.c"));
    }

    #[test]
    fn test_make_node_parent_stops_at_root() {
        let tree = FileTree::new();
        let node = tree.make_node(tree.root(), &["..", "..", "etc"]);
        assert_eq!(tree.parent(node), Some(tree.root()));
        assert_eq!(tree.abspath(node), Utf8Path::new("/etc"));
    }

    #[test]
    fn test_is_child_of_includes_self() {
        let tree = FileTree::new();
        let src = tree.make_path(Utf8Path::new("/project/src"));
        let file = tree.make_node(src, &["inc", "a.h"]);
        let other = tree.make_path(Utf8Path::new("/usr/include/stdio.h"));

        assert!(tree.is_child_of(file, src));
        assert!(tree.is_child_of(src, src));
        assert!(!tree.is_child_of(other, src));
        assert!(!tree.is_child_of(src, file));
    }

    #[test]
    fn test_relpath() {
        let tree = FileTree::new();
        let src = tree.make_path(Utf8Path::new("/project/src"));
        let file = tree.make_node(src, &["inc", "a.h"]);
        assert_eq!(tree.relpath(file, src), Some(Utf8PathBuf::from("inc/a.h")));
        assert_eq!(tree.relpath(src, file), None);
    }

    #[test]
    fn test_find_resource_requires_existing_file() {
        let (_guard, path) = tempdir();
        fs::create_dir_all(path.join("inc")).unwrap();
        fs::write(path.join("inc/a.h"), "int a;").unwrap();

        let tree = FileTree::new();
        let base = tree.make_path(&path);

        let found = tree.find_resource(base, &["inc", "a.h"]).unwrap();
        assert_eq!(tree.abspath(found), path.join("inc/a.h"));

        assert_eq!(tree.find_resource(base, &["inc", "missing.h"]), None);
        assert_eq!(tree.find_resource(base, &["inc"]), None);
        assert!(tree.find_dir(base, &["inc"]).is_some());
    }

    #[test]
    fn test_find_node_forgets_removed_files() {
        let (_guard, path) = tempdir();
        fs::write(path.join("gone.h"), "").unwrap();

        let tree = FileTree::new();
        let base = tree.make_path(&path);
        assert!(tree.find_resource(base, &["gone.h"]).is_some());

        fs::remove_file(path.join("gone.h")).unwrap();
        assert_eq!(tree.find_resource(base, &["gone.h"]), None);
    }

    #[test]
    fn test_segments() {
        let path = Utf8Path::new("/a/./b/../c");
        assert_eq!(segments(path), vec!["a", "b", "..", "c"]);
    }
}
