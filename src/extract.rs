//! Turning a dependency file into build-graph nodes.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::PathCache;
use crate::context::BuildContext;
use crate::depfile;
use crate::error::DepsError;
use crate::task::CompileTask;
use crate::tree::{self, Node, NodeLookup};

/// Location of the dependency file the compiler writes next to `output`.
///
/// The final extension is swapped for `d`, so `main.1.o` pairs with
/// `main.1.d`.
pub fn depfile_path(output: &Utf8Path) -> Utf8PathBuf {
    output.with_extension("d")
}

/// Splits a relative prerequisite path, dropping empty and `.` segments.
fn split_relative(path: &str) -> Vec<&str> {
    let separators: &[char] = if cfg!(windows) { &['/', '\\'] } else { &['/'] };

    path.split(separators)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

/// Consumes leading `..` segments by walking up from `base`.
///
/// The walk stops at the root, so the returned base is always a real node
/// and the remaining segments never start with `..`.
pub fn climb<'a, 'p>(
    lookup: &dyn NodeLookup,
    mut base: Node,
    mut segments: &'a [&'p str],
) -> (Node, &'a [&'p str]) {
    while segments.first() == Some(&"..") {
        segments = &segments[1..];
        base = lookup.parent(base).unwrap_or(base);
    }

    (base, segments)
}

/// Resolves prerequisite paths and applies the inclusion policy.
///
/// * absolute paths are looked up from the tree root,
/// * relative paths are looked up from the build root, as that is where the
///   compiler runs,
/// * nodes outside both the source and the build tree are dropped unless
///   `go_absolute` is set,
/// * the primary input of the task is dropped, it is tracked already.
pub struct Extractor<'a> {
    pub lookup: &'a dyn NodeLookup,
    pub cache: &'a PathCache,
    pub root: Node,
    pub srcnode: Node,
    pub bldnode: Node,
    pub go_absolute: bool,
}

impl Extractor<'_> {
    fn resolve(&self, path: &str) -> Option<Node> {
        let path_ref = Utf8Path::new(path);

        if path_ref.is_absolute() {
            let segments = tree::segments(path_ref);
            return self.cache.resolve(self.lookup, self.root, &segments);
        }

        let segments = split_relative(path);
        let (base, rest) = climb(self.lookup, self.bldnode, &segments);
        self.cache.resolve(self.lookup, base, rest)
    }

    fn is_tracked(&self, node: Node) -> bool {
        self.go_absolute
            || self.lookup.is_child_of(node, self.srcnode)
            || self.lookup.is_child_of(node, self.bldnode)
    }

    /// Maps every path to a node, failing on the first one that cannot be
    /// found.
    pub fn resolve_all(
        &self,
        task: &str,
        primary: Option<Node>,
        paths: &[String],
    ) -> Result<Vec<Node>, DepsError> {
        let mut nodes = Vec::with_capacity(paths.len());

        for path in paths {
            let node = self.resolve(path).ok_or_else(|| DepsError::Unresolved {
                path: path.clone(),
                task: task.to_string(),
            })?;

            if !self.is_tracked(node) {
                tracing::trace!(path = %path, "dropping dependency outside of the tracked trees");
                continue;
            }

            if Some(node) == primary {
                continue;
            }

            nodes.push(node);
        }

        Ok(nodes)
    }
}

/// Reads the dependency file of `task` and resolves it into nodes.
pub fn extract(ctx: &BuildContext, task: &CompileTask) -> Result<Vec<Node>, DepsError> {
    let Some(output) = task.primary_output() else {
        return Ok(Vec::new());
    };

    let path = depfile_path(&ctx.tree().abspath(output));
    let text = fs::read_to_string(&path).map_err(|source| DepsError::DepFile {
        path: path.clone(),
        source,
    })?;

    let paths = depfile::parse(&text);

    ctx.extractor()
        .resolve_all(&task.to_string(), task.primary_input(), &paths)
}
