use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::core::ArcStr;
use crate::tree::{Node, NodeLookup};

/// Identity of a lookup: the base node plus the requested segments joined
/// with `/`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    base: Node,
    path: ArcStr,
}

impl CacheKey {
    pub fn new<S: AsRef<str>>(base: Node, path: &[S]) -> Self {
        let path: Vec<&str> = path.iter().map(|segment| segment.as_ref()).collect();

        Self {
            base,
            path: path.join("/").into(),
        }
    }
}

/// Session-wide memo of path lookups.
///
/// Searching the tree touches the filesystem, and the same headers show up
/// in the dependency file of almost every task, so resolved paths are kept
/// for the whole session. Misses are remembered too. Entries are never
/// evicted: a path resolved once is assumed to stay put until the session
/// ends.
///
/// One mutex guards the map, and it is held for the whole lookup-or-insert
/// of a single key. Two workers asking for the same key therefore never
/// search twice; the second one blocks and then reads the stored answer.
#[derive(Default)]
pub struct PathCache {
    entries: Mutex<HashMap<CacheKey, Option<Node>>>,
    searches: AtomicUsize,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `path` below `base`, searching `lookup` only on a cache miss.
    pub fn resolve<S: AsRef<str>>(
        &self,
        lookup: &dyn NodeLookup,
        base: Node,
        path: &[S],
    ) -> Option<Node> {
        let key = CacheKey::new(base, path);

        // poisoning can only come from a panic inside `find_resource`, which
        // never leaves a half-written entry behind
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&node) = entries.get(&key) {
            return node;
        }

        let segments: Vec<&str> = path.iter().map(|segment| segment.as_ref()).collect();
        let node = lookup.find_resource(base, &segments);
        self.searches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(base = ?key.base, path = %key.path, found = node.is_some(), "path cache miss");

        entries.insert(key, node);
        node
    }

    /// Number of graph searches performed so far, i.e. the number of misses.
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
