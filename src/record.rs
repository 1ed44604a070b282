//! Per-task dependency records and signatures.
//!
//! The store is what survives from one build invocation to the next: the
//! implicit dependencies discovered for each task, the implicit signature
//! computed over them, and the signature the task had when it last ran.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::core::{Hash32, TaskId};
use crate::error::StoreError;
use crate::tree::{FileTree, Node};

/// Bumped whenever the on-disk layout changes.
const FORMAT_VERSION: u32 = 1;

#[derive(Default)]
struct State {
    node_deps: HashMap<TaskId, Vec<Node>>,
    raw_deps: HashMap<TaskId, Vec<String>>,
    imp_sigs: HashMap<TaskId, Hash32>,
    task_sigs: HashMap<TaskId, Hash32>,
}

#[derive(Default)]
pub struct DepStore {
    state: RwLock<State>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    tasks: Vec<(TaskId, SnapshotEntry)>,
}

#[derive(Serialize, Deserialize, Default)]
struct SnapshotEntry {
    deps: Option<Vec<String>>,
    raw: Vec<String>,
    imp_sig: Option<Hash32>,
    task_sig: Option<Hash32>,
}

impl DepStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the dependency record of a task.
    ///
    /// Both lists are written under one lock, and the implicit signature
    /// computed over the previous record is dropped with them.
    pub fn record(&self, uid: TaskId, nodes: Vec<Node>, raw: Vec<String>) {
        let mut state = self.write();
        state.node_deps.insert(uid, nodes);
        state.raw_deps.insert(uid, raw);
        state.imp_sigs.remove(&uid);
    }

    pub fn node_deps(&self, uid: TaskId) -> Option<Vec<Node>> {
        self.read().node_deps.get(&uid).cloned()
    }

    pub fn raw_deps(&self, uid: TaskId) -> Option<Vec<String>> {
        self.read().raw_deps.get(&uid).cloned()
    }

    pub fn imp_sig(&self, uid: TaskId) -> Option<Hash32> {
        self.read().imp_sigs.get(&uid).copied()
    }

    pub fn set_imp_sig(&self, uid: TaskId, sig: Hash32) {
        self.write().imp_sigs.insert(uid, sig);
    }

    pub fn remove_imp_sig(&self, uid: TaskId) {
        self.write().imp_sigs.remove(&uid);
    }

    pub fn task_sig(&self, uid: TaskId) -> Option<Hash32> {
        self.read().task_sigs.get(&uid).copied()
    }

    pub fn set_task_sig(&self, uid: TaskId, sig: Hash32) {
        self.write().task_sigs.insert(uid, sig);
    }

    /// Loads a store previously written by [`save`](Self::save).
    ///
    /// A missing file yields an empty store. Recorded paths are interned into
    /// `tree` again, without touching the filesystem.
    pub fn load(tree: &FileTree, path: &Utf8Path) -> Result<Self, StoreError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = ciborium::from_reader(BufReader::new(file))?;

        if snapshot.version != FORMAT_VERSION {
            return Err(StoreError::Version {
                found: snapshot.version,
                expected: FORMAT_VERSION,
            });
        }

        let mut state = State::default();

        for (uid, entry) in snapshot.tasks {
            if let Some(deps) = entry.deps {
                let nodes = deps
                    .iter()
                    .map(|dep| tree.make_path(Utf8Path::new(dep)))
                    .collect();
                state.node_deps.insert(uid, nodes);
                state.raw_deps.insert(uid, entry.raw);
            }
            if let Some(sig) = entry.imp_sig {
                state.imp_sigs.insert(uid, sig);
            }
            if let Some(sig) = entry.task_sig {
                state.task_sigs.insert(uid, sig);
            }
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Writes the store to `path`, replacing any previous file atomically.
    pub fn save(&self, tree: &FileTree, path: &Utf8Path) -> Result<(), StoreError> {
        let state = self.read();
        let mut tasks: BTreeMap<TaskId, SnapshotEntry> = BTreeMap::new();

        for (uid, nodes) in &state.node_deps {
            let entry = tasks.entry(*uid).or_default();
            entry.deps = Some(
                nodes
                    .iter()
                    .map(|&node| tree.abspath(node).into_string())
                    .collect(),
            );
            entry.raw = state.raw_deps.get(uid).cloned().unwrap_or_default();
        }
        for (uid, sig) in &state.imp_sigs {
            tasks.entry(*uid).or_default().imp_sig = Some(*sig);
        }
        for (uid, sig) in &state.task_sigs {
            tasks.entry(*uid).or_default().task_sig = Some(*sig);
        }
        drop(state);

        let snapshot = Snapshot {
            version: FORMAT_VERSION,
            tasks: tasks.into_iter().collect(),
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let temp = path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&temp)?);
        ciborium::into_writer(&snapshot, &mut writer)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        fs::rename(&temp, path)?;

        Ok(())
    }
}
