use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::PathCache;
use crate::config::Config;
use crate::core::{Blake3Hasher, Hash32, TaskId};
use crate::error::{BuildError, DepsError, SignatureError, StoreError};
use crate::extract::Extractor;
use crate::record::DepStore;
use crate::strategy::{ImplicitSig, NoScanner, Scanner};
use crate::task::{CompileTask, TaskState};
use crate::tree::{FileTree, Node};

/// Scheduler verdict for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Run,
    Skip,
}

/// State shared by every task of one build session.
///
/// Created once, then handed by reference to all hooks running on the
/// worker pool. The path cache and the dependency store are safe to use
/// from many workers at once.
pub struct BuildContext {
    tree: FileTree,
    config: Config,
    root: Node,
    srcnode: Node,
    bldnode: Node,
    cache: PathCache,
    store: DepStore,
    scanner: Box<dyn Scanner>,
    generators: AtomicUsize,
}

fn canonical(path: &Utf8Path) -> Result<Utf8PathBuf, BuildError> {
    Ok(path.canonicalize_utf8()?)
}

impl BuildContext {
    /// Starts a session with an empty dependency store.
    ///
    /// The source root must exist, the build root is created if needed.
    pub fn new(config: Config) -> Result<Self, BuildError> {
        let top = canonical(&config.top)?;
        fs::create_dir_all(&config.out)?;
        let out = canonical(&config.out)?;

        let tree = FileTree::new();
        let srcnode = tree.make_path(&top);
        let bldnode = tree.make_path(&out);

        Ok(Self {
            root: tree.root(),
            tree,
            config,
            srcnode,
            bldnode,
            cache: PathCache::new(),
            store: DepStore::new(),
            scanner: Box::new(NoScanner),
            generators: AtomicUsize::new(0),
        })
    }

    /// Starts a session, picking up the state saved by the previous one.
    ///
    /// State written by an incompatible version, or unreadable state, is
    /// discarded; that only costs a full rebuild.
    pub fn open(config: Config) -> Result<Self, BuildError> {
        let mut ctx = Self::new(config)?;

        ctx.store = match DepStore::load(&ctx.tree, &ctx.state_path()) {
            Ok(store) => store,
            Err(e @ (StoreError::Version { .. } | StoreError::Decode(_))) => {
                tracing::warn!("discarding dependency state: {}", e);
                DepStore::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ctx)
    }

    /// Persists the dependency store for the next session.
    pub fn save(&self) -> Result<(), BuildError> {
        self.store.save(&self.tree, &self.state_path())?;
        Ok(())
    }

    /// Replaces the fallback scanner used by tasks whose compiler does not
    /// write dependency files.
    pub fn with_scanner(mut self, scanner: impl Scanner + 'static) -> Self {
        self.scanner = Box::new(scanner);
        self
    }

    fn state_path(&self) -> Utf8PathBuf {
        self.config.state_path(&self.tree.abspath(self.bldnode))
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> Node {
        self.root
    }

    pub fn srcnode(&self) -> Node {
        self.srcnode
    }

    pub fn bldnode(&self) -> Node {
        self.bldnode
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    pub fn store(&self) -> &DepStore {
        &self.store
    }

    pub fn scanner(&self) -> &dyn Scanner {
        &*self.scanner
    }

    pub(crate) fn next_generator_index(&self) -> usize {
        self.generators.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn extractor(&self) -> Extractor<'_> {
        Extractor {
            lookup: &self.tree,
            cache: &self.cache,
            root: self.root,
            srcnode: self.srcnode,
            bldnode: self.bldnode,
            go_absolute: self.config.go_absolute,
        }
    }

    fn compute_implicit(&self, uid: TaskId) -> Result<Hash32, SignatureError> {
        let mut hasher = Blake3Hasher::default();

        for node in self.store.node_deps(uid).unwrap_or_default() {
            let sig = self
                .tree
                .signature(node)
                .map_err(|source| SignatureError::MissingNode {
                    path: self.tree.abspath(node),
                    source,
                })?;
            hasher.update(sig.as_bytes());
        }

        Ok(hasher.into())
    }

    /// The generic implicit-signature algorithm.
    ///
    /// With a signature from an earlier run on record, the recorded nodes are
    /// hashed again: a match returns the old signature, anything else drops
    /// it and fails with [`SignatureError::Rescan`]. Without one, the task is
    /// scanned, the result recorded, and a fresh signature stored.
    pub fn implicit_signature(&self, task: &CompileTask) -> Result<Hash32, DepsError> {
        let uid = task.uid();

        if let Some(prev) = self.store.imp_sig(uid) {
            if let Ok(sig) = self.compute_implicit(uid)
                && sig == prev
            {
                return Ok(prev);
            }

            self.store.remove_imp_sig(uid);
            return Err(SignatureError::Rescan.into());
        }

        let (nodes, raw) = task.strategy().scan(self, task)?;
        self.store.record(uid, nodes, raw);

        let sig = self.compute_implicit(uid)?;
        self.store.set_imp_sig(uid, sig);
        Ok(sig)
    }

    /// Signature of the whole task: identity, explicit inputs, compiler
    /// flags, and implicit dependencies.
    ///
    /// `None` means the implicit part has no signature, which always forces a
    /// rebuild. Computed signatures are memoized on the task.
    pub fn signature(&self, task: &CompileTask) -> Result<Option<Hash32>, DepsError> {
        if let Some(sig) = task.cached_sig() {
            return Ok(Some(sig));
        }

        let mut hasher = Blake3Hasher::default();
        hasher.update(task.uid().0.as_bytes());

        for &node in task.inputs() {
            let sig = self
                .tree
                .signature(node)
                .map_err(|source| SignatureError::MissingNode {
                    path: self.tree.abspath(node),
                    source,
                })?;
            hasher.update(sig.as_bytes());
        }

        hasher.update_str(&task.env().cc_name);
        for flag in task.flags() {
            hasher.update_str(flag);
        }

        match task.strategy().sig_implicit_deps(self, task)? {
            ImplicitSig::Known(sig) => hasher.update(sig.as_bytes()),
            ImplicitSig::Nil => return Ok(None),
        };

        let sig = hasher.into();
        task.set_cached_sig(sig);
        Ok(Some(sig))
    }

    /// Decides whether `task` has to run in this build.
    pub fn runnable_status(&self, task: &CompileTask) -> Result<RunStatus, DepsError> {
        let Some(prev) = self.store.task_sig(task.uid()) else {
            tracing::debug!("task {} must run, it was never executed", task);
            return Ok(RunStatus::Run);
        };

        let Some(sig) = self.signature(task)? else {
            tracing::debug!("task {} must run, it has no signature", task);
            return Ok(RunStatus::Run);
        };

        if sig != prev {
            tracing::debug!("task {} must run, its signature changed", task);
            return Ok(RunStatus::Run);
        }

        for &output in task.outputs() {
            if !self.tree.abspath(output).exists() {
                tracing::debug!("task {} must run, an output is missing", task);
                return Ok(RunStatus::Run);
            }
        }

        Ok(RunStatus::Skip)
    }

    /// Completion logic shared by every strategy once the compiler is done:
    /// check the outputs, store the signature, mark the task finished.
    pub fn finish(&self, task: &CompileTask) -> Result<(), DepsError> {
        for &output in task.outputs() {
            let path = self.tree.abspath(output);
            if !path.exists() {
                return Err(DepsError::MissingOutput(task.to_string(), path));
            }
        }

        if let Some(sig) = self.signature(task)? {
            self.store.set_task_sig(task.uid(), sig);
        }

        task.set_state(TaskState::Success);
        Ok(())
    }
}
