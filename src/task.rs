use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{Env, Lang};
use crate::core::{Blake3Hasher, Hash32, TaskId};
use crate::strategy::CompilerStrategy;
use crate::tree::{FileTree, Node};

/// Lifecycle of a task within one build invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotRun,
    Skipped,
    Success,
    Failed,
}

/// A single `source -> object` compilation.
///
/// The strategy deciding how dependencies are discovered is chosen when the
/// task is created and never changes afterwards.
pub struct CompileTask {
    uid: TaskId,
    name: String,
    lang: Lang,
    inputs: Vec<Node>,
    outputs: Vec<Node>,
    env: Arc<Env>,
    strategy: Arc<dyn CompilerStrategy>,
    /// Memoized task signature, dropped whenever the dependency record of
    /// the task is rewritten.
    cache_sig: Mutex<Option<Hash32>>,
    state: Mutex<TaskState>,
}

impl CompileTask {
    pub(crate) fn new(
        tree: &FileTree,
        lang: Lang,
        inputs: Vec<Node>,
        outputs: Vec<Node>,
        env: Arc<Env>,
        strategy: Arc<dyn CompilerStrategy>,
    ) -> Self {
        let mut hasher = Blake3Hasher::default();
        hasher.update_str(lang.flags_var());
        for &node in inputs.iter().chain(&outputs) {
            hasher.update_str(tree.abspath(node).as_str());
        }

        let name = inputs
            .first()
            .map(|&node| tree.name(node).to_string())
            .unwrap_or_default();

        Self {
            uid: TaskId(hasher.into()),
            name,
            lang,
            inputs,
            outputs,
            env,
            strategy,
            cache_sig: Mutex::new(None),
            state: Mutex::new(TaskState::NotRun),
        }
    }

    pub fn uid(&self) -> TaskId {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Node] {
        &self.outputs
    }

    /// The source file; also the one node never listed as an implicit
    /// dependency of this task.
    pub fn primary_input(&self) -> Option<Node> {
        self.inputs.first().copied()
    }

    pub fn primary_output(&self) -> Option<Node> {
        self.outputs.first().copied()
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Compiler flags for the language of this task.
    pub fn flags(&self) -> &[String] {
        self.env.get(self.lang.flags_var())
    }

    pub fn strategy(&self) -> &dyn CompilerStrategy {
        &*self.strategy
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn cached_sig(&self) -> Option<Hash32> {
        *self.cache_sig.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_cached_sig(&self, sig: Hash32) {
        *self.cache_sig.lock().unwrap_or_else(PoisonError::into_inner) = Some(sig);
    }

    /// Forgets the memoized signature so the next request recomputes it.
    pub(crate) fn drop_cached_sig(&self) {
        self.cache_sig
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for CompileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileTask")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("lang", &self.lang)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl std::fmt::Display for CompileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.uid)
    }
}
