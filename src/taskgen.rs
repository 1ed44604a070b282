use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{Env, Lang};
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::strategy;
use crate::task::CompileTask;
use crate::tree;

/// Describes a set of sources compiled with one compiler environment.
///
/// # Example
///
/// ```rust,no_run
/// use gccdeps::{BuildContext, Config, Env, TaskGen};
///
/// let ctx = BuildContext::open(Config::new(".", "build"))?;
///
/// let mut env = Env::new("gcc");
/// env.append_value("CFLAGS", ["-O2"]);
///
/// let tasks = TaskGen::new("app", env)
///     .source("src/main.c")
///     .source_glob("src/lib/*.c")
///     .process_source(&ctx)?;
/// # Ok::<(), gccdeps::BuildError>(())
/// ```
pub struct TaskGen {
    name: String,
    env: Env,
    sources: Vec<Utf8PathBuf>,
    globs: Vec<String>,
}

impl TaskGen {
    pub fn new(name: impl Into<String>, env: Env) -> Self {
        Self {
            name: name.into(),
            env,
            sources: Vec::new(),
            globs: Vec::new(),
        }
    }

    /// Adds a source file, relative to the source root.
    pub fn source(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    /// Adds every file matching a glob pattern, relative to the source root.
    pub fn source_glob(mut self, pattern: impl Into<String>) -> Self {
        self.globs.push(pattern.into());
        self
    }

    fn collect_sources(&self, top: &Utf8Path) -> Result<Vec<Utf8PathBuf>, BuildError> {
        let mut files = self.sources.clone();

        for pattern in &self.globs {
            let pattern = top.join(pattern);
            for path in glob::glob(pattern.as_str())? {
                let path = Utf8PathBuf::try_from(path?)?;
                let path = match path.strip_prefix(top) {
                    Ok(relative) => relative.to_path_buf(),
                    Err(_) => path,
                };
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    /// Turns the sources into compilation tasks.
    ///
    /// The strategy is selected once for the whole generator, and its flags
    /// are injected into the environment before the first task is created.
    /// Tasks only ever see the frozen environment.
    pub fn process_source(self, ctx: &BuildContext) -> Result<Vec<CompileTask>, BuildError> {
        let tree = ctx.tree();
        let top = tree.abspath(ctx.srcnode());
        let files = self.collect_sources(&top)?;

        let mut langs = Vec::new();
        for file in &files {
            let lang =
                Lang::from_path(file).ok_or_else(|| BuildError::UnsupportedSource(file.clone()))?;
            langs.push(lang);
        }

        let TaskGen { name, mut env, .. } = self;
        let strategy = strategy::select(&env, ctx.config());

        for lang in [Lang::C, Lang::Cxx] {
            if langs.contains(&lang) {
                strategy.inject_flags(&mut env, lang, ctx.config());
            }
        }

        let env = Arc::new(env);
        let index = ctx.next_generator_index();
        let mut tasks = Vec::with_capacity(files.len());

        for (file, lang) in files.into_iter().zip(langs) {
            let input = tree
                .find_resource(ctx.srcnode(), &tree::segments(&file))
                .ok_or_else(|| BuildError::SourceNotFound(top.join(&file)))?;

            let relative = tree
                .relpath(input, ctx.srcnode())
                .unwrap_or_else(|| Utf8PathBuf::from(&*tree.name(input)));
            let object = relative.with_extension(format!("{index}.o"));
            let output = tree.make_node(ctx.bldnode(), &tree::segments(&object));

            tasks.push(CompileTask::new(
                tree,
                lang,
                vec![input],
                vec![output],
                env.clone(),
                strategy.clone(),
            ));
        }

        tracing::debug!(
            generator = %name,
            strategy = strategy.name(),
            tasks = tasks.len(),
            "created compilation tasks"
        );

        Ok(tasks)
    }
}
