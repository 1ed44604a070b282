//! How a compilation task discovers its implicit dependencies.
//!
//! Every [`CompileTask`] carries one [`CompilerStrategy`], chosen by
//! [`select`] when the task is created:
//!
//! * [`GccDeps`] for compilers in the configured [`CompilerSet`]: the compiler
//!   is told to write a dependency file, which is read back once the task
//!   has run.
//! * [`Passthrough`] for everything else: dependencies come from the
//!   session's fallback [`Scanner`], and signature failures propagate.
//!
//! [`CompilerSet`]: crate::config::CompilerSet

use std::sync::Arc;

use crate::config::{Config, Env, Lang};
use crate::context::BuildContext;
use crate::core::Hash32;
use crate::error::{DepsError, SignatureError};
use crate::extract;
use crate::task::CompileTask;
use crate::tree::Node;

/// Outcome of the implicit-signature hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitSig {
    Known(Hash32),
    /// No signature could be computed. The task must be rebuilt.
    Nil,
}

/// Dependency scanner used when the compiler cannot report dependencies
/// itself, e.g. a preprocessor-emulating header scanner.
pub trait Scanner: Send + Sync {
    /// Returns the dependency nodes of `task` plus any names that could not
    /// be mapped to nodes.
    fn scan(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> anyhow::Result<(Vec<Node>, Vec<String>)>;
}

/// Scanner reporting no dependencies at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScanner;

impl Scanner for NoScanner {
    fn scan(&self, _: &BuildContext, _: &CompileTask) -> anyhow::Result<(Vec<Node>, Vec<String>)> {
        Ok((Vec::new(), Vec::new()))
    }
}

/// The hooks run around a compilation task.
pub trait CompilerStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adjusts the compiler environment before any task is created from it.
    fn inject_flags(&self, env: &mut Env, lang: Lang, config: &Config);

    /// Dependencies known before the task runs.
    fn scan(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> Result<(Vec<Node>, Vec<String>), DepsError>;

    /// Runs after the compiler succeeded; finishes with
    /// [`BuildContext::finish`].
    fn post_run(&self, ctx: &BuildContext, task: &CompileTask) -> Result<(), DepsError>;

    /// Signature over the implicit dependencies of `task`.
    fn sig_implicit_deps(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> Result<ImplicitSig, DepsError>;
}

/// Picks the strategy for tasks built from `env`.
pub fn select(env: &Env, config: &Config) -> Arc<dyn CompilerStrategy> {
    if config.compilers.contains(&env.cc_name) {
        Arc::new(GccDeps)
    } else {
        Arc::new(Passthrough)
    }
}

/// Default behavior, untouched by dependency files.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl CompilerStrategy for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn inject_flags(&self, _: &mut Env, _: Lang, _: &Config) {}

    fn scan(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> Result<(Vec<Node>, Vec<String>), DepsError> {
        ctx.scanner().scan(ctx, task).map_err(DepsError::Scan)
    }

    fn post_run(&self, ctx: &BuildContext, task: &CompileTask) -> Result<(), DepsError> {
        ctx.finish(task)
    }

    fn sig_implicit_deps(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> Result<ImplicitSig, DepsError> {
        match ctx.implicit_signature(task) {
            // the stale signature is gone now, the second pass rescans
            Err(DepsError::Signature(SignatureError::Rescan)) => ctx.implicit_signature(task),
            result => result,
        }
        .map(ImplicitSig::Known)
    }
}

/// Dependencies read from the Makefile rules written by `gcc -MD` and
/// compatible compilers.
#[derive(Debug, Default, Clone, Copy)]
pub struct GccDeps;

impl CompilerStrategy for GccDeps {
    fn name(&self) -> &'static str {
        "gccdeps"
    }

    fn inject_flags(&self, env: &mut Env, lang: Lang, config: &Config) {
        let var = lang.flags_var();
        if !env.get_flat(var).contains(&*config.flag) {
            env.append_value(var, [config.flag.to_string()]);
        }
    }

    /// The dependency file only exists once the compiler has run, so before
    /// that the best answer is whatever the previous run recorded.
    fn scan(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> Result<(Vec<Node>, Vec<String>), DepsError> {
        let nodes = ctx.store().node_deps(task.uid()).unwrap_or_default();
        Ok((nodes, Vec::new()))
    }

    fn post_run(&self, ctx: &BuildContext, task: &CompileTask) -> Result<(), DepsError> {
        let nodes = extract::extract(ctx, task)?;

        tracing::debug!(
            "deps: real scanner for {} returned {:?}",
            task,
            nodes
                .iter()
                .map(|&node| ctx.tree().abspath(node))
                .collect::<Vec<_>>()
        );

        ctx.store().record(task.uid(), nodes, Vec::new());
        task.drop_cached_sig();

        ctx.finish(task)
    }

    fn sig_implicit_deps(
        &self,
        ctx: &BuildContext,
        task: &CompileTask,
    ) -> Result<ImplicitSig, DepsError> {
        match ctx.implicit_signature(task) {
            Ok(sig) => Ok(ImplicitSig::Known(sig)),
            Err(DepsError::Signature(e)) => {
                tracing::debug!("no implicit signature for {}: {}", task, e);
                Ok(ImplicitSig::Nil)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::runner::Compiler;
    use crate::testing::{FakeGcc, Project};

    #[test]
    fn test_select_by_compiler_name() {
        let config = Config::new("/top", "/top/build");

        assert_eq!(select(&Env::new("gcc"), &config).name(), "gccdeps");
        assert_eq!(select(&Env::new("clang"), &config).name(), "gccdeps");
        assert_eq!(select(&Env::new("msvc"), &config).name(), "passthrough");

        let config = config.compiler("msvc");
        assert_eq!(select(&Env::new("msvc"), &config).name(), "gccdeps");
    }

    #[test]
    fn test_inject_flags_once() {
        let config = Config::new("/top", "/top/build");
        let mut env = Env::new("gcc");
        env.append_value("CFLAGS", ["-O2"]);

        GccDeps.inject_flags(&mut env, Lang::C, &config);
        GccDeps.inject_flags(&mut env, Lang::C, &config);
        assert_eq!(env.get("CFLAGS"), ["-O2", "-MD"]);
        assert!(env.get("CXXFLAGS").is_empty());

        GccDeps.inject_flags(&mut env, Lang::Cxx, &config.flag("-MMD"));
        assert_eq!(env.get("CXXFLAGS"), ["-MMD"]);
    }

    #[test]
    fn test_passthrough_leaves_flags_alone() {
        let config = Config::new("/top", "/top/build");
        let mut env = Env::new("msvc");

        Passthrough.inject_flags(&mut env, Lang::C, &config);
        assert!(env.get("CFLAGS").is_empty());
    }

    #[test]
    fn test_gccdeps_scan_returns_record() {
        let project = Project::new();
        project.write("main.c", "").write("a.h", "");

        let ctx = project.open();
        let tasks = project.tasks(&ctx, "gcc", &["main.c"]);
        let task = &tasks[0];

        assert_eq!(GccDeps.scan(&ctx, task).unwrap(), (vec![], vec![]));

        let header = ctx.tree().find_resource(ctx.srcnode(), &["a.h"]).unwrap();
        ctx.store().record(task.uid(), vec![header], Vec::new());
        assert_eq!(GccDeps.scan(&ctx, task).unwrap(), (vec![header], vec![]));
    }

    struct HeaderScanner(&'static str);

    impl Scanner for HeaderScanner {
        fn scan(
            &self,
            ctx: &BuildContext,
            _: &CompileTask,
        ) -> anyhow::Result<(Vec<Node>, Vec<String>)> {
            let node = ctx.tree().make_node(ctx.srcnode(), &[self.0]);
            Ok((vec![node], vec!["<stdio.h>".to_string()]))
        }
    }

    #[test]
    fn test_passthrough_uses_session_scanner() {
        let project = Project::new();
        project.write("main.c", "").write("a.h", "");

        let ctx = project.open().with_scanner(HeaderScanner("a.h"));
        let tasks = project.tasks(&ctx, "msvc", &["main.c"]);
        let task = &tasks[0];

        let sig = Passthrough.sig_implicit_deps(&ctx, task).unwrap();
        assert!(matches!(sig, ImplicitSig::Known(_)));

        let header = ctx.tree().find_resource(ctx.srcnode(), &["a.h"]).unwrap();
        assert_eq!(ctx.store().node_deps(task.uid()), Some(vec![header]));
        assert_eq!(ctx.store().raw_deps(task.uid()), Some(vec!["<stdio.h>".to_string()]));
    }

    #[test]
    fn test_missing_dependency_signature() {
        let project = Project::new();
        project.write("main.c", "");

        let ctx = project.open().with_scanner(HeaderScanner("gone.h"));
        let tasks = project.tasks(&ctx, "msvc", &["main.c"]);
        let task = &tasks[0];

        // passthrough reports the failure
        let err = Passthrough.sig_implicit_deps(&ctx, task).unwrap_err();
        assert!(matches!(
            err,
            DepsError::Signature(SignatureError::MissingNode { .. })
        ));

        // while gcc dependencies force a rebuild instead
        assert_eq!(GccDeps.sig_implicit_deps(&ctx, task).unwrap(), ImplicitSig::Nil);
    }

    #[test]
    fn test_passthrough_rescans_once() {
        let project = Project::new();
        project.write("main.c", "").write("a.h", "one");

        let ctx = project.open().with_scanner(HeaderScanner("a.h"));
        let tasks = project.tasks(&ctx, "msvc", &["main.c"]);
        let task = &tasks[0];

        let ImplicitSig::Known(before) = Passthrough.sig_implicit_deps(&ctx, task).unwrap() else {
            panic!("expected a signature");
        };

        project.write("a.h", "two");
        let ImplicitSig::Known(after) = Passthrough.sig_implicit_deps(&ctx, task).unwrap() else {
            panic!("expected a signature");
        };

        assert_ne!(before, after);
        assert_eq!(ctx.store().imp_sig(task.uid()), Some(after));
    }

    #[test]
    fn test_changed_header_gives_nil_signature() {
        let project = Project::new();
        project.write("main.c", "").write("a.h", "one");

        let ctx = project.open();
        let tasks = project.tasks(&ctx, "gcc", &["main.c"]);
        let task = &tasks[0];
        let header = ctx.tree().find_resource(ctx.srcnode(), &["a.h"]).unwrap();

        ctx.store().record(task.uid(), vec![header], Vec::new());
        let sig = ctx.signature(task).unwrap().unwrap();
        ctx.store().set_task_sig(task.uid(), sig);
        task.drop_cached_sig();

        project.write("a.h", "two");
        assert_eq!(GccDeps.sig_implicit_deps(&ctx, task).unwrap(), ImplicitSig::Nil);
        assert_eq!(ctx.store().imp_sig(task.uid()), None);
        assert_eq!(ctx.runnable_status(task).unwrap(), crate::context::RunStatus::Run);
    }

    #[test]
    fn test_post_run_without_depfile_fails() {
        let project = Project::new();
        project.write("main.c", "");

        let ctx = project.open();
        let tasks = project.tasks(&ctx, "gcc", &["main.c"]);
        let task = &tasks[0];

        let compiler = FakeGcc {
            skip_depfile: true,
            ..FakeGcc::default()
        };
        compiler.compile(&ctx, task).unwrap();

        let err = GccDeps.post_run(&ctx, task).unwrap_err();
        assert!(matches!(err, DepsError::DepFile { .. }));
        assert_eq!(ctx.store().node_deps(task.uid()), None);
        assert_eq!(ctx.store().task_sig(task.uid()), None);
    }

    #[test]
    fn test_post_run_records_and_refreshes_signature() {
        let project = Project::new();
        project
            .write("main.c", "#include \"a.h\"\n")
            .write("a.h", "");

        let ctx = project.open();
        let tasks = project.tasks(&ctx, "gcc", &["main.c"]);
        let task = &tasks[0];

        let stale = Hash32::hash("stale");
        task.set_cached_sig(stale);

        FakeGcc::default().compile(&ctx, task).unwrap();
        GccDeps.post_run(&ctx, task).unwrap();

        let header = ctx.tree().find_resource(ctx.srcnode(), &["a.h"]).unwrap();
        assert_eq!(ctx.store().node_deps(task.uid()), Some(vec![header]));
        assert_eq!(ctx.store().raw_deps(task.uid()), Some(vec![]));

        let stored = ctx.store().task_sig(task.uid()).unwrap();
        assert_ne!(stored, stale);
        assert_eq!(task.state(), crate::task::TaskState::Success);

        let tree_path = ctx.tree().abspath(task.primary_output().unwrap());
        assert!(fs::metadata(tree_path).is_ok());
    }
}
