//! Running a batch of compilation tasks on the worker pool.

use std::fs;
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context as _, anyhow};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::context::{BuildContext, RunStatus};
use crate::error::{BuildError, DepsError};
use crate::task::{CompileTask, TaskState};

/// Whatever turns the source of a task into its object file.
pub trait Compiler: Send + Sync {
    fn compile(&self, ctx: &BuildContext, task: &CompileTask) -> anyhow::Result<()>;
}

impl<F> Compiler for F
where
    F: Fn(&BuildContext, &CompileTask) -> anyhow::Result<()> + Send + Sync,
{
    fn compile(&self, ctx: &BuildContext, task: &CompileTask) -> anyhow::Result<()> {
        self(ctx, task)
    }
}

/// Spawns the compiler named by the task environment:
///
/// ```text
/// <cc_name> <flags...> -c <input> -o <output>
/// ```
///
/// The process runs in the build directory, so relative paths written to
/// dependency files are relative to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandCompiler;

impl Compiler for CommandCompiler {
    fn compile(&self, ctx: &BuildContext, task: &CompileTask) -> anyhow::Result<()> {
        let tree = ctx.tree();
        let input = task
            .primary_input()
            .map(|node| tree.abspath(node))
            .ok_or_else(|| anyhow!("task has no input"))?;
        let output = task
            .primary_output()
            .map(|node| tree.abspath(node))
            .ok_or_else(|| anyhow!("task has no output"))?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Couldn't create directory {parent}"))?;
        }

        let result = Command::new(&task.env().cc_name)
            .args(task.flags())
            .arg("-c")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .current_dir(tree.abspath(ctx.bldnode()))
            .output()
            .with_context(|| format!("Couldn't spawn {}", task.env().cc_name))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(anyhow!(
                "{} exited with {}\n{}",
                task.env().cc_name,
                result.status,
                stderr.trim_end()
            ));
        }

        Ok(())
    }
}

/// Outcome of a batch of tasks.
#[derive(Debug, Default)]
pub struct Report {
    pub executed: usize,
    pub skipped: usize,
    pub failed: Vec<(String, BuildError)>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turns the first failure into an error.
    pub fn into_result(mut self) -> Result<Self, BuildError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            let (_, error) = self.failed.remove(0);
            Err(error)
        }
    }
}

enum Outcome {
    Executed,
    Skipped,
}

fn run_task(
    ctx: &BuildContext,
    task: &CompileTask,
    compiler: &dyn Compiler,
) -> Result<Outcome, BuildError> {
    let wrap = |e: DepsError| BuildError::Task(task.to_string(), e);

    if ctx.runnable_status(task).map_err(wrap)? == RunStatus::Skip {
        task.set_state(TaskState::Skipped);
        return Ok(Outcome::Skipped);
    }

    compiler
        .compile(ctx, task)
        .map_err(|e| BuildError::Compile(task.to_string(), e))?;

    task.strategy().post_run(ctx, task).map_err(wrap)?;

    Ok(Outcome::Executed)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}

/// Runs every task that is out of date, in parallel.
///
/// Tasks are independent of each other. A failing task is recorded in the
/// report and does not stop the rest of the batch.
pub fn run(ctx: &BuildContext, tasks: &[CompileTask], compiler: &dyn Compiler) -> Report {
    if tasks.is_empty() {
        return Report::default();
    }

    let report = Mutex::new(Report::default());

    let root_span = tracing::span!(Level::INFO, "building_tasks");
    root_span.pb_set_length(tasks.len() as u64);
    root_span.pb_set_style(&crate::utils::get_style_build());
    root_span.pb_set_message("Compiling...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task();

    tasks.par_iter().for_each(|task| {
        let span = tracing::span!(parent: &root_span, Level::INFO, "task", name = task.name());
        span.pb_set_style(&pb_style);
        span.pb_set_message(&format!("Compiling {}", task.name()));
        let _enter = span.enter();

        // shared state is only touched under locks
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_task(ctx, task, compiler)
        })) {
            Ok(result) => result,
            Err(panic) => Err(BuildError::Compile(
                task.to_string(),
                anyhow!(panic_message(panic)),
            )),
        };

        let mut report = report.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(Outcome::Executed) => report.executed += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) => {
                tracing::error!("{}", e);
                task.set_state(TaskState::Failed);
                report.failed.push((task.name().to_string(), e));
            }
        }
        drop(report);

        root_span.pb_inc(1);
    });

    let report = report.into_inner().unwrap_or_else(PoisonError::into_inner);

    tracing::info!(
        executed = report.executed,
        skipped = report.skipped,
        failed = report.failed.len(),
        "build finished"
    );

    report
}
