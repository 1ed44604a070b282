//! Fixtures shared by the unit tests.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::config::{Config, Env};
use crate::context::BuildContext;
use crate::extract::depfile_path;
use crate::runner::Compiler;
use crate::task::CompileTask;
use crate::taskgen::TaskGen;

/// A source tree in a temporary directory, with the build directory at
/// `<top>/build`.
pub(crate) struct Project {
    _guard: TempDir,
    pub top: Utf8PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let guard = TempDir::new().unwrap();
        let top = Utf8PathBuf::try_from(guard.path().canonicalize().unwrap()).unwrap();
        Self { _guard: guard, top }
    }

    pub fn out(&self) -> Utf8PathBuf {
        self.top.join("build")
    }

    pub fn write(&self, path: &str, text: &str) -> &Self {
        let path = self.top.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
        self
    }

    pub fn config(&self) -> Config {
        Config::new(self.top.clone(), self.out())
    }

    pub fn open(&self) -> BuildContext {
        BuildContext::open(self.config()).unwrap()
    }

    pub fn tasks(&self, ctx: &BuildContext, cc: &str, sources: &[&str]) -> Vec<CompileTask> {
        let mut taskgen = TaskGen::new("test", Env::new(cc));
        for source in sources {
            taskgen = taskgen.source(*source);
        }
        taskgen.process_source(ctx).unwrap()
    }
}

/// Stands in for `gcc -MD`.
///
/// Copies the source into the object file and writes a dependency file
/// listing the source plus every `#include "..."` line, resolved next to the
/// source. Headers are not followed recursively.
#[derive(Default)]
pub(crate) struct FakeGcc {
    pub runs: AtomicUsize,
    pub skip_depfile: bool,
}

impl FakeGcc {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

fn includes(source: &str) -> impl Iterator<Item = &str> {
    source.lines().filter_map(|line| {
        line.trim()
            .strip_prefix("#include \"")
            .and_then(|rest| rest.strip_suffix('"'))
    })
}

impl Compiler for FakeGcc {
    fn compile(&self, ctx: &BuildContext, task: &CompileTask) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let tree = ctx.tree();
        let input = tree.abspath(task.primary_input().context("no input")?);
        let output = tree.abspath(task.primary_output().context("no output")?);
        let source = fs::read_to_string(&input)?;

        fs::create_dir_all(output.parent().unwrap_or(Utf8Path::new("/")))?;
        fs::write(&output, &source)?;

        if self.skip_depfile {
            return Ok(());
        }

        let dir = input.parent().unwrap_or(Utf8Path::new("/"));
        let mut rule = format!("{}: {}", output.file_name().unwrap_or_default(), input);
        for header in includes(&source) {
            rule.push_str(" \\\n  ");
            rule.push_str(&dir.join(header).as_str().replace(' ', "\\ "));
        }
        rule.push('\n');

        fs::write(depfile_path(&output), rule)?;
        Ok(())
    }
}
