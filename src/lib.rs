#![forbid(unsafe_code)]
//! Implicit dependency tracking for C and C++ compilation tasks, driven by
//! the Makefile rules that `gcc -MD` and compatible compilers write next to
//! every object file.
//!
//! ```rust,no_run
//! use gccdeps::{BuildContext, CommandCompiler, Config, Env, TaskGen};
//!
//! let ctx = BuildContext::open(Config::new(".", "build"))?;
//! let tasks = TaskGen::new("app", Env::new("gcc"))
//!     .source_glob("src/*.c")
//!     .process_source(&ctx)?;
//!
//! gccdeps::run(&ctx, &tasks, &CommandCompiler).into_result()?;
//! ctx.save()?;
//! # Ok::<(), gccdeps::BuildError>(())
//! ```

mod cache;
mod config;
mod context;
mod core;
pub mod depfile;
mod error;
mod extract;
mod record;
mod runner;
mod strategy;
mod task;
mod taskgen;
mod tree;
mod utils;

#[cfg(test)]
mod testing;

pub use crate::cache::PathCache;
pub use crate::config::{CompilerSet, Config, DEFAULT_FLAG, DEFAULT_STATE_FILE, Env, Lang};
pub use crate::context::{BuildContext, RunStatus};
pub use crate::core::{Hash32, TaskId};
pub use crate::error::*;
pub use crate::extract::{Extractor, climb, depfile_path, extract};
pub use crate::record::DepStore;
pub use crate::runner::{CommandCompiler, Compiler, Report, run};
pub use crate::strategy::{
    CompilerStrategy, GccDeps, ImplicitSig, NoScanner, Passthrough, Scanner, select,
};
pub use crate::task::{CompileTask, TaskState};
pub use crate::taskgen::TaskGen;
pub use crate::tree::{FileTree, Node, NodeLookup};

/// Installs a `tracing` subscriber printing to stderr, filtered by
/// `RUST_LOG` and defaulting to `info`. Progress bars of running builds are
/// drawn below the log lines.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif_layer = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init();
}
