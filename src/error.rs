use camino::Utf8PathBuf;
use thiserror::Error;

/// Failure of a single task hook.
///
/// Every variant aborts only the hook of the task that produced it; the
/// shared path cache and the other tasks of the batch are unaffected.
#[derive(Debug, Error)]
pub enum DepsError {
    #[error("could not find '{path}' for task '{task}'")]
    Unresolved { path: String, task: String },

    #[error("Couldn't read dependency file '{path}'.\n{source}")]
    DepFile {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task '{0}' did not create output '{1}'")]
    MissingOutput(String, Utf8PathBuf),

    #[error("Dependency scanner failed.\n{0}")]
    Scan(anyhow::Error),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Failure of the generic implicit-signature algorithm.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Missing signature for node '{path}'.\n{source}")]
    MissingNode {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Implicit dependencies changed, rescan required")]
    Rescan,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't decode dependency state.\n{0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("Couldn't encode dependency state.\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Dependency state has format version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Source file '{0}' not found")]
    SourceNotFound(Utf8PathBuf),

    #[error("Source file '{0}' is neither C nor C++")]
    UnsupportedSource(Utf8PathBuf),

    #[error("Task '{0}':\n{1}")]
    Task(String, DepsError),

    #[error("Task '{0}' failed to compile:\n{1}")]
    Compile(String, anyhow::Error),

    #[error("Error while accessing the dependency state:\n{0}")]
    Store(#[from] StoreError),
}
