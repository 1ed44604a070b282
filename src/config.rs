use std::borrow::Cow;
use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::ArcStr;

/// The flag making GCC-compatible compilers write a `.d` file next to each
/// object.
pub const DEFAULT_FLAG: &str = "-MD";

/// File name of the persisted dependency state, relative to the build root.
pub const DEFAULT_STATE_FILE: &str = ".gccdeps.cbor";

/// Compilers known to emit Makefile-rule dependency files.
///
/// The set is open: tools wrapping a compatible compiler can register it with
/// [`push`](Self::push) before any task is generated. Names are never
/// removed.
#[derive(Debug, Clone)]
pub struct CompilerSet {
    names: Vec<ArcStr>,
}

impl CompilerSet {
    pub fn empty() -> Self {
        Self { names: Vec::new() }
    }

    pub fn push(&mut self, name: impl AsRef<str>) -> &mut Self {
        let name = name.as_ref();
        if !self.contains(name) {
            self.names.push(name.into());
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|known| &**known == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| &**name)
    }
}

impl Default for CompilerSet {
    fn default() -> Self {
        let mut set = Self::empty();
        set.push("gcc").push("icc").push("clang");
        set
    }
}

/// Settings of a build session.
///
/// # Example
///
/// ```rust,no_run
/// use gccdeps::Config;
///
/// let config = Config::new("project", "project/build")
///     .compiler("xgcc")
///     .go_absolute(false);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Source tree root.
    pub top: Utf8PathBuf,
    /// Build output root.
    pub out: Utf8PathBuf,
    /// Keep dependencies that live outside both the source and the build tree.
    pub go_absolute: bool,
    /// Compilers that get the dependency-file treatment.
    pub compilers: CompilerSet,
    /// Flag asking the compiler for a dependency file.
    pub flag: Cow<'static, str>,
    /// Name of the persisted dependency state inside `out`.
    pub state_file: Cow<'static, str>,
}

impl Config {
    pub fn new(top: impl Into<Utf8PathBuf>, out: impl Into<Utf8PathBuf>) -> Self {
        Self {
            top: top.into(),
            out: out.into(),
            go_absolute: false,
            compilers: CompilerSet::default(),
            flag: Cow::Borrowed(DEFAULT_FLAG),
            state_file: Cow::Borrowed(DEFAULT_STATE_FILE),
        }
    }

    pub fn go_absolute(mut self, value: bool) -> Self {
        self.go_absolute = value;
        self
    }

    pub fn compiler(mut self, name: impl AsRef<str>) -> Self {
        self.compilers.push(name);
        self
    }

    pub fn flag(mut self, flag: impl Into<Cow<'static, str>>) -> Self {
        self.flag = flag.into();
        self
    }

    pub fn state_file(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.state_file = name.into();
        self
    }

    pub(crate) fn state_path(&self, out: &Utf8Path) -> Utf8PathBuf {
        out.join(&*self.state_file)
    }
}

/// Source language of a compilation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    C,
    Cxx,
}

impl Lang {
    /// Name of the flag list the compiler reads for this language.
    pub fn flags_var(self) -> &'static str {
        match self {
            Lang::C => "CFLAGS",
            Lang::Cxx => "CXXFLAGS",
        }
    }

    /// Infers the language from a source file extension.
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        match path.extension()? {
            "c" => Some(Lang::C),
            "cc" | "cpp" | "cxx" | "c++" | "C" => Some(Lang::Cxx),
            _ => None,
        }
    }
}

/// Compiler environment of a task generator: compiler name plus named flag
/// lists.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub cc_name: String,
    vars: BTreeMap<String, Vec<String>>,
}

impl Env {
    pub fn new(cc_name: impl Into<String>) -> Self {
        Self {
            cc_name: cc_name.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn get(&self, var: &str) -> &[String] {
        self.vars.get(var).map(Vec::as_slice).unwrap_or_default()
    }

    /// The flag list joined by single spaces.
    pub fn get_flat(&self, var: &str) -> String {
        self.get(var).join(" ")
    }

    pub fn append_value<I, S>(&mut self, var: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vars
            .entry(var.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_set_is_append_only() {
        let mut set = CompilerSet::default();
        assert!(set.contains("gcc"));
        assert!(!set.contains("msvc"));

        set.push("xgcc").push("gcc");
        assert!(set.contains("xgcc"));
        assert_eq!(set.iter().filter(|name| *name == "gcc").count(), 1);
    }

    #[test]
    fn test_lang_from_path() {
        assert_eq!(Lang::from_path(Utf8Path::new("a/main.c")), Some(Lang::C));
        assert_eq!(Lang::from_path(Utf8Path::new("a/main.cpp")), Some(Lang::Cxx));
        assert_eq!(Lang::from_path(Utf8Path::new("a/main.h")), None);
        assert_eq!(Lang::from_path(Utf8Path::new("Makefile")), None);
    }

    #[test]
    fn test_env_flat() {
        let mut env = Env::new("gcc");
        env.append_value("CFLAGS", ["-O2", "-Wall"]);
        assert_eq!(env.get_flat("CFLAGS"), "-O2 -Wall");
        assert_eq!(env.get_flat("CXXFLAGS"), "");
    }
}
