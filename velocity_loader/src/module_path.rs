use std::fmt::Display;
use std::path::PathBuf;

/// The ordered list of directories searched for `.elp` module files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModulePath {
    entries: Vec<PathBuf>,
}

impl ModulePath {
    /// Creates a new `ModulePath` with the given directories.
    #[must_use]
    pub fn new(entries: Vec<PathBuf>) -> Self {
        ModulePath { entries }
    }

    /// Creates a new `ModulePath` from a `:`-separated string.
    pub fn from<S: AsRef<str>>(module_path: S) -> Self {
        let entries = module_path
            .as_ref()
            .split(':')
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();
        ModulePath::new(entries)
    }

    /// Append a directory to the search list.
    pub fn push(&mut self, entry: PathBuf) {
        self.entries.push(entry);
    }

    /// Returns an iterator over the search directories.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter()
    }

    /// Find the file for the named module: the first `<dir>/<name>.elp` that exists.
    #[must_use]
    pub fn find_module(&self, name: &str) -> Option<PathBuf> {
        for entry in &self.entries {
            let candidate = entry.join(format!("{name}.elp"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Display for ModulePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .entries
            .iter()
            .map(|entry| entry.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        write!(f, "{entries}")
    }
}
