use serde::{Deserialize, Serialize};

/// Which processes are reported, by their full command line.
///
/// Patterns are regular expressions searched anywhere in the command line;
/// anchor them explicitly (`^`, `$`) to match a prefix or a whole line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Commands {
    /// A process is kept when any of these match. An empty list keeps every
    /// process.
    pub includes: Vec<String>,

    /// A process is dropped when any of these match, even if it was included.
    pub excludes: Vec<String>,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            // kernel threads, as printed by `ps`
            excludes: vec![r"^\[.*\]".to_owned()],
        }
    }
}

impl Commands {
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.includes.iter().chain(&self.excludes).map(String::as_str)
    }
}
