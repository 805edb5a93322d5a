use std::collections::HashSet;

use crate::core::config::DEFAULT_IGNORED_DIRS;

/// Directory basenames that are never indexed or descended into.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    names: HashSet<String>,
}

impl IgnoreSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// True if any segment of a relative path is ignored. Accepts either separator.
    pub fn matches_path(&self, path: &str) -> bool {
        path.split(['/', '\\']).any(|segment| self.contains(segment))
    }

    /// Negated glob arguments for `rg --glob`, sorted for stable command lines.
    pub fn exclude_globs(&self) -> Vec<String> {
        let mut globs: Vec<String> = self.names.iter().map(|name| format!("!{name}")).collect();
        globs.sort();
        globs
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_DIRS.iter().copied())
    }
}
