use std::cmp::Ordering;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A path discovered under an indexed root.
///
/// `path` is root-relative and `/`-separated. The lower-cased forms are
/// computed once here so repeated searches never allocate per entry.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedEntry {
    pub path: String,
    pub kind: EntryKind,
    #[serde(skip)]
    lower_path: String,
    #[serde(skip)]
    name_start: usize,
}

impl IndexedEntry {
    pub fn new(path: impl Into<String>, kind: EntryKind) -> Self {
        let path = path.into();
        let lower_path = path.to_lowercase();
        let name_start = lower_path.rfind('/').map(|i| i + 1).unwrap_or(0);
        Self {
            path,
            kind,
            lower_path,
            name_start,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, EntryKind::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, EntryKind::Directory)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn lower_path(&self) -> &str {
        &self.lower_path
    }

    pub fn lower_name(&self) -> &str {
        &self.lower_path[self.name_start..]
    }
}

impl PartialEq for IndexedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.kind == other.kind
    }
}

impl Eq for IndexedEntry {}

/// Directories first, then byte-wise by path.
pub fn index_order(a: &IndexedEntry, b: &IndexedEntry) -> Ordering {
    b.is_dir()
        .cmp(&a.is_dir())
        .then_with(|| a.path.cmp(&b.path))
}
