use std::fs;
use std::path::Path;

use walkdir::{DirEntry, WalkDir};

use super::backend::{ScanBackend, ScanOptions};
use super::scanner::ScanOutput;
use crate::core::errors::Result;
use crate::models::file_entry::IndexedEntry;

/// Portable depth-first walk used when the accelerated strategy is unavailable.
///
/// Symlinks are neither followed nor indexed, ignored names are dropped (a
/// directory is not descended into, a file is not listed), and unreadable
/// subdirectories are skipped.
pub struct WalkBackend;

impl ScanBackend for WalkBackend {
    fn name(&self) -> &'static str {
        "walk"
    }

    fn scan(&self, root: &Path, options: &ScanOptions<'_>) -> Result<ScanOutput> {
        // An unreadable root is a scan failure, not an empty tree.
        fs::read_dir(root)?;

        let ignore = options.ignore;
        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !is_ignored(entry, |name| ignore.contains(name)));

        let mut entries = Vec::new();
        let mut truncated = false;
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::trace!("walk error: {}", e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() || !(file_type.is_dir() || file_type.is_file()) {
                continue;
            }

            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };

            if entries.len() >= options.max_entries {
                truncated = true;
                break;
            }

            entries.push(if file_type.is_dir() {
                IndexedEntry::directory(relative)
            } else {
                IndexedEntry::file(relative)
            });
        }

        Ok(ScanOutput::finalize(
            entries,
            truncated,
            options.max_entries,
            self.name(),
        ))
    }
}

// Same rule as `--glob !name`: any entry whose basename is ignored.
fn is_ignored(entry: &DirEntry, ignored: impl Fn(&str) -> bool) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().map_or(false, ignored)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
