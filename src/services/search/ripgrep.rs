use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use super::backend::{ScanBackend, ScanOptions};
use super::ignore::IgnoreSet;
use super::scanner::ScanOutput;
use crate::core::errors::{Error, Result};
use crate::models::file_entry::IndexedEntry;

/// Enumerates files with `rg --files`, synthesising directory entries from
/// the file paths it prints.
pub struct RipgrepBackend {
    program: String,
}

impl RipgrepBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, root: &Path, ignore: &IgnoreSet) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(root)
            .arg("--files")
            .arg("--hidden")
            .arg("--no-ignore")
            .arg("--path-separator")
            .arg("/")
            .arg("--sort")
            .arg("path");
        for glob in ignore.exclude_globs() {
            cmd.arg("--glob").arg(glob);
        }
        cmd.arg(".");
        cmd
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::ScanTool {
            tool: self.program.clone(),
            reason: reason.into(),
        }
    }
}

impl ScanBackend for RipgrepBackend {
    fn name(&self) -> &'static str {
        "ripgrep"
    }

    fn scan(&self, root: &Path, options: &ScanOptions<'_>) -> Result<ScanOutput> {
        let output = self
            .command(root, options.ignore)
            .output()
            .map_err(|e| self.error(format!("spawn failed: {e}")))?;

        // 0: files listed, 1: nothing listed.
        match output.status.code() {
            Some(0) | Some(1) => {}
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(self.error(format!(
                    "exit status {}: {}",
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                )));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(collect_entries(
            stdout.lines(),
            options.ignore,
            options.max_entries,
            self.name(),
        ))
    }
}

fn normalize(line: &str) -> Option<String> {
    let path = line.trim_end_matches('\r').replace('\\', "/");
    let path = path.strip_prefix("./").unwrap_or(&path);
    let path = path.trim_matches('/');
    if path.is_empty() || path == "." {
        None
    } else {
        Some(path.to_string())
    }
}

/// Turns listed file paths into a sorted, clipped entry list with every
/// non-ignored ancestor directory present exactly once.
pub(crate) fn collect_entries<'a>(
    lines: impl Iterator<Item = &'a str>,
    ignore: &IgnoreSet,
    max_entries: usize,
    strategy: &'static str,
) -> ScanOutput {
    let mut files = BTreeSet::new();
    let mut dirs = BTreeSet::new();

    for line in lines {
        let Some(path) = normalize(line) else {
            continue;
        };
        if ignore.matches_path(&path) {
            continue;
        }

        let mut end = path.len();
        while let Some(slash) = path[..end].rfind('/') {
            let ancestor = &path[..slash];
            // Ancestors of an already-seen directory are already recorded.
            if !dirs.insert(ancestor.to_string()) {
                break;
            }
            end = slash;
        }
        files.insert(path);
    }

    let mut entries: Vec<IndexedEntry> = dirs
        .into_iter()
        .filter(|dir| !files.contains(dir))
        .map(IndexedEntry::directory)
        .collect();
    entries.extend(files.into_iter().map(IndexedEntry::file));

    ScanOutput::finalize(entries, false, max_entries, strategy)
}
