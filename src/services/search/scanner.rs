use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::backend::{ScanBackend, ScanOptions};
use super::ignore::IgnoreSet;
use super::ripgrep::RipgrepBackend;
use super::walker::WalkBackend;
use crate::core::config::IndexConfig;
use crate::core::errors::Result;
use crate::models::file_entry::{index_order, IndexedEntry};

/// Result of one scan of a root.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub entries: Vec<IndexedEntry>,
    pub truncated: bool,
    pub strategy: &'static str,
}

impl ScanOutput {
    /// Sorts `entries` and clips them to `max_entries`.
    pub fn finalize(
        mut entries: Vec<IndexedEntry>,
        mut truncated: bool,
        max_entries: usize,
        strategy: &'static str,
    ) -> Self {
        entries.sort_by(index_order);
        if entries.len() > max_entries {
            entries.truncate(max_entries);
            truncated = true;
        }
        Self {
            entries,
            truncated,
            strategy,
        }
    }
}

/// Produces the flat entry list for a root, preferring the accelerated
/// strategy and falling back to the manual walk.
#[derive(Clone)]
pub struct Scanner {
    primary: Option<Arc<dyn ScanBackend>>,
    fallback: Arc<dyn ScanBackend>,
    ignore: Arc<IgnoreSet>,
    max_entries: usize,
}

impl Scanner {
    pub fn from_config(config: &IndexConfig) -> Self {
        let primary: Option<Arc<dyn ScanBackend>> = if config.use_ripgrep {
            Some(Arc::new(RipgrepBackend::new(config.ripgrep_path.clone())))
        } else {
            None
        };
        Self::with_backends(
            primary,
            Arc::new(WalkBackend),
            IgnoreSet::new(config.ignored_dirs.iter().cloned()),
            config.max_entries,
        )
    }

    pub fn with_backends(
        primary: Option<Arc<dyn ScanBackend>>,
        fallback: Arc<dyn ScanBackend>,
        ignore: IgnoreSet,
        max_entries: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            ignore: Arc::new(ignore),
            max_entries: max_entries.max(1),
        }
    }

    pub fn ignore(&self) -> &Arc<IgnoreSet> {
        &self.ignore
    }

    pub fn scan(&self, root: &Path) -> Result<ScanOutput> {
        let options = ScanOptions {
            ignore: &self.ignore,
            max_entries: self.max_entries,
        };
        let started = Instant::now();

        if let Some(primary) = &self.primary {
            match primary.scan(root, &options) {
                Ok(output) => {
                    debug!(
                        root = %root.display(),
                        strategy = output.strategy,
                        entries = output.entries.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "scan finished"
                    );
                    return Ok(output);
                }
                Err(e) => {
                    debug!(
                        root = %root.display(),
                        strategy = primary.name(),
                        fallback = self.fallback.name(),
                        "scan strategy failed, falling back: {}",
                        e
                    );
                }
            }
        }

        let output = self.fallback.scan(root, &options)?;
        debug!(
            root = %root.display(),
            strategy = output.strategy,
            entries = output.entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished"
        );
        Ok(output)
    }
}
