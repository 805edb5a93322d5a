use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::core::errors::{Error, Result};

/// Directory basenames excluded from every scan, matched at any depth.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".cache",
    ".next",
    ".nuxt",
    ".turbo",
    ".parcel-cache",
    ".gradle",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    "node_modules",
    "bower_components",
    ".yarn",
    ".pnpm-store",
    "target",
    "build",
    "dist",
    "out",
    "coverage",
];

pub const DEFAULT_MAX_ENTRIES: usize = 200_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;
pub const DEFAULT_IDLE_TTL_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;

/// Construction-time settings for [`IndexManager`](crate::IndexManager).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub ignored_dirs: Vec<String>,
    pub max_entries: usize,
    pub debounce_ms: u64,
    pub idle_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    pub ripgrep_path: String,
    pub use_ripgrep: bool,
    /// Attach filesystem watchers. Off means indexes only refresh on demand.
    pub watch: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
            max_entries: DEFAULT_MAX_ENTRIES,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            idle_ttl_ms: DEFAULT_IDLE_TTL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            ripgrep_path: "rg".to_string(),
            use_ripgrep: true,
            watch: true,
        }
    }
}

impl IndexConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: IndexConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Config("max_entries must be greater than zero".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config(
                "sweep_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
