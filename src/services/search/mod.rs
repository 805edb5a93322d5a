pub mod backend;
pub mod ignore;
pub mod indexer;
pub mod ranking;
pub mod ripgrep;
pub mod scanner;
pub mod walker;
pub mod watcher;

pub use backend::{ScanBackend, ScanOptions};
pub use ignore::IgnoreSet;
pub use indexer::{IndexManager, IndexStatus, RebuildReason, SearchResponse};
pub use scanner::{ScanOutput, Scanner};
pub use watcher::{FileWatcher, WatchMode};
