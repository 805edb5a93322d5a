pub mod api;
pub mod core;
pub mod models;
pub mod services;

pub use crate::core::config::IndexConfig;
pub use crate::core::errors::{Error, Result};
pub use crate::models::file_entry::{EntryKind, IndexedEntry};
pub use crate::services::search::indexer::{IndexManager, IndexStatus, SearchResponse};
