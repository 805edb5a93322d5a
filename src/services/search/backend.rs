use std::path::Path;

use super::ignore::IgnoreSet;
use super::scanner::ScanOutput;
use crate::core::errors::Result;

/// Inputs shared by every scan strategy.
pub struct ScanOptions<'a> {
    pub ignore: &'a IgnoreSet,
    pub max_entries: usize,
}

/// One way of enumerating the paths under a root.
///
/// Implementations are blocking and are run on a blocking worker. The output
/// must already be sorted with [`index_order`](crate::models::file_entry::index_order)
/// and clipped to `max_entries`.
pub trait ScanBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn scan(&self, root: &Path, options: &ScanOptions<'_>) -> Result<ScanOutput>;
}
