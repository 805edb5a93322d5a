use crate::models::file_entry::IndexedEntry;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 50;

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Ranks `entries` (already in index order) against `query`.
///
/// An empty query browses the first `limit` entries. Otherwise matches fall
/// into three tiers, each keeping index order: the path starts with the
/// query, a path segment starts with it, or it appears anywhere.
pub fn rank<'a>(entries: &'a [IndexedEntry], query: &str, limit: usize) -> Vec<&'a IndexedEntry> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return entries.iter().take(limit).collect();
    }

    let segment_query = format!("/{query}");
    let mut prefix = Vec::new();
    let mut segment = Vec::new();
    let mut substring = Vec::new();

    for entry in entries {
        let path = entry.lower_path();
        if path.starts_with(&query) {
            prefix.push(entry);
            if prefix.len() >= limit {
                break;
            }
        } else if entry.lower_name().starts_with(&query) || path.contains(&segment_query) {
            segment.push(entry);
        } else if path.contains(&query) {
            substring.push(entry);
        }
    }

    prefix
        .into_iter()
        .chain(segment)
        .chain(substring)
        .take(limit)
        .collect()
}
