use anyhow::Result;
use dirindex::core::errors::Error;
use dirindex::services::search::walker::WalkBackend;
use dirindex::services::search::{
    IgnoreSet, IndexManager, ScanBackend, ScanOptions, ScanOutput, Scanner, SearchResponse,
};
use dirindex::{EntryKind, IndexConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn walk_config() -> IndexConfig {
    IndexConfig {
        use_ripgrep: false,
        ..IndexConfig::default()
    }
}

async fn wait_ready(manager: &IndexManager, key: &str, root: &Path) -> SearchResponse {
    let poll = async {
        loop {
            let response = manager.search(key, root, "", Some(50));
            if !response.indexing {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("index never became ready")
}

fn paths(response: &SearchResponse) -> Vec<&str> {
    response.entries.iter().map(|e| e.path.as_str()).collect()
}

fn write(root: &Path, relative: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, relative)?;
    Ok(())
}

/// Walks the tree but counts calls, can hold its first scan open, and can
/// start failing after a number of successful scans.
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
    hold_first: AtomicBool,
    released: AtomicBool,
    fail_after: Option<usize>,
}

impl CountingBackend {
    fn holding() -> Self {
        Self {
            hold_first: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl ScanBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn scan(&self, root: &Path, options: &ScanOptions<'_>) -> dirindex::Result<ScanOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == 1 && self.hold_first.load(Ordering::SeqCst) {
            while !self.released.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if self.fail_after.map_or(false, |limit| call > limit) {
            return Err(Error::Other("disk went away".into()));
        }
        WalkBackend.scan(root, options)
    }
}

fn counting_manager(config: IndexConfig, backend: Arc<CountingBackend>) -> IndexManager {
    // Writes made by the tests must not race a watcher-driven rebuild.
    let config = IndexConfig {
        watch: false,
        ..config
    };
    let scanner = Scanner::with_backends(
        None,
        backend,
        IgnoreSet::new(config.ignored_dirs.iter().cloned()),
        config.max_entries,
    );
    IndexManager::with_scanner(config, scanner)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_indexing_workflow() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "a/b/c.txt")?;
    write(root, "README.md")?;
    write(root, "node_modules/react/index.js")?;
    write(root, "web/node_modules/vue/index.js")?;
    write(root, "web/.git/HEAD")?;
    write(root, "web/app.ts")?;

    let manager = IndexManager::new(walk_config());
    manager.ensure_index("session", root);

    let response = wait_ready(&manager, "session", root).await;
    assert!(!response.truncated);
    assert_eq!(
        paths(&response),
        vec!["a", "a/b", "web", "README.md", "a/b/c.txt", "web/app.ts"]
    );
    assert_eq!(response.entries[0].kind, EntryKind::Directory);

    let status = manager.status("session").expect("status");
    assert_eq!(status.entries, 6);
    assert_eq!(status.last_strategy, Some("walk"));
    assert!(status.last_indexed_at.is_some());

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn default_strategy_matches_walk() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "src/lib.rs")?;
    write(root, "src/bin/cli.rs")?;
    write(root, ".github/workflows/ci.yml")?;
    write(root, "target/debug/app")?;
    write(root, "scripts/build")?;
    write(root, "scripts/build.sh")?;

    let walked = IndexManager::new(walk_config());
    let preferred = IndexManager::new(IndexConfig::default());

    let expected = wait_ready(&walked, "k", root).await;
    let actual = wait_ready(&preferred, "k", root).await;
    assert_eq!(paths(&actual), paths(&expected));
    assert_eq!(
        paths(&expected),
        vec![
            ".github",
            ".github/workflows",
            "scripts",
            "src",
            "src/bin",
            ".github/workflows/ci.yml",
            "scripts/build.sh",
            "src/bin/cli.rs",
            "src/lib.rs"
        ]
    );

    walked.dispose();
    preferred.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn search_ranks_segment_matches_before_substrings() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "src/index.ts")?;
    write(root, "src/utils/router.ts")?;
    write(root, "packages/api/router.ts")?;
    write(root, "src/approuter.ts")?;

    let manager = IndexManager::new(walk_config());
    wait_ready(&manager, "k", root).await;

    let response = manager.search("k", root, "Router", None);
    assert_eq!(
        paths(&response),
        vec![
            "packages/api/router.ts",
            "src/utils/router.ts",
            "src/approuter.ts"
        ]
    );

    let browse = manager.search("k", root, "", Some(5));
    let everything = manager.search("k", root, "", Some(50));
    assert_eq!(browse.entries.len(), 5);
    assert_eq!(paths(&browse), paths(&everything)[..5].to_vec());

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_tree_is_truncated() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    for i in 0..12 {
        write(root, &format!("file{i:02}.txt"))?;
    }

    let manager = IndexManager::new(IndexConfig {
        max_entries: 5,
        ..walk_config()
    });
    let response = wait_ready(&manager, "k", root).await;
    assert!(response.truncated);
    assert_eq!(response.entries.len(), 5);
    assert_eq!(manager.status("k").map(|s| s.entries), Some(5));

    // A narrow query still reports that the index itself is clipped.
    let narrow = manager.search("k", root, "file00", Some(1));
    assert!(narrow.truncated);

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn changing_root_resets_the_index() -> Result<()> {
    let first = tempdir()?;
    let second = tempdir()?;
    write(first.path(), "alpha.txt")?;
    write(second.path(), "beta.txt")?;

    let manager = IndexManager::new(walk_config());
    let response = wait_ready(&manager, "k", first.path()).await;
    assert_eq!(paths(&response), vec!["alpha.txt"]);

    manager.ensure_index("k", second.path());
    let response = wait_ready(&manager, "k", second.path()).await;
    assert_eq!(paths(&response), vec!["beta.txt"]);
    assert_eq!(manager.len(), 1);
    assert_eq!(
        manager.status("k").map(|s| s.root),
        Some(second.path().to_path_buf())
    );

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_indexes_are_evicted_and_rebuilt_on_demand() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "main.rs")?;

    let backend = Arc::new(CountingBackend::default());
    let manager = counting_manager(
        IndexConfig {
            idle_ttl_ms: 50,
            ..walk_config()
        },
        backend.clone(),
    );
    wait_ready(&manager, "k", root).await;
    assert_eq!(manager.evict_idle(), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(manager.evict_idle(), 1);
    assert!(manager.status("k").is_none());
    assert!(manager.is_empty());

    manager.ensure_index("k", root);
    assert!(manager.status("k").is_some());
    let response = wait_ready(&manager, "k", root).await;
    assert_eq!(paths(&response), vec!["main.rs"]);
    assert_eq!(backend.calls(), 2);

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn scanning_index_is_not_evicted() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "main.rs")?;

    let backend = Arc::new(CountingBackend::holding());
    let manager = counting_manager(
        IndexConfig {
            idle_ttl_ms: 0,
            ..walk_config()
        },
        backend.clone(),
    );
    manager.ensure_index("k", root);
    while backend.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.evict_idle(), 0);
    assert!(manager.status("k").is_some());

    backend.release();
    let poll = async {
        while manager.status("k").map_or(false, |s| s.indexing) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.evict_idle(), 1);

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rebuilds_requested_mid_scan_run_once() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "one.txt")?;

    let backend = Arc::new(CountingBackend::holding());
    let manager = counting_manager(walk_config(), backend.clone());
    manager.ensure_index("k", root);
    while backend.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    write(root, "two.txt")?;
    assert!(manager.refresh("k"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(manager.refresh("k"));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let during = manager.search("k", root, "", None);
    assert!(during.indexing);
    assert!(during.entries.is_empty());
    assert_eq!(backend.calls(), 1);

    backend.release();
    let response = wait_ready(&manager, "k", root).await;
    assert_eq!(backend.calls(), 2);
    assert_eq!(paths(&response), vec!["one.txt", "two.txt"]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.calls(), 2);

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn change_bursts_are_debounced_into_one_rebuild() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "one.txt")?;

    let backend = Arc::new(CountingBackend::default());
    let manager = counting_manager(
        IndexConfig {
            debounce_ms: 200,
            ..walk_config()
        },
        backend.clone(),
    );
    wait_ready(&manager, "k", root).await;
    assert_eq!(backend.calls(), 1);

    for i in 0..5 {
        write(root, &format!("burst{i}.txt"))?;
        assert!(manager.notify_changed("k", &[root.join(format!("burst{i}.txt"))]));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.calls(), 1);
    assert!(manager.search("k", root, "", None).indexing);

    let response = wait_ready(&manager, "k", root).await;
    assert_eq!(backend.calls(), 2);
    assert_eq!(response.entries.len(), 6);

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_under_ignored_directories_are_dropped() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "one.txt")?;

    let manager = IndexManager::new(walk_config());
    wait_ready(&manager, "k", root).await;

    let ignored: Vec<PathBuf> = vec![
        root.join("node_modules").join("pkg").join("index.js"),
        root.join("web").join("dist").join("bundle.js"),
    ];
    assert!(!manager.notify_changed("k", &ignored));
    assert!(!manager.notify_changed("k", &[PathBuf::from("target/debug/app")]));
    assert!(!manager.search("k", root, "", None).indexing);

    assert!(manager.notify_changed("k", &[root.join("src").join("lib.rs")]));
    assert!(manager.notify_changed("k", &[]));
    assert!(!manager.notify_changed("unknown", &[]));

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_rescan_keeps_last_good_snapshot() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "kept.txt")?;

    let backend = Arc::new(CountingBackend {
        fail_after: Some(1),
        ..CountingBackend::default()
    });
    let manager = counting_manager(walk_config(), backend.clone());
    wait_ready(&manager, "k", root).await;

    assert!(manager.refresh("k"));
    let response = wait_ready(&manager, "k", root).await;
    assert_eq!(backend.calls(), 2);
    assert_eq!(paths(&response), vec!["kept.txt"]);

    let status = manager.status("k").expect("status");
    assert!(!status.indexing);
    assert!(status.last_error.is_some());

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_root_fails_open() -> Result<()> {
    let temp_root = tempdir()?;
    let missing = temp_root.path().join("gone");

    let manager = IndexManager::new(walk_config());
    manager.ensure_index("k", &missing);
    let poll = async {
        loop {
            if let Some(status) = manager.status("k") {
                if !status.indexing && status.last_error.is_some() {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let status = tokio::time::timeout(Duration::from_secs(10), poll).await?;
    assert_eq!(status.entries, 0);

    manager.dispose();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn disposed_manager_serves_nothing() -> Result<()> {
    let temp_root = tempdir()?;
    let root = temp_root.path();
    write(root, "one.txt")?;

    let manager = IndexManager::new(walk_config());
    wait_ready(&manager, "k", root).await;
    manager.dispose();

    assert!(manager.is_empty());
    manager.ensure_index("k", root);
    assert!(manager.is_empty());

    let response = manager.search("k", root, "one", None);
    assert!(response.entries.is_empty());
    assert!(!response.indexing);
    assert!(!manager.refresh("k"));

    // Idempotent.
    manager.dispose();
    Ok(())
}
