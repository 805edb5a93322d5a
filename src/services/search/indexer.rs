use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ignore::IgnoreSet;
use super::ranking::{clamp_limit, rank};
use super::scanner::{ScanOutput, Scanner};
use super::watcher::{FileWatcher, WatchMode};
use crate::core::config::IndexConfig;
use crate::models::file_entry::IndexedEntry;

const WATCH_QUEUE: usize = 64;

/// Why a rebuild was scheduled. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Initial,
    SearchMiss,
    Watch,
    Pending,
    Manual,
}

impl RebuildReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildReason::Initial => "initial",
            RebuildReason::SearchMiss => "search_miss",
            RebuildReason::Watch => "watch",
            RebuildReason::Pending => "pending",
            RebuildReason::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub entries: Vec<IndexedEntry>,
    /// A scan is running or scheduled; `entries` may be stale or incomplete.
    pub indexing: bool,
    /// The index itself hit the entry cap.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub key: String,
    pub root: PathBuf,
    pub entries: usize,
    pub indexing: bool,
    pub truncated: bool,
    pub watch: WatchMode,
    pub last_strategy: Option<&'static str>,
    pub last_indexed_at: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Snapshot {
    entries: Vec<IndexedEntry>,
    truncated: bool,
}

struct PendingTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// Single-flight bookkeeping. `indexing` and `pending_rebuild` are only ever
/// changed together under this lock.
#[derive(Default)]
struct Flight {
    indexing: bool,
    pending_rebuild: bool,
    timer: Option<PendingTimer>,
    next_timer_id: u64,
}

struct WatchSlot {
    attempted: bool,
    mode: WatchMode,
    watcher: Option<FileWatcher>,
}

#[derive(Default)]
struct ScanHistory {
    strategy: Option<&'static str>,
    indexed_at: Option<OffsetDateTime>,
    error: Option<String>,
}

struct DirectoryIndexState {
    key: String,
    root: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
    flight: Mutex<Flight>,
    watch: Mutex<WatchSlot>,
    history: Mutex<ScanHistory>,
    last_access: Mutex<Instant>,
    retired: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DirectoryIndexState {
    fn new(key: &str, root: &Path) -> Self {
        Self {
            key: key.to_string(),
            root: root.to_path_buf(),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            flight: Mutex::new(Flight::default()),
            watch: Mutex::new(WatchSlot {
                attempted: false,
                mode: WatchMode::Pending,
                watcher: None,
            }),
            history: Mutex::new(ScanHistory::default()),
            last_access: Mutex::new(Instant::now()),
            retired: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, output: ScanOutput) {
        let snapshot = Arc::new(Snapshot {
            entries: output.entries,
            truncated: output.truncated,
        });
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;

        let mut history = lock(&self.history);
        history.strategy = Some(output.strategy);
        history.indexed_at = Some(OffsetDateTime::now_utc());
        history.error = None;
    }

    fn record_failure(&self, error: String) {
        lock(&self.history).error = Some(error);
    }

    fn touch(&self) {
        *lock(&self.last_access) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*lock(&self.last_access))
    }

    fn is_indexing(&self) -> bool {
        lock(&self.flight).indexing
    }

    /// Running, coalesced, or waiting on a debounce timer.
    fn is_busy(&self) -> bool {
        let flight = lock(&self.flight);
        flight.indexing || flight.pending_rebuild || flight.timer.is_some()
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Releases the timer and watcher. An in-flight scan finishes on its own
    /// and its result lands in this detached state.
    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if let Some(timer) = lock(&self.flight).timer.take() {
            timer.handle.abort();
        }
        let mut slot = lock(&self.watch);
        if let Some(watcher) = slot.watcher.take() {
            watcher.close();
        }
    }

    fn status(&self) -> IndexStatus {
        let snapshot = self.snapshot();
        let history = lock(&self.history);
        IndexStatus {
            key: self.key.clone(),
            root: self.root.clone(),
            entries: snapshot.entries.len(),
            indexing: self.is_busy(),
            truncated: snapshot.truncated,
            watch: lock(&self.watch).mode,
            last_strategy: history.strategy,
            last_indexed_at: history
                .indexed_at
                .and_then(|at| at.format(&Rfc3339).ok()),
            last_error: history.error.clone(),
        }
    }
}

/// Decides whether a batch of changed paths can affect an index.
#[derive(Clone)]
struct ChangeFilter {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
    ignore: Arc<IgnoreSet>,
}

impl ChangeFilter {
    fn new(root: &Path, ignore: Arc<IgnoreSet>) -> Self {
        Self {
            root: root.to_path_buf(),
            canonical_root: fs::canonicalize(root).ok(),
            ignore,
        }
    }

    /// Only a batch whose every path lies under an ignored directory is
    /// irrelevant. Paths outside the root count as relevant.
    fn is_relevant(&self, paths: &[PathBuf]) -> bool {
        paths.is_empty()
            || paths.iter().any(|path| {
                let relative = if path.is_relative() {
                    Some(path.as_path())
                } else {
                    path.strip_prefix(&self.root).ok().or_else(|| {
                        self.canonical_root
                            .as_deref()
                            .and_then(|root| path.strip_prefix(root).ok())
                    })
                };
                match relative {
                    Some(relative) => !relative
                        .components()
                        .any(|c| self.ignore.contains(&c.as_os_str().to_string_lossy())),
                    None => true,
                }
            })
    }
}

struct Inner {
    config: IndexConfig,
    scanner: Scanner,
    runtime: Handle,
    states: Mutex<HashMap<String, Arc<DirectoryIndexState>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let sweeper = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(sweeper) = sweeper.take() {
            sweeper.abort();
        }
        let states = self.states.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, state) in states.drain() {
            state.retire();
        }
    }
}

/// Per-directory file index with debounced, single-flight rebuilds and idle
/// eviction.
///
/// Cloning is cheap and every clone drives the same set of indexes. Scans run
/// on blocking workers; `search` only takes short locks and always reads the
/// last completed snapshot.
#[derive(Clone)]
pub struct IndexManager {
    inner: Arc<Inner>,
}

impl IndexManager {
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: IndexConfig) -> Self {
        let scanner = Scanner::from_config(&config);
        Self::with_scanner(config, scanner)
    }

    pub fn with_scanner(config: IndexConfig, scanner: Scanner) -> Self {
        let runtime = Handle::current();
        let sweep_interval = config.sweep_interval().max(Duration::from_millis(1));
        let inner = Arc::new(Inner {
            config,
            scanner,
            runtime,
            states: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let sweeper = spawn_sweeper(&inner.runtime, Arc::downgrade(&inner), sweep_interval);
        *lock(&inner.sweeper) = Some(sweeper);
        Self { inner }
    }

    /// Number of directories currently tracked.
    pub fn len(&self) -> usize {
        lock(&self.inner.states).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers interest in `root` under `key`, starting a scan if nothing
    /// has been indexed yet. Never waits for the scan.
    pub fn ensure_index(&self, key: &str, root: impl AsRef<Path>) {
        if self.is_disposed() {
            return;
        }
        self.ensure_state(key, root.as_ref(), RebuildReason::Initial);
    }

    /// Searches the last completed snapshot for `key`. `limit` defaults to
    /// 20 and is clamped to `1..=50`.
    pub fn search(
        &self,
        key: &str,
        root: impl AsRef<Path>,
        query: &str,
        limit: Option<usize>,
    ) -> SearchResponse {
        if self.is_disposed() {
            return SearchResponse::default();
        }
        let state = self.ensure_state(key, root.as_ref(), RebuildReason::SearchMiss);
        let snapshot = state.snapshot();
        let entries = rank(&snapshot.entries, query, clamp_limit(limit))
            .into_iter()
            .cloned()
            .collect();

        SearchResponse {
            entries,
            indexing: state.is_busy(),
            truncated: snapshot.truncated,
        }
    }

    /// Schedules an immediate rebuild of a registered key.
    pub fn refresh(&self, key: &str) -> bool {
        match self.state(key) {
            Some(state) => {
                state.touch();
                self.schedule_rebuild(&state, RebuildReason::Manual, Duration::ZERO);
                true
            }
            None => false,
        }
    }

    /// Reports changed paths for `key`, as the watcher does. Returns whether a
    /// debounced rebuild was scheduled.
    pub fn notify_changed(&self, key: &str, paths: &[PathBuf]) -> bool {
        match self.state(key) {
            Some(state) => self.handle_change(&state, paths),
            None => false,
        }
    }

    pub fn status(&self, key: &str) -> Option<IndexStatus> {
        self.state(key).map(|state| state.status())
    }

    /// Drops every index idle for longer than the configured TTL, except
    /// those mid-scan. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.inner.config.idle_ttl();
        let now = Instant::now();
        let evicted: Vec<Arc<DirectoryIndexState>> = {
            let mut states = lock(&self.inner.states);
            let keys: Vec<String> = states
                .iter()
                .filter(|(_, state)| state.idle_for(now) > ttl && !state.is_indexing())
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| states.remove(key)).collect()
        };

        for state in &evicted {
            info!(key = %state.key, root = %state.root.display(), "evicting idle index");
            state.retire();
        }
        evicted.len()
    }

    /// Stops the sweeper and releases every watcher and timer. Scans already
    /// running finish but their results are discarded.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sweeper) = lock(&self.inner.sweeper).take() {
            sweeper.abort();
        }
        let states: Vec<Arc<DirectoryIndexState>> = lock(&self.inner.states)
            .drain()
            .map(|(_, state)| state)
            .collect();
        for state in &states {
            state.retire();
        }
        info!(released = states.len(), "index manager disposed");
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn state(&self, key: &str) -> Option<Arc<DirectoryIndexState>> {
        lock(&self.inner.states).get(key).cloned()
    }

    fn ensure_state(
        &self,
        key: &str,
        root: &Path,
        reason: RebuildReason,
    ) -> Arc<DirectoryIndexState> {
        let state = {
            let mut states = lock(&self.inner.states);
            match states.get(key).cloned() {
                Some(existing) if existing.root == root => existing,
                previous => {
                    if let Some(old) = previous {
                        info!(
                            key,
                            old_root = %old.root.display(),
                            new_root = %root.display(),
                            "index root changed, resetting"
                        );
                        old.retire();
                    }
                    let state = Arc::new(DirectoryIndexState::new(key, root));
                    states.insert(key.to_string(), state.clone());
                    state
                }
            }
        };

        state.touch();
        self.ensure_watcher(&state);

        let idle = {
            let flight = lock(&state.flight);
            !flight.indexing && flight.timer.is_none()
        };
        if idle && state.snapshot().entries.is_empty() {
            self.schedule_rebuild(&state, reason, Duration::ZERO);
        }
        state
    }

    /// (Re)arms the rebuild timer, replacing any timer still waiting.
    fn schedule_rebuild(
        &self,
        state: &Arc<DirectoryIndexState>,
        reason: RebuildReason,
        delay: Duration,
    ) {
        if state.is_retired() || self.is_disposed() {
            return;
        }

        let mut flight = lock(&state.flight);
        self.arm_timer(&mut flight, state, reason, delay);
    }

    fn arm_timer(
        &self,
        flight: &mut Flight,
        state: &Arc<DirectoryIndexState>,
        reason: RebuildReason,
        delay: Duration,
    ) {
        if let Some(previous) = flight.timer.take() {
            previous.handle.abort();
        }
        flight.next_timer_id += 1;
        let id = flight.next_timer_id;
        let manager = Arc::downgrade(&self.inner);
        let task_state = state.clone();
        let handle = self.inner.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(inner) = manager.upgrade() {
                IndexManager { inner }.fire_timer(task_state, id, reason).await;
            }
        });
        flight.timer = Some(PendingTimer { id, handle });
    }

    async fn fire_timer(&self, state: Arc<DirectoryIndexState>, id: u64, reason: RebuildReason) {
        let start = {
            let mut flight = lock(&state.flight);
            match &flight.timer {
                Some(timer) if timer.id == id => {}
                _ => return,
            }
            // Nothing can abort this task once its handle is gone.
            flight.timer = None;
            if state.is_retired() {
                return;
            }
            if flight.indexing {
                flight.pending_rebuild = true;
                false
            } else {
                flight.indexing = true;
                true
            }
        };

        if start {
            self.run_scan(state, reason).await;
        } else {
            debug!(key = %state.key, reason = reason.as_str(), "rebuild coalesced into running scan");
        }
    }

    async fn run_scan(&self, state: Arc<DirectoryIndexState>, reason: RebuildReason) {
        debug!(key = %state.key, root = %state.root.display(), reason = reason.as_str(), "rebuilding index");

        let scanner = self.inner.scanner.clone();
        let root = state.root.clone();
        match tokio::task::spawn_blocking(move || scanner.scan(&root)).await {
            Ok(Ok(output)) => {
                debug!(
                    key = %state.key,
                    strategy = output.strategy,
                    entries = output.entries.len(),
                    truncated = output.truncated,
                    "index ready"
                );
                state.install(output);
            }
            Ok(Err(e)) => {
                warn!(key = %state.key, root = %state.root.display(), "index scan failed: {}", e);
                state.record_failure(e.to_string());
            }
            Err(e) => {
                warn!(key = %state.key, root = %state.root.display(), "index scan task failed: {}", e);
                state.record_failure(e.to_string());
            }
        }

        let mut flight = lock(&state.flight);
        flight.indexing = false;
        // Armed under the same lock so readers never see an idle gap.
        if std::mem::take(&mut flight.pending_rebuild)
            && !state.is_retired()
            && !self.is_disposed()
        {
            self.arm_timer(&mut flight, &state, RebuildReason::Pending, Duration::ZERO);
        }
    }

    fn ensure_watcher(&self, state: &Arc<DirectoryIndexState>) {
        {
            let mut slot = lock(&state.watch);
            if slot.attempted {
                return;
            }
            slot.attempted = true;
            if !self.inner.config.watch {
                slot.mode = WatchMode::Disabled;
                return;
            }
        }

        let manager = Arc::downgrade(&self.inner);
        let runtime = self.inner.runtime.clone();
        let debounce = self.inner.config.debounce();
        let ignore = self.inner.scanner.ignore().clone();
        let state = state.clone();
        // Registering a recursive watch walks the tree on some backends.
        self.inner.runtime.spawn_blocking(move || {
            let filter = ChangeFilter::new(&state.root, ignore);
            let (tx, rx) = mpsc::channel(WATCH_QUEUE);
            let watcher = match FileWatcher::with_filter(&state.root, tx, move |paths: &[PathBuf]| {
                filter.is_relevant(paths)
            }) {
                Ok(watcher) => watcher,
                Err(e) => {
                    warn!(
                        key = %state.key,
                        root = %state.root.display(),
                        "filesystem watcher unavailable, index refreshes on demand only: {}",
                        e
                    );
                    lock(&state.watch).mode = WatchMode::Unavailable;
                    return;
                }
            };

            let overflow = watcher.overflow();
            {
                let mut slot = lock(&state.watch);
                if state.is_retired() {
                    watcher.close();
                    return;
                }
                slot.mode = watcher.mode();
                slot.watcher = Some(watcher);
            }

            runtime.spawn(forward_watch_events(
                manager,
                Arc::downgrade(&state),
                debounce,
                rx,
                overflow,
            ));
        });
    }

    fn handle_change(&self, state: &Arc<DirectoryIndexState>, paths: &[PathBuf]) -> bool {
        if state.is_retired() {
            return false;
        }
        let filter = ChangeFilter::new(&state.root, self.inner.scanner.ignore().clone());
        if !filter.is_relevant(paths) {
            tracing::trace!(key = %state.key, "ignoring change under ignored directory");
            return false;
        }
        self.schedule_rebuild(state, RebuildReason::Watch, self.inner.config.debounce());
        true
    }
}

/// Turns watcher batches into debounced rebuilds. Holds the state weakly so
/// the state (and with it the watcher and `rx`'s sender) can be dropped.
async fn forward_watch_events(
    manager: Weak<Inner>,
    state: Weak<DirectoryIndexState>,
    debounce: Duration,
    mut rx: mpsc::Receiver<Vec<PathBuf>>,
    overflow: Arc<Notify>,
) {
    loop {
        let overflowed = tokio::select! {
            batch = rx.recv() => match batch {
                Some(_) => false,
                None => break,
            },
            _ = overflow.notified() => true,
        };
        let (Some(inner), Some(state)) = (manager.upgrade(), state.upgrade()) else {
            break;
        };
        if overflowed {
            debug!(key = %state.key, "watch queue full, rebuilding from overflow");
        }
        IndexManager { inner }.schedule_rebuild(&state, RebuildReason::Watch, debounce);
    }
}

fn spawn_sweeper(runtime: &Handle, manager: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = manager.upgrade() else {
                break;
            };
            let evicted = IndexManager { inner }.evict_idle();
            if evicted > 0 {
                debug!(evicted, "idle sweep finished");
            }
        }
    })
}
