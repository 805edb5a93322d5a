use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::core::errors::Result;

/// How (and whether) a root is being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Attachment has not finished yet.
    Pending,
    Recursive,
    /// The backend refused a recursive watch; only direct children are seen.
    RootOnly,
    /// No watch could be attached; the index only refreshes on demand.
    Unavailable,
    /// Watching is switched off in the config.
    Disabled,
}

/// A live filesystem subscription. Dropping it (or calling [`close`](Self::close))
/// unsubscribes and closes the event channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    mode: WatchMode,
    overflow: Arc<Notify>,
}

impl FileWatcher {
    /// Watches `root` and forwards every change. See [`with_filter`](Self::with_filter).
    pub fn new(root: &Path, tx: mpsc::Sender<Vec<PathBuf>>) -> Result<Self> {
        Self::with_filter(root, tx, |_: &[PathBuf]| true)
    }

    /// Watches `root`, recursively if the backend allows it. Batches that
    /// pass `relevant` are forwarded on `tx`; an empty batch means the event
    /// carried no path. A relevant batch that does not fit in the queue is
    /// dropped and signalled on [`overflow`](Self::overflow) instead.
    pub fn with_filter<F>(root: &Path, tx: mpsc::Sender<Vec<PathBuf>>, relevant: F) -> Result<Self>
    where
        F: Fn(&[PathBuf]) -> bool + Send + 'static,
    {
        let overflow = Arc::new(Notify::new());
        let signal = overflow.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) || !relevant(&event.paths) {
                        return;
                    }
                    match tx.try_send(event.paths) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Stores a permit if the receiver is not waiting yet.
                            signal.notify_one();
                        }
                        Err(TrySendError::Closed(_)) => {
                            tracing::trace!("watch receiver dropped");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Watcher error: {:?}", e);
                }
            }
        })?;

        let mode = match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => WatchMode::Recursive,
            Err(e) => {
                tracing::debug!(
                    root = %root.display(),
                    "recursive watch unavailable, watching root only: {}",
                    e
                );
                watcher.watch(root, RecursiveMode::NonRecursive)?;
                WatchMode::RootOnly
            }
        };

        Ok(Self {
            watcher,
            mode,
            overflow,
        })
    }

    /// Fires when a relevant change was dropped because the queue was full.
    pub fn overflow(&self) -> Arc<Notify> {
        self.overflow.clone()
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    pub fn close(self) {
        drop(self.watcher);
    }
}
