//! File watcher with debouncing for the sync root.
//!
//! Uses notify-debouncer-mini to coalesce editor write bursts before they
//! reach the change processor, which applies its own per-document debounce
//! on top.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

use feishu_sync_core::local::{is_sync_candidate, relative_path};
use feishu_sync_core::LocalChangeKind;

/// A filtered filesystem event, relative to the sync root.
#[derive(Debug, Clone)]
pub struct LocalFileEvent {
    pub rel_path: String,
    pub kind: LocalChangeKind,
}

/// Recursive watcher over the sync root.
pub struct FileWatcher {
    root_dir: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<LocalFileEvent>,
}

impl FileWatcher {
    /// Watch `root_dir` recursively with a 200 ms coalescing window.
    pub fn new(root_dir: PathBuf) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = root_dir.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event.path, &root) {
                            if event_tx.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root_dir, RecursiveMode::Recursive)?;

        Ok(Self {
            root_dir,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Filter one debounced path, keeping only the synced file set.
    fn process_event(path: &Path, root: &Path) -> Option<LocalFileEvent> {
        let rel_path = relative_path(root, path);
        if rel_path.is_empty() || !is_sync_candidate(&rel_path) {
            return None;
        }

        let kind = if path.exists() {
            LocalChangeKind::Modified
        } else {
            LocalChangeKind::Deleted
        };
        debug!("File event: {:?} - {}", kind, rel_path);

        Some(LocalFileEvent { rel_path, kind })
    }

    /// Receive the next filtered event.
    pub async fn recv(&mut self) -> Option<LocalFileEvent> {
        self.event_rx.recv().await
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}
