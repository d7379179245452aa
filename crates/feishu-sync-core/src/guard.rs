//! Echo suppression between engine writes and the local watcher.
//!
//! Every engine-driven file write raises the ignore flag for its duration
//! and stamps a completion clock afterwards; the watcher path drops events
//! while the flag is up or while a file's mtime falls inside the window
//! after the stamp.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::LOCAL_IGNORE_WINDOW_MS;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared state consulted by the local-change path.
#[derive(Debug, Default)]
pub struct EchoGuard {
    ignore_local: AtomicBool,
    last_completed_ms: AtomicU64,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag around a batch of engine-driven writes.
    pub fn begin_engine_writes(&self) {
        self.ignore_local.store(true, Ordering::SeqCst);
    }

    /// Lower the flag and stamp the completion clock.
    pub fn end_engine_writes(&self) {
        self.last_completed_ms.store(now_ms(), Ordering::SeqCst);
        self.ignore_local.store(false, Ordering::SeqCst);
    }

    pub fn ignoring_local(&self) -> bool {
        self.ignore_local.load(Ordering::SeqCst)
    }

    pub fn last_completed_ms(&self) -> u64 {
        self.last_completed_ms.load(Ordering::SeqCst)
    }

    /// Whether a local event with the given file mtime is an echo of our
    /// own write.
    pub fn is_echo(&self, mtime_ms: u64) -> bool {
        if self.ignoring_local() {
            return true;
        }
        let completed = self.last_completed_ms();
        completed > 0 && mtime_ms.abs_diff(completed) <= LOCAL_IGNORE_WINDOW_MS
    }
}
