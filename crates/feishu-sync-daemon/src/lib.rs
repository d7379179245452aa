//! feishu-sync-daemon library: exposes internal modules for testing.
//!
//! The daemon wires the core engine to its event sources: the local file
//! watcher, the remote event stream, and the periodic wiki poller.

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod poller;
pub mod supervisor;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use events::EventStream;
pub use watcher::{FileWatcher, LocalFileEvent};
