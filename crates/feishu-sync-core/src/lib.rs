//! feishu-sync-core: Reconciliation engine for wiki-space ⇄ Markdown sync.
//!
//! This crate provides the platform-independent pieces of the synchronizer:
//! - Manifest store tracking document pairings on disk
//! - Typed Feishu API client behind the `DocsApi` trait
//! - Markdown ⇄ docx block-tree codec
//! - Wiki and local-directory walkers
//! - One-shot bidirectional reconciler
//! - Debounced per-document change processor

pub mod api;
pub mod block;
pub mod codec;
pub mod error;
pub mod guard;
pub mod local;
pub mod manifest;
pub mod processor;
pub mod reconcile;
pub mod transfer;
pub mod wiki;

pub use api::{DocsApi, DocumentMeta, FeishuClient, InMemoryApi, WikiNode};
pub use block::{Block, DraftBlock, FileType};
pub use codec::{blocks_to_markdown, markdown_to_blocks, DraftDocument};
pub use error::{ApiError, SyncError};
pub use guard::EchoGuard;
pub use local::{walk_local_files, ContentHash, LocalFile};
pub use manifest::{DocEntry, Manifest, MANIFEST_FILE};
pub use processor::{ChangeProcessor, LocalChangeKind, ProcessorHandle, ProcessorMsg, RemoteEventKind};
pub use reconcile::{reconcile, ReconcileOptions, SyncReport};
pub use wiki::walk_wiki_documents;

/// Debounce window for per-document actions.
pub const DEBOUNCE_MS: u64 = 3_000;
/// Window in which an identical (document, action) pair is dropped as a duplicate.
pub const DEDUPE_WINDOW_MS: u64 = 600_000;
/// Window after an engine-driven write in which local file events are echoes.
pub const LOCAL_IGNORE_WINDOW_MS: u64 = 2_000;
