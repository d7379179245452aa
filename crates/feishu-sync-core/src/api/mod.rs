//! Typed surface over the remote documents and wiki APIs.
//!
//! `DocsApi` is the seam between the engine and the network:
//! - `FeishuClient` - reqwest implementation of the open-apis endpoints
//! - `InMemoryApi` - in-process fake for tests

mod client;
mod memory;

pub use client::FeishuClient;
pub use memory::InMemoryApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::block::{Block, FileType};
use crate::error::ApiError;

pub type Result<T> = std::result::Result<T, ApiError>;

/// A node in the wiki tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WikiNode {
    pub node_token: String,
    /// Token of the object the node points at (the documentId for docs).
    pub obj_token: String,
    /// Object category as the wire reports it ("doc", "docx", "sheet", ...).
    pub obj_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub has_child: bool,
}

impl WikiNode {
    /// The document category, if this node points at a document at all.
    pub fn file_type(&self) -> Option<FileType> {
        self.obj_type.parse().ok()
    }
}

/// Document metadata as returned by the documents API.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMeta {
    pub document_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub revision_id: Option<i64>,
}

/// Typed operations the engine needs from the remote side.
///
/// Pagination and retry live behind this trait; callers always see complete
/// result sets.
#[async_trait]
pub trait DocsApi: Send + Sync {
    /// List the direct children of a space node (space root when `parent`
    /// is `None`).
    async fn list_child_nodes(&self, space_id: &str, parent: Option<&str>) -> Result<Vec<WikiNode>>;

    /// Fetch title and revision of a document.
    async fn document_meta(&self, document_id: &str) -> Result<DocumentMeta>;

    /// Fetch every block of a document, page block first.
    async fn document_blocks(&self, document_id: &str) -> Result<Vec<Block>>;

    /// Create an empty document, returning its id.
    async fn create_document(&self, title: Option<&str>) -> Result<String>;

    /// Append children under `parent_id` starting at `index`. The returned
    /// blocks carry server-assigned ids (including table cell ids).
    async fn append_children(
        &self,
        document_id: &str,
        parent_id: &str,
        index: u32,
        children: &[Block],
    ) -> Result<Vec<Block>>;

    /// Delete the children of `parent_id` in `[start, end)`.
    async fn batch_delete_children(
        &self,
        document_id: &str,
        parent_id: &str,
        start: u32,
        end: u32,
    ) -> Result<()>;

    /// Move a standalone document into the wiki space.
    async fn move_to_wiki(&self, space_id: &str, file_type: FileType, obj_token: &str) -> Result<()>;

    /// Subscribe a document to change events.
    async fn subscribe_document(&self, document_id: &str, file_type: FileType) -> Result<()>;

    /// Delete a remote document.
    async fn delete_document(&self, document_id: &str, file_type: FileType) -> Result<()>;
}
