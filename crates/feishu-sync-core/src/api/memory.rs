//! In-memory `DocsApi` for tests.
//!
//! Models just enough of the remote side for reconciler and processor
//! tests: documents with revisions that bump on every mutation, a flat
//! wiki-node table, and records of deletes/subscribes for assertions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{DocsApi, DocumentMeta, Result, WikiNode};
use crate::block::{block_type, Block, FileType};
use crate::error::ApiError;

#[derive(Debug, Clone)]
struct RemoteDoc {
    title: String,
    revision_id: i64,
    /// All blocks keyed by id; the page block lists children in order.
    blocks: HashMap<String, Block>,
    page_id: String,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    space_id: String,
    parent: Option<String>,
    node: WikiNode,
}

#[derive(Default)]
struct State {
    next_id: u64,
    docs: HashMap<String, RemoteDoc>,
    nodes: Vec<NodeRecord>,
    deleted: Vec<String>,
    subscribed: Vec<String>,
    meta_calls: usize,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// Test double with helpers to seed and inspect the remote side.
#[derive(Default)]
pub struct InMemoryApi {
    state: Mutex<State>,
}

impl InMemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document and hang it under the space root. Returns its id.
    pub fn seed_document(&self, space_id: &str, title: &str, children: Vec<Block>) -> String {
        let mut state = self.state.lock().unwrap();
        let doc_id = state.fresh_id("doc");
        let page_id = state.fresh_id("blk");

        let mut blocks = HashMap::new();
        let mut page = Block {
            block_id: page_id.clone(),
            block_type: block_type::PAGE,
            ..Default::default()
        };
        for mut child in children {
            let id = state.fresh_id("blk");
            child.block_id = id.clone();
            child.parent_id = Some(page_id.clone());
            page.children.push(id.clone());
            blocks.insert(id, child);
        }
        blocks.insert(page_id.clone(), page);

        state.docs.insert(
            doc_id.clone(),
            RemoteDoc {
                title: title.to_string(),
                revision_id: 1,
                blocks,
                page_id,
            },
        );

        let node_token = state.fresh_id("node");
        state.nodes.push(NodeRecord {
            space_id: space_id.to_string(),
            parent: None,
            node: WikiNode {
                node_token,
                obj_token: doc_id.clone(),
                obj_type: "docx".into(),
                title: title.to_string(),
                has_child: false,
            },
        });
        doc_id
    }

    /// Seed a non-document node (e.g. a folder-like docx with children).
    pub fn seed_node(&self, space_id: &str, parent: Option<&str>, node: WikiNode) {
        let mut state = self.state.lock().unwrap();
        state.nodes.push(NodeRecord {
            space_id: space_id.to_string(),
            parent: parent.map(String::from),
            node,
        });
    }

    /// Replace a document's body and bump its revision, as a remote edit
    /// would.
    pub fn edit_document(&self, document_id: &str, children: Vec<Block>) {
        let mut state = self.state.lock().unwrap();
        let mut fresh: Vec<(String, Block)> = Vec::new();
        {
            let doc = state.docs.get(document_id).expect("document exists");
            let page_id = doc.page_id.clone();
            for mut child in children {
                child.parent_id = Some(page_id.clone());
                fresh.push((String::new(), child));
            }
        }
        for entry in &mut fresh {
            entry.0 = state.fresh_id("blk");
        }
        let doc = state.docs.get_mut(document_id).expect("document exists");
        let page_id = doc.page_id.clone();
        let mut page = doc.blocks.get(&page_id).cloned().expect("page exists");
        page.children.clear();
        doc.blocks.clear();
        for (id, mut block) in fresh {
            block.block_id = id.clone();
            page.children.push(id.clone());
            doc.blocks.insert(id, block);
        }
        doc.blocks.insert(page_id, page);
        doc.revision_id += 1;
    }

    pub fn set_title(&self, document_id: &str, title: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(doc) = state.docs.get_mut(document_id) {
            doc.title = title.to_string();
            doc.revision_id += 1;
        }
        for record in &mut state.nodes {
            if record.node.obj_token == document_id {
                record.node.title = title.to_string();
            }
        }
    }

    /// Remove a document server-side (as the trash would).
    pub fn trash_document(&self, document_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.docs.remove(document_id);
        state.nodes.retain(|r| r.node.obj_token != document_id);
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.state.lock().unwrap().docs.contains_key(document_id)
    }

    pub fn revision(&self, document_id: &str) -> Option<i64> {
        self.state.lock().unwrap().docs.get(document_id).map(|d| d.revision_id)
    }

    pub fn deleted_documents(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn subscribed_documents(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().docs.keys().cloned().collect()
    }

    /// Number of `document_meta` calls served, for asserting how often an
    /// action actually ran.
    pub fn meta_call_count(&self) -> usize {
        self.state.lock().unwrap().meta_calls
    }

    fn not_found(operation: &'static str) -> ApiError {
        ApiError::Server {
            operation,
            code: 1770002,
            msg: "document not found".into(),
        }
    }
}

#[async_trait]
impl DocsApi for InMemoryApi {
    async fn list_child_nodes(&self, space_id: &str, parent: Option<&str>) -> Result<Vec<WikiNode>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|r| r.space_id == space_id && r.parent.as_deref() == parent)
            .map(|r| r.node.clone())
            .collect())
    }

    async fn document_meta(&self, document_id: &str) -> Result<DocumentMeta> {
        let mut state = self.state.lock().unwrap();
        state.meta_calls += 1;
        let state = &*state;
        let doc = state
            .docs
            .get(document_id)
            .ok_or_else(|| Self::not_found("get document"))?;
        Ok(DocumentMeta {
            document_id: document_id.to_string(),
            title: doc.title.clone(),
            revision_id: Some(doc.revision_id),
        })
    }

    async fn document_blocks(&self, document_id: &str) -> Result<Vec<Block>> {
        let state = self.state.lock().unwrap();
        let doc = state
            .docs
            .get(document_id)
            .ok_or_else(|| Self::not_found("list blocks"))?;
        let page = doc.blocks.get(&doc.page_id).expect("page exists");
        let mut out = vec![page.clone()];
        // Page children in order, then any remaining blocks (cells).
        for id in &page.children {
            if let Some(block) = doc.blocks.get(id) {
                out.push(block.clone());
            }
        }
        for (id, block) in &doc.blocks {
            if *id != doc.page_id && !page.children.contains(id) {
                out.push(block.clone());
            }
        }
        Ok(out)
    }

    async fn create_document(&self, title: Option<&str>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let doc_id = state.fresh_id("doc");
        let page_id = state.fresh_id("blk");
        let mut blocks = HashMap::new();
        blocks.insert(
            page_id.clone(),
            Block {
                block_id: page_id.clone(),
                block_type: block_type::PAGE,
                ..Default::default()
            },
        );
        state.docs.insert(
            doc_id.clone(),
            RemoteDoc {
                title: title.unwrap_or_default().to_string(),
                revision_id: 1,
                blocks,
                page_id,
            },
        );
        Ok(doc_id)
    }

    async fn append_children(
        &self,
        document_id: &str,
        parent_id: &str,
        index: u32,
        children: &[Block],
    ) -> Result<Vec<Block>> {
        let mut state = self.state.lock().unwrap();

        let mut created = Vec::with_capacity(children.len());
        for child in children {
            let mut block = child.clone();
            block.block_id = state.fresh_id("blk");
            block.parent_id = Some(parent_id.to_string());
            // Tables get their cell blocks allocated on creation.
            if let Some(table) = &mut block.table {
                let cell_count = table.property.row_size * table.property.column_size;
                for _ in 0..cell_count {
                    table.cells.push(state.fresh_id("blk"));
                }
            }
            created.push(block);
        }

        let doc = state
            .docs
            .get_mut(document_id)
            .ok_or_else(|| Self::not_found("append blocks"))?;
        if !doc.blocks.contains_key(parent_id) {
            return Err(Self::not_found("append blocks"));
        }

        let mut at = index as usize;
        for block in &created {
            for cell_id in block.table.iter().flat_map(|t| t.cells.iter()) {
                doc.blocks.insert(
                    cell_id.clone(),
                    Block {
                        block_id: cell_id.clone(),
                        block_type: block_type::TABLE_CELL,
                        parent_id: Some(block.block_id.clone()),
                        table_cell: Some(Default::default()),
                        ..Default::default()
                    },
                );
            }
            doc.blocks.insert(block.block_id.clone(), block.clone());
            let parent = doc.blocks.get_mut(parent_id).expect("parent exists");
            let at_clamped = at.min(parent.children.len());
            parent.children.insert(at_clamped, block.block_id.clone());
            at = at_clamped + 1;
        }
        doc.revision_id += 1;
        Ok(created)
    }

    async fn batch_delete_children(
        &self,
        document_id: &str,
        parent_id: &str,
        start: u32,
        end: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let doc = state
            .docs
            .get_mut(document_id)
            .ok_or_else(|| Self::not_found("delete blocks"))?;
        let parent = doc
            .blocks
            .get_mut(parent_id)
            .ok_or_else(|| Self::not_found("delete blocks"))?;
        let end = (end as usize).min(parent.children.len());
        let removed: Vec<String> = parent.children.drain(start as usize..end).collect();
        for id in removed {
            doc.blocks.remove(&id);
        }
        doc.revision_id += 1;
        Ok(())
    }

    async fn move_to_wiki(&self, space_id: &str, file_type: FileType, obj_token: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.docs.contains_key(obj_token) {
            return Err(Self::not_found("move to wiki"));
        }
        let node_token = state.fresh_id("node");
        let title = state.docs[obj_token].title.clone();
        state.nodes.push(NodeRecord {
            space_id: space_id.to_string(),
            parent: None,
            node: WikiNode {
                node_token,
                obj_token: obj_token.to_string(),
                obj_type: file_type.as_str().to_string(),
                title,
                has_child: false,
            },
        });
        Ok(())
    }

    async fn subscribe_document(&self, document_id: &str, _file_type: FileType) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.subscribed.push(document_id.to_string());
        Ok(())
    }

    async fn delete_document(&self, document_id: &str, _file_type: FileType) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.docs.remove(document_id).is_none() {
            return Err(Self::not_found("delete document"));
        }
        state.nodes.retain(|r| r.node.obj_token != document_id);
        state.deleted.push(document_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::TextRun;

    fn text(content: &str) -> Block {
        Block::paragraph(vec![crate::block::TextElement {
            text_run: Some(TextRun {
                content: content.into(),
                text_element_style: None,
            }),
        }])
    }

    #[tokio::test]
    async fn test_seed_and_fetch() {
        let api = InMemoryApi::new();
        let doc_id = api.seed_document("space1", "Hello", vec![text("hi")]);

        let meta = api.document_meta(&doc_id).await.unwrap();
        assert_eq!(meta.title, "Hello");
        assert_eq!(meta.revision_id, Some(1));

        let blocks = api.document_blocks(&doc_id).await.unwrap();
        assert_eq!(blocks[0].block_type, block_type::PAGE);
        assert_eq!(blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_edit_bumps_revision() {
        let api = InMemoryApi::new();
        let doc_id = api.seed_document("space1", "Doc", vec![text("v1")]);
        api.edit_document(&doc_id, vec![text("v2")]);
        assert_eq!(api.revision(&doc_id), Some(2));
    }

    #[tokio::test]
    async fn test_append_allocates_table_cells() {
        let api = InMemoryApi::new();
        let doc_id = api.create_document(None).await.unwrap();
        let blocks = api.document_blocks(&doc_id).await.unwrap();
        let page_id = blocks[0].block_id.clone();

        let created = api
            .append_children(&doc_id, &page_id, 0, &[Block::table(2, 2, true)])
            .await
            .unwrap();
        let table = created[0].table.as_ref().unwrap();
        assert_eq!(table.cells.len(), 4);

        // Cells are addressable as parents.
        api.append_children(&doc_id, &table.cells[0], 0, &[text("cell")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_batch_delete_children() {
        let api = InMemoryApi::new();
        let doc_id = api.seed_document("space1", "Doc", vec![text("a"), text("b"), text("c")]);
        let blocks = api.document_blocks(&doc_id).await.unwrap();
        let page_id = blocks[0].block_id.clone();

        api.batch_delete_children(&doc_id, &page_id, 0, 2).await.unwrap();
        let blocks = api.document_blocks(&doc_id).await.unwrap();
        assert_eq!(blocks.len(), 2); // page + one remaining child
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let api = InMemoryApi::new();
        let err = api.document_meta("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
