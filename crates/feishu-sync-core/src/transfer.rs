//! Single-document transfer primitives shared by the reconciler and the
//! change processor.

use std::path::Path;
use tracing::debug;

use crate::api::{DocsApi, DocumentMeta};
use crate::block::{block_type, Block, DraftBlock, FileType};
use crate::codec::{blocks_to_markdown, inline_elements, markdown_to_blocks};
use crate::error::SyncError;
use crate::local::ContentHash;

/// Largest batch the block children endpoints accept.
pub const MAX_CHILDREN_BATCH: usize = 100;

/// Fetch a document and render it to Markdown.
pub async fn fetch_markdown(
    api: &dyn DocsApi,
    document_id: &str,
) -> Result<(DocumentMeta, String), SyncError> {
    let meta = api.document_meta(document_id).await?;
    let blocks = api.document_blocks(document_id).await?;
    let markdown = blocks_to_markdown(&meta, &blocks);
    Ok((meta, markdown))
}

/// Write Markdown under the sync root, creating parent directories.
pub async fn write_markdown(
    root_dir: &Path,
    rel_path: &str,
    markdown: &str,
) -> Result<String, SyncError> {
    let full = root_dir.join(rel_path);
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent.display().to_string(), e))?;
    }
    tokio::fs::write(&full, markdown)
        .await
        .map_err(|e| SyncError::io(rel_path, e))?;
    Ok(ContentHash::of(markdown).into_string())
}

/// Download a document over `rel_path`. Returns the fresh metadata and the
/// content hash now on disk.
pub async fn download_document(
    api: &dyn DocsApi,
    root_dir: &Path,
    rel_path: &str,
    document_id: &str,
) -> Result<(DocumentMeta, String), SyncError> {
    let (meta, markdown) = fetch_markdown(api, document_id).await?;
    let hash = write_markdown(root_dir, rel_path, &markdown).await?;
    debug!("Downloaded {document_id} -> {rel_path}");
    Ok((meta, hash))
}

fn page_block_id(document_id: &str, blocks: &[Block]) -> Result<(String, usize), SyncError> {
    blocks
        .iter()
        .find(|b| b.block_type == block_type::PAGE)
        .map(|page| (page.block_id.clone(), page.children.len()))
        .ok_or_else(|| SyncError::MissingPageBlock(document_id.to_string()))
}

/// Append draft children under `parent_id` starting at `index`, batching by
/// `MAX_CHILDREN_BATCH` and populating table cells once their ids exist.
pub async fn append_drafts(
    api: &dyn DocsApi,
    document_id: &str,
    parent_id: &str,
    mut index: u32,
    drafts: &[DraftBlock],
) -> Result<(), SyncError> {
    for chunk in drafts.chunks(MAX_CHILDREN_BATCH) {
        let children: Vec<Block> = chunk.iter().map(|d| d.block.clone()).collect();
        let created = api
            .append_children(document_id, parent_id, index, &children)
            .await?;
        index += created.len() as u32;

        // The API allocates table cell ids only on creation, so cell text
        // goes in as a second step against the returned ids.
        for (draft, created_block) in chunk.iter().zip(created.iter()) {
            let Some(rows) = &draft.table_rows else { continue };
            let Some(table) = &created_block.table else { continue };
            let columns = table.property.column_size as usize;
            for (row_index, row) in rows.iter().enumerate() {
                for (col_index, cell_markdown) in row.iter().enumerate() {
                    if cell_markdown.is_empty() {
                        continue;
                    }
                    let Some(cell_id) = table.cells.get(row_index * columns + col_index) else {
                        continue;
                    };
                    let cell_block = Block::paragraph(inline_elements(cell_markdown));
                    api.append_children(document_id, cell_id, 0, &[cell_block])
                        .await?;
                }
            }
        }
    }
    Ok(())
}

/// Replace a document's content wholesale with the given Markdown: delete
/// every existing child in `[0, n)` batches, then append fresh blocks.
pub async fn upload_markdown(
    api: &dyn DocsApi,
    document_id: &str,
    markdown: &str,
) -> Result<(), SyncError> {
    let blocks = api.document_blocks(document_id).await?;
    let (page_id, mut remaining) = page_block_id(document_id, &blocks)?;

    while remaining > 0 {
        let batch = remaining.min(MAX_CHILDREN_BATCH);
        api.batch_delete_children(document_id, &page_id, 0, batch as u32)
            .await?;
        remaining -= batch;
    }

    let draft = markdown_to_blocks(markdown);
    append_drafts(api, document_id, &page_id, 0, &draft.blocks).await?;
    debug!("Uploaded {} blocks to {document_id}", draft.blocks.len());
    Ok(())
}

/// Create a remote document from local Markdown and move it into the wiki
/// space. Returns the fresh metadata.
pub async fn create_remote_document(
    api: &dyn DocsApi,
    space_id: &str,
    markdown: &str,
) -> Result<DocumentMeta, SyncError> {
    let draft = markdown_to_blocks(markdown);
    let title = (!draft.title.is_empty()).then_some(draft.title.as_str());
    let document_id = api.create_document(title).await?;

    let blocks = api.document_blocks(&document_id).await?;
    let (page_id, _) = page_block_id(&document_id, &blocks)?;
    append_drafts(api, &document_id, &page_id, 0, &draft.blocks).await?;

    api.move_to_wiki(space_id, FileType::Docx, &document_id).await?;

    let mut meta = api.document_meta(&document_id).await?;
    // If the server dropped the requested title, keep it in the body
    // instead so the content survives.
    if meta.title.is_empty() && !draft.title.is_empty() {
        let heading = DraftBlock::new(Block::heading(1, inline_elements(&draft.title)));
        append_drafts(api, &document_id, &page_id, 0, &[heading]).await?;
        meta = api.document_meta(&document_id).await?;
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryApi;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_roundtrip() {
        let api = InMemoryApi::new();
        let draft = markdown_to_blocks("# Hello\n\nBody text.\n");
        let doc_id = api.seed_document(
            "space1",
            "Hello",
            draft.blocks.iter().map(|d| d.block.clone()).collect(),
        );

        let dir = TempDir::new().unwrap();
        let (meta, hash) = download_document(&api, dir.path(), "Hello.md", &doc_id)
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("Hello.md")).unwrap();
        assert_eq!(content, "# Hello\n\nBody text.\n");
        assert_eq!(hash, ContentHash::of(&content).into_string());
        assert_eq!(meta.revision_id, Some(1));
    }

    #[tokio::test]
    async fn test_upload_replaces_content() {
        let api = InMemoryApi::new();
        let old = markdown_to_blocks("old line\n");
        let doc_id = api.seed_document(
            "space1",
            "Doc",
            old.blocks.iter().map(|d| d.block.clone()).collect(),
        );

        upload_markdown(&api, &doc_id, "# Doc\n\nnew line\n").await.unwrap();

        let (_, markdown) = fetch_markdown(&api, &doc_id).await.unwrap();
        assert!(markdown.contains("new line"));
        assert!(!markdown.contains("old line"));
    }

    #[tokio::test]
    async fn test_upload_populates_table_cells() {
        let api = InMemoryApi::new();
        let doc_id = api.seed_document("space1", "Doc", vec![]);

        upload_markdown(&api, &doc_id, "| a | b |\n| --- | --- |\n| c | d |\n")
            .await
            .unwrap();

        let (_, markdown) = fetch_markdown(&api, &doc_id).await.unwrap();
        assert!(markdown.contains("| a | b |"));
        assert!(markdown.contains("| c | d |"));
    }

    #[tokio::test]
    async fn test_create_remote_document() {
        let api = InMemoryApi::new();
        let meta = create_remote_document(&api, "space1", "# Fresh\n\ncontent\n")
            .await
            .unwrap();

        assert_eq!(meta.title, "Fresh");
        let (_, markdown) = fetch_markdown(&api, &meta.document_id).await.unwrap();
        assert_eq!(markdown, "# Fresh\n\ncontent\n");

        // The new document is reachable from the space.
        let docs = crate::wiki::walk_wiki_documents(&api, "space1").await.unwrap();
        assert!(docs.iter().any(|d| d.document_id == meta.document_id));
    }
}
