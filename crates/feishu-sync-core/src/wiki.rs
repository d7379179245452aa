//! Wiki-tree enumeration.

use crate::api::DocsApi;
use crate::block::FileType;
use crate::error::ApiError;

/// A document reachable from the space root.
#[derive(Debug, Clone)]
pub struct WikiDocument {
    pub node_token: String,
    pub document_id: String,
    pub title: String,
    pub file_type: FileType,
}

/// Depth-first walk of the space, collecting every `doc`/`docx` descendant.
///
/// Children are fetched only for nodes that report `has_child`; the result
/// order carries no meaning.
pub async fn walk_wiki_documents(
    api: &dyn DocsApi,
    space_id: &str,
) -> Result<Vec<WikiDocument>, ApiError> {
    let mut documents = Vec::new();
    let mut pending: Vec<Option<String>> = vec![None];

    while let Some(parent) = pending.pop() {
        let nodes = api.list_child_nodes(space_id, parent.as_deref()).await?;
        for node in nodes {
            if let Some(file_type) = node.file_type() {
                documents.push(WikiDocument {
                    node_token: node.node_token.clone(),
                    document_id: node.obj_token.clone(),
                    title: node.title.clone(),
                    file_type,
                });
            }
            if node.has_child {
                pending.push(Some(node.node_token));
            }
        }
    }
    Ok(documents)
}
