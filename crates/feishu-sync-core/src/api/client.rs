//! reqwest implementation of `DocsApi` for the open-apis surface.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{DocsApi, DocumentMeta, Result, WikiNode};
use crate::block::{Block, FileType};
use crate::error::ApiError;

const BASE_URL: &str = "https://open.feishu.cn/open-apis";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 5;

/// Page sizes per endpoint family.
const WIKI_PAGE_SIZE: u32 = 50;
const BLOCK_PAGE_SIZE: u32 = 100;

/// Delay before retry `attempt` (1-based): 1s doubling, capped at 8s.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64 << (attempt.saturating_sub(1)).min(3);
    Duration::from_secs(secs)
}

#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    has_more: Option<bool>,
    #[serde(default, alias = "next_page_token")]
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct DocumentData {
    document: DocumentMeta,
}

#[derive(Deserialize)]
struct CreatedChildren {
    #[serde(default)]
    children: Vec<Block>,
}

/// Bearer-token client for the remote HTTP surface.
pub struct FeishuClient {
    http: Client,
    base_url: String,
    token: String,
}

impl FeishuClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client builds");
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Perform one API call with the retry policy: 429 honors `Retry-After`
    /// (else exponential backoff), network errors use the same schedule, and
    /// a non-zero envelope code fails immediately with the server message.
    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .query(query);
            if let Some(body) = body {
                req = req.json(body);
            }

            let transient = match req.send().await {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let delay = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_secs);
                    (delay, format!("{operation}: HTTP 429"))
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = match resp.text().await {
                        Ok(t) => t,
                        Err(e) => {
                            attempt += 1;
                            if attempt > MAX_RETRIES {
                                return Err(ApiError::RetriesExhausted {
                                    operation,
                                    attempts: attempt,
                                    last: e.to_string(),
                                });
                            }
                            tokio::time::sleep(backoff_delay(attempt)).await;
                            continue;
                        }
                    };
                    let envelope: Envelope = serde_json::from_str(&text)
                        .map_err(|_| ApiError::BadBody { operation, status })?;
                    if envelope.code != 0 {
                        return Err(ApiError::Server {
                            operation,
                            code: envelope.code,
                            msg: envelope.msg,
                        });
                    }
                    return Ok(envelope.data.unwrap_or(Value::Null));
                }
                Err(e) => (None, format!("{operation}: {e}")),
            };

            attempt += 1;
            if attempt > MAX_RETRIES {
                return Err(ApiError::RetriesExhausted {
                    operation,
                    attempts: attempt,
                    last: transient.1,
                });
            }
            let delay = transient.0.unwrap_or_else(|| backoff_delay(attempt));
            warn!("{} (attempt {attempt}/{MAX_RETRIES}), retrying in {delay:?}", transient.1);
            tokio::time::sleep(delay).await;
        }
    }

    fn decode<T: DeserializeOwned>(operation: &'static str, data: Value) -> Result<T> {
        serde_json::from_value(data).map_err(|e| {
            debug!("{operation}: unexpected payload shape: {e}");
            ApiError::BadBody { operation, status: 200 }
        })
    }

    /// Follow `page_token` until `has_more` is false, or until the token
    /// runs out when `has_more` is absent.
    async fn paged<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        base_query: &[(&str, String)],
        page_size: u32,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = base_query.to_vec();
            query.push(("page_size", page_size.to_string()));
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }
            let data = self.call(operation, Method::GET, path, &query, None).await?;
            let page: Page<T> = Self::decode(operation, data)?;
            items.extend(page.items);

            let next = page.page_token.filter(|t| !t.is_empty());
            match (page.has_more, next) {
                (Some(true), Some(token)) => page_token = Some(token),
                (None, Some(token)) => page_token = Some(token),
                _ => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl DocsApi for FeishuClient {
    async fn list_child_nodes(&self, space_id: &str, parent: Option<&str>) -> Result<Vec<WikiNode>> {
        let path = format!("/wiki/v2/spaces/{space_id}/nodes");
        let mut query = Vec::new();
        if let Some(parent) = parent {
            query.push(("parent_node_token", parent.to_string()));
        }
        self.paged("list wiki nodes", &path, &query, WIKI_PAGE_SIZE).await
    }

    async fn document_meta(&self, document_id: &str) -> Result<DocumentMeta> {
        let path = format!("/docx/v1/documents/{document_id}");
        let data = self.call("get document", Method::GET, &path, &[], None).await?;
        Ok(Self::decode::<DocumentData>("get document", data)?.document)
    }

    async fn document_blocks(&self, document_id: &str) -> Result<Vec<Block>> {
        let path = format!("/docx/v1/documents/{document_id}/blocks");
        let query = [("document_revision_id", "-1".to_string())];
        self.paged("list blocks", &path, &query, BLOCK_PAGE_SIZE).await
    }

    async fn create_document(&self, title: Option<&str>) -> Result<String> {
        let body = match title {
            Some(title) => json!({ "title": title }),
            None => json!({}),
        };
        let attempt = self
            .call("create document", Method::POST, "/docx/v1/documents", &[], Some(&body))
            .await;
        // A rejected title is recoverable: create untitled and let the
        // caller prepend a heading block instead.
        let data = match (attempt, title) {
            (Ok(data), _) => data,
            (Err(e), Some(_)) => {
                warn!("create document with title failed ({e}); retrying untitled");
                self.call("create document", Method::POST, "/docx/v1/documents", &[], Some(&json!({})))
                    .await?
            }
            (Err(e), None) => return Err(e),
        };
        let doc = Self::decode::<DocumentData>("create document", data)?.document;
        Ok(doc.document_id)
    }

    async fn append_children(
        &self,
        document_id: &str,
        parent_id: &str,
        index: u32,
        children: &[Block],
    ) -> Result<Vec<Block>> {
        let path = format!("/docx/v1/documents/{document_id}/blocks/{parent_id}/children");
        let body = json!({ "index": index, "children": children });
        let data = self
            .call("append blocks", Method::POST, &path, &[], Some(&body))
            .await?;
        Ok(Self::decode::<CreatedChildren>("append blocks", data)?.children)
    }

    async fn batch_delete_children(
        &self,
        document_id: &str,
        parent_id: &str,
        start: u32,
        end: u32,
    ) -> Result<()> {
        let path =
            format!("/docx/v1/documents/{document_id}/blocks/{parent_id}/children/batch_delete");
        let query = [("document_revision_id", "-1".to_string())];
        let body = json!({ "start_index": start, "end_index": end });
        self.call("delete blocks", Method::DELETE, &path, &query, Some(&body))
            .await?;
        Ok(())
    }

    async fn move_to_wiki(&self, space_id: &str, file_type: FileType, obj_token: &str) -> Result<()> {
        let path = format!("/wiki/v2/spaces/{space_id}/nodes/move_docs_to_wiki");
        let body = json!({ "obj_type": file_type.as_str(), "obj_token": obj_token });
        self.call("move to wiki", Method::POST, &path, &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn subscribe_document(&self, document_id: &str, file_type: FileType) -> Result<()> {
        let path = format!("/drive/v1/files/{document_id}/subscribe");
        let query = [("file_type", file_type.as_str().to_string())];
        self.call("subscribe document", Method::POST, &path, &query, Some(&json!({})))
            .await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str, file_type: FileType) -> Result<()> {
        let path = format!("/drive/v1/files/{document_id}");
        let query = [("type", file_type.as_str().to_string())];
        self.call("delete document", Method::DELETE, &path, &query, None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        // 1s, 2s, 4s, 8s, then capped at 8s.
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(8));
        assert_eq!(backoff_delay(9), Duration::from_secs(8));
    }

    #[test]
    fn test_envelope_error_shape() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"code": 1770002, "msg": "document deleted"}"#).unwrap();
        assert_eq!(envelope.code, 1770002);
        assert_eq!(envelope.msg, "document deleted");
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_page_accepts_both_token_names() {
        let page: Page<WikiNode> = serde_json::from_str(
            r#"{"items": [], "has_more": true, "next_page_token": "abc"}"#,
        )
        .unwrap();
        assert_eq!(page.page_token.as_deref(), Some("abc"));

        let page: Page<WikiNode> =
            serde_json::from_str(r#"{"items": [], "has_more": false, "page_token": "xyz"}"#).unwrap();
        assert_eq!(page.page_token.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_page_defaults() {
        let page: Page<WikiNode> = serde_json::from_str("{}").unwrap();
        assert!(page.items.is_empty());
        assert!(page.has_more.is_none());
        assert!(page.page_token.is_none());
    }
}
