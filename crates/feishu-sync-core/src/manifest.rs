//! Persisted record of document pairings.
//!
//! The manifest maps each remote `documentId` to its local file, last
//! observed revision, and the content hash that matched the server at the
//! last successful propagation. It is the reconciler's memory across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::block::FileType;

/// File name of the manifest inside the sync root.
pub const MANIFEST_FILE: &str = ".feishu-sync.json";

/// Pairing state for a single document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocEntry {
    /// Path relative to the sync root, `/`-separated, unique across entries.
    pub file: String,

    /// Last-observed server revision.
    #[serde(default)]
    pub revision_id: Option<i64>,

    /// Last-known server title.
    pub title: String,

    /// Server-side document category.
    pub file_type: FileType,

    /// SHA-256 of the Markdown content last known to match the server.
    #[serde(default)]
    pub hash: Option<String>,
}

/// The paired-state map persisted at `<rootDir>/.feishu-sync.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// The wiki space bound to this root.
    #[serde(default)]
    pub space_id: String,

    /// Timestamp of the last write.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// documentId → pairing. BTreeMap keeps the serialized form stable.
    #[serde(default)]
    pub docs: BTreeMap<String, DocEntry>,
}

impl Manifest {
    /// Load the manifest from `root_dir`.
    ///
    /// A missing or malformed file yields an empty manifest; reconciliation
    /// re-derives the pairings, so a parse failure is never fatal.
    pub fn load(root_dir: &Path) -> Self {
        let path = root_dir.join(MANIFEST_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Malformed manifest at {}: {}; starting empty", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist the manifest under `root_dir` with a refreshed `updatedAt`.
    ///
    /// Writes to a temp file in the same directory and renames it over the
    /// target, so readers observe either the previous or the new complete
    /// JSON, never a partial file.
    pub fn store(&mut self, root_dir: &Path) -> std::io::Result<()> {
        self.updated_at = Some(Utc::now());
        let path = root_dir.join(MANIFEST_FILE);
        let tmp = root_dir.join(format!("{MANIFEST_FILE}.tmp"));
        let json = serde_json::to_string_pretty(self).expect("manifest serializes");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)
    }

    /// Look up the entry paired with a local relative path.
    pub fn entry_for_file(&self, rel_path: &str) -> Option<(&str, &DocEntry)> {
        self.docs
            .iter()
            .find(|(_, entry)| entry.file == rel_path)
            .map(|(id, entry)| (id.as_str(), entry))
    }

    /// Every `file` currently claimed by an entry.
    pub fn used_paths(&self) -> HashSet<String> {
        self.docs.values().map(|e| e.file.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(file: &str) -> DocEntry {
        DocEntry {
            file: file.into(),
            revision_id: Some(3),
            title: "Title".into(),
            file_type: FileType::Docx,
            hash: Some("ab".repeat(32)),
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::load(dir.path());
        assert!(manifest.docs.is_empty());
        assert!(manifest.space_id.is_empty());
    }

    #[test]
    fn test_load_malformed_is_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{not json").unwrap();
        let manifest = Manifest::load(dir.path());
        assert!(manifest.docs.is_empty());
    }

    #[test]
    fn test_store_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest {
            space_id: "space1".into(),
            ..Default::default()
        };
        manifest.docs.insert("doc1".into(), entry("Hello.md"));
        manifest.store(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path());
        assert_eq!(loaded.space_id, "space1");
        assert_eq!(loaded.docs.get("doc1").unwrap().file, "Hello.md");
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_store_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::default();
        manifest.store(dir.path()).unwrap();
        manifest.store(dir.path()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![MANIFEST_FILE.to_string()]);
    }

    #[test]
    fn test_entry_for_file() {
        let mut manifest = Manifest::default();
        manifest.docs.insert("doc1".into(), entry("a.md"));
        manifest.docs.insert("doc2".into(), entry("b.md"));

        let (id, _) = manifest.entry_for_file("b.md").unwrap();
        assert_eq!(id, "doc2");
        assert!(manifest.entry_for_file("c.md").is_none());
    }

    #[test]
    fn test_used_paths() {
        let mut manifest = Manifest::default();
        manifest.docs.insert("doc1".into(), entry("a.md"));
        manifest.docs.insert("doc2".into(), entry("b.md"));

        let used = manifest.used_paths();
        assert!(used.contains("a.md"));
        assert!(used.contains("b.md"));
        assert_eq!(used.len(), 2);
    }

    #[test]
    fn test_camel_case_keys() {
        let mut manifest = Manifest {
            space_id: "s".into(),
            ..Default::default()
        };
        manifest.docs.insert("d".into(), entry("f.md"));
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"spaceId\""));
        assert!(json.contains("\"revisionId\""));
        assert!(json.contains("\"fileType\":\"docx\""));
    }
}
