//! Local-directory enumeration and content hashing.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

use crate::manifest::MANIFEST_FILE;

/// SHA-256 digest of file content at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// A Markdown file found under the sync root.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub full_path: PathBuf,
    /// Path relative to the root, `/`-separated on every host.
    pub rel_path: String,
    pub hash: String,
}

const SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Whether a relative path belongs to the synced file set: a `.md` file
/// that is not a conflict copy, the manifest, or inside a skipped tree.
pub fn is_sync_candidate(rel_path: &str) -> bool {
    if !rel_path.ends_with(".md") || rel_path.ends_with(".remote.md") {
        return false;
    }
    if rel_path == MANIFEST_FILE {
        return false;
    }
    !rel_path
        .split('/')
        .any(|component| SKIPPED_DIRS.contains(&component))
}

/// Depth-first enumeration of the synced file set with content hashes.
pub fn walk_local_files(root: &Path) -> io::Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    walk_dir(root, root, &mut files)?;
    Ok(files)
}

fn walk_dir(root: &Path, dir: &Path, files: &mut Vec<LocalFile>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            walk_dir(root, &path, files)?;
            continue;
        }

        let rel_path = relative_path(root, &path);
        if !is_sync_candidate(&rel_path) {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        files.push(LocalFile {
            full_path: path,
            rel_path,
            hash: ContentHash::of(&content).into_string(),
        });
    }
    Ok(())
}

/// The `/`-separated path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
