//! One-shot bidirectional reconciliation.
//!
//! Enumerates both sides, diffs revision+hash against the manifest, and
//! settles every pairing with at most one write per document. The manifest
//! is persisted only after the pass succeeds, so a crash leaves the
//! previous (still correct) state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::api::{DocsApi, DocumentMeta};
use crate::error::SyncError;
use crate::local::{walk_local_files, LocalFile};
use crate::manifest::{DocEntry, Manifest};
use crate::transfer::{create_remote_document, download_document, fetch_markdown, upload_markdown, write_markdown};
use crate::wiki::{walk_wiki_documents, WikiDocument};

/// Counters reported at the end of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: u32,
    pub uploaded: u32,
    pub deleted_local: u32,
    pub deleted_remote: u32,
    pub conflicts: u32,
    pub skipped: u32,
}

impl SyncReport {
    /// True when the pass changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        self.downloaded == 0
            && self.uploaded == 0
            && self.deleted_local == 0
            && self.deleted_remote == 0
            && self.conflicts == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} uploaded, {} deleted locally, {} deleted remotely, {} conflicts, {} skipped",
            self.downloaded,
            self.uploaded,
            self.deleted_local,
            self.deleted_remote,
            self.conflicts,
            self.skipped
        )
    }
}

/// Knobs for a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// When a paired local file is missing, delete the remote document
    /// (the alternative re-downloads it instead).
    pub delete_remote_on_local_missing: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            delete_remote_on_local_missing: true,
        }
    }
}

/// Strip characters that cannot appear in file names.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Compute the desired file name for a document, unique against every used
/// path except the entry's own current file (otherwise each pass would
/// drift names toward `-1` suffixes).
pub(crate) fn desired_filename(
    title: &str,
    document_id: &str,
    used: &HashSet<String>,
    own: Option<&str>,
) -> String {
    let base = sanitize_title(title);
    let base = if base.is_empty() { document_id } else { &base };

    let in_use = |candidate: &str| used.contains(candidate) && own != Some(candidate);

    let mut candidate = format!("{base}.md");
    let mut suffix = 1;
    while in_use(&candidate) {
        candidate = format!("{base}-{suffix}.md");
        suffix += 1;
    }
    candidate
}

fn conflict_path(rel_path: &str) -> String {
    let stem = rel_path.strip_suffix(".md").unwrap_or(rel_path);
    format!("{stem}.remote.md")
}

/// Run one bidirectional pass for `space_id` over `root_dir`.
pub async fn reconcile(
    api: &dyn DocsApi,
    space_id: &str,
    root_dir: &Path,
    options: &ReconcileOptions,
) -> Result<SyncReport, SyncError> {
    let mut report = SyncReport::default();
    let mut manifest = Manifest::load(root_dir);

    if !manifest.space_id.is_empty() && manifest.space_id != space_id {
        warn!(
            "Manifest is bound to space {} but {} is configured; re-pairing from scratch",
            manifest.space_id, space_id
        );
        manifest.docs.clear();
    }
    manifest.space_id = space_id.to_string();

    let mut local_map: HashMap<String, LocalFile> = walk_local_files(root_dir)
        .map_err(|e| SyncError::io(root_dir.display().to_string(), e))?
        .into_iter()
        .map(|f| (f.rel_path.clone(), f))
        .collect();

    // Remote set with freshly fetched metadata; a document that vanishes
    // between the walk and the fetch is treated as absent.
    let mut remote_map: HashMap<String, (WikiDocument, DocumentMeta)> = HashMap::new();
    for doc in walk_wiki_documents(api, space_id).await? {
        if remote_map.contains_key(&doc.document_id) {
            continue;
        }
        match api.document_meta(&doc.document_id).await {
            Ok(meta) => {
                remote_map.insert(doc.document_id.clone(), (doc, meta));
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let mut used_paths: HashSet<String> = local_map.keys().cloned().collect();
    used_paths.extend(manifest.used_paths());

    let mut remote_ids: Vec<String> = remote_map.keys().cloned().collect();
    remote_ids.sort();
    for document_id in remote_ids {
        let (doc, meta) = remote_map.get(&document_id).expect("present").clone();
        let title = if meta.title.is_empty() { &doc.title } else { &meta.title };
        let existing = manifest.docs.get(&document_id).cloned();

        let Some(mut entry) = existing else {
            // First pairing: download to the desired name.
            let rel = desired_filename(title, &document_id, &used_paths, None);
            let (meta, hash) = download_document(api, root_dir, &rel, &document_id).await?;
            used_paths.insert(rel.clone());
            manifest.docs.insert(
                document_id.clone(),
                DocEntry {
                    file: rel,
                    revision_id: meta.revision_id,
                    title: meta.title,
                    file_type: doc.file_type,
                    hash: Some(hash),
                },
            );
            report.downloaded += 1;
            continue;
        };

        // Rename before change detection so a title move never reads as an
        // edit.
        let desired = desired_filename(title, &document_id, &used_paths, Some(&entry.file));
        if entry.file != desired {
            let old_full = root_dir.join(&entry.file);
            if old_full.exists() {
                tokio::fs::rename(&old_full, root_dir.join(&desired))
                    .await
                    .map_err(|e| SyncError::io(entry.file.clone(), e))?;
            }
            if let Some(mut local) = local_map.remove(&entry.file) {
                local.rel_path = desired.clone();
                local.full_path = root_dir.join(&desired);
                local_map.insert(desired.clone(), local);
            }
            used_paths.remove(&entry.file);
            used_paths.insert(desired.clone());
            info!("Renamed {} -> {}", entry.file, desired);
            entry.file = desired;
        }

        let file_rel = entry.file.clone();
        let Some(local) = local_map.get(&file_rel) else {
            // The user removed the file; propagate the deletion.
            if options.delete_remote_on_local_missing {
                api.delete_document(&document_id, entry.file_type).await?;
                manifest.docs.remove(&document_id);
                used_paths.remove(&file_rel);
                report.deleted_remote += 1;
            } else {
                let (meta, hash) = download_document(api, root_dir, &file_rel, &document_id).await?;
                entry.revision_id = meta.revision_id;
                entry.title = meta.title;
                entry.hash = Some(hash);
                manifest.docs.insert(document_id.clone(), entry);
                report.downloaded += 1;
            }
            continue;
        };

        let local_changed = entry.hash.as_deref().is_some_and(|h| h != local.hash);
        let remote_changed = match (entry.revision_id, meta.revision_id) {
            (Some(known), Some(fresh)) => known != fresh,
            _ => false,
        };

        if local_changed && remote_changed {
            // Both sides moved: save the remote copy beside the file and
            // leave the pairing untouched for the user to resolve.
            let (_, markdown) = fetch_markdown(api, &document_id).await?;
            let conflict_rel = conflict_path(&file_rel);
            write_markdown(root_dir, &conflict_rel, &markdown).await?;
            warn!("Conflict on {file_rel}; remote copy saved as {conflict_rel}");
            manifest.docs.insert(document_id.clone(), entry);
            report.conflicts += 1;
        } else if remote_changed {
            let (meta, hash) = download_document(api, root_dir, &file_rel, &document_id).await?;
            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
            entry.file_type = doc.file_type;
            entry.hash = Some(hash);
            manifest.docs.insert(document_id.clone(), entry);
            report.downloaded += 1;
        } else if local_changed {
            let content = match tokio::fs::read_to_string(&local.full_path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Vanished since the walk; same as a user deletion.
                    if options.delete_remote_on_local_missing {
                        api.delete_document(&document_id, entry.file_type).await?;
                        manifest.docs.remove(&document_id);
                        used_paths.remove(&file_rel);
                        report.deleted_remote += 1;
                    }
                    continue;
                }
                Err(e) => return Err(SyncError::io(file_rel.clone(), e)),
            };
            upload_markdown(api, &document_id, &content).await?;
            let meta = api.document_meta(&document_id).await?;
            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
            entry.hash = Some(local.hash.clone());
            manifest.docs.insert(document_id.clone(), entry);
            report.uploaded += 1;
        } else {
            entry.revision_id = meta.revision_id;
            entry.title = title.to_string();
            entry.file_type = doc.file_type;
            manifest.docs.insert(document_id.clone(), entry);
            report.skipped += 1;
        }
    }

    // Documents gone from the space take their local files with them.
    let gone: Vec<String> = manifest
        .docs
        .keys()
        .filter(|id| !remote_map.contains_key(*id))
        .cloned()
        .collect();
    for document_id in gone {
        let entry = manifest.docs.remove(&document_id).expect("present");
        if local_map.remove(&entry.file).is_some() {
            match tokio::fs::remove_file(root_dir.join(&entry.file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io(entry.file.clone(), e)),
            }
        }
        used_paths.remove(&entry.file);
        info!("Removed {} (remote document {} gone)", entry.file, document_id);
        report.deleted_local += 1;
    }

    // Unpaired local files become new remote documents.
    let mut unpaired: Vec<String> = local_map
        .keys()
        .filter(|rel| manifest.entry_for_file(rel).is_none())
        .cloned()
        .collect();
    unpaired.sort();
    for rel in unpaired {
        let local = &local_map[&rel];
        let content = match tokio::fs::read_to_string(&local.full_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(SyncError::io(rel.clone(), e)),
        };
        let meta = create_remote_document(api, space_id, &content).await?;
        manifest.docs.insert(
            meta.document_id.clone(),
            DocEntry {
                file: rel.clone(),
                revision_id: meta.revision_id,
                title: meta.title,
                file_type: crate::block::FileType::Docx,
                hash: Some(local.hash.clone()),
            },
        );
        info!("Created remote document for {rel}");
        report.uploaded += 1;
    }

    manifest
        .store(root_dir)
        .map_err(|e| SyncError::io(root_dir.display().to_string(), e))?;

    info!("Reconciliation finished: {report}");
    Ok(report)
}
