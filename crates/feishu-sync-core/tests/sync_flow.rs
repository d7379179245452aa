//! End-to-end flows over the in-memory API: reconcile, live changes
//! through the processor, and conflict settlement.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use feishu_sync_core::{
    markdown_to_blocks, reconcile, ChangeProcessor, EchoGuard, InMemoryApi, LocalChangeKind,
    Manifest, ReconcileOptions, DEBOUNCE_MS,
};

const SPACE: &str = "space-e2e";

fn seed(api: &InMemoryApi, title: &str, body: &str) -> String {
    let draft = markdown_to_blocks(body);
    api.seed_document(
        SPACE,
        title,
        draft.blocks.iter().map(|d| d.block.clone()).collect(),
    )
}

async fn drain() {
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 4)).await;
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn test_full_space_lifecycle() {
    let api = InMemoryApi::new();
    let first = seed(&api, "Guide", "intro\n\n- step one\n- step two\n");
    let second = seed(&api, "Notes", "plain notes\n");
    let dir = TempDir::new().unwrap();

    // First pass pairs everything.
    let report = reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.downloaded, 2);
    assert!(dir.path().join("Guide.md").exists());
    assert!(dir.path().join("Notes.md").exists());

    // A local edit and a new local file both propagate out.
    std::fs::write(dir.path().join("Notes.md"), "# Notes\n\nupdated notes\n").unwrap();
    std::fs::write(dir.path().join("Fresh.md"), "# Fresh\n\nbrand new\n").unwrap();
    let report = reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.skipped, 1);

    let manifest = Manifest::load(dir.path());
    assert_eq!(manifest.docs.len(), 3);
    assert_eq!(manifest.space_id, SPACE);

    // Remote trash of one document takes its file along on the next pass.
    api.trash_document(&first);
    let report = reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.deleted_local, 1);
    assert!(!dir.path().join("Guide.md").exists());

    // Quiescent state: one more pass changes nothing.
    let report = reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    assert!(report.is_noop());
    assert!(api.contains_document(&second));
}

#[tokio::test]
async fn test_manifest_file_uniqueness_is_preserved() {
    let api = InMemoryApi::new();
    for body in ["a\n", "b\n", "c\n"] {
        seed(&api, "Clash", body);
    }
    let dir = TempDir::new().unwrap();

    reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();

    let manifest = Manifest::load(dir.path());
    let files: HashSet<&str> = manifest.docs.values().map(|e| e.file.as_str()).collect();
    assert_eq!(files.len(), manifest.docs.len());

    // Stable across a second pass: no drift toward new suffixes.
    reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    let again = Manifest::load(dir.path());
    let files_again: HashSet<&str> = again.docs.values().map(|e| e.file.as_str()).collect();
    assert_eq!(files, files_again);
}

#[tokio::test(start_paused = true)]
async fn test_live_edits_flow_through_processor() {
    let api = Arc::new(InMemoryApi::new());
    let doc_id = seed(&api, "Live", "v1\n");
    let dir = TempDir::new().unwrap();
    reconcile(&*api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();

    let guard = Arc::new(EchoGuard::new());
    let subscribed = Arc::new(Mutex::new(HashSet::new()));
    let (processor, handle) = ChangeProcessor::new(
        api.clone(),
        SPACE,
        dir.path().to_path_buf(),
        guard,
        subscribed,
        ReconcileOptions::default(),
    );
    let worker = tokio::spawn(processor.run());

    // A local edit flows up through the processor.
    std::fs::write(dir.path().join("Live.md"), "# Live\n\nv2 from disk\n").unwrap();
    handle.local_change("Live.md".into(), LocalChangeKind::Modified);
    drain().await;

    let (_, markdown) = feishu_sync_core::transfer::fetch_markdown(&*api, &doc_id)
        .await
        .unwrap();
    assert!(markdown.contains("v2 from disk"));

    // A remote edit arrives over the event stream; the processor refreshes
    // the paired file.
    let draft = markdown_to_blocks("v3 remote\n");
    api.edit_document(&doc_id, draft.blocks.iter().map(|d| d.block.clone()).collect());
    handle.remote_event("drive.file.edit_v1", doc_id.clone(), None);
    drain().await;

    let content = std::fs::read_to_string(dir.path().join("Live.md")).unwrap();
    assert!(content.contains("v3 remote"));
    let manifest = Manifest::load(dir.path());
    assert_eq!(
        manifest.docs.get(&doc_id).unwrap().revision_id,
        api.revision(&doc_id)
    );

    handle.shutdown();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_conflict_leaves_both_copies() {
    let api = InMemoryApi::new();
    let doc_id = seed(&api, "Contested", "base\n");
    let dir = TempDir::new().unwrap();
    reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();

    std::fs::write(dir.path().join("Contested.md"), "# Contested\n\nmine\n").unwrap();
    let draft = markdown_to_blocks("theirs\n");
    api.edit_document(&doc_id, draft.blocks.iter().map(|d| d.block.clone()).collect());

    let report = reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.conflicts, 1);

    let mine = std::fs::read_to_string(dir.path().join("Contested.md")).unwrap();
    let theirs = std::fs::read_to_string(dir.path().join("Contested.remote.md")).unwrap();
    assert!(mine.contains("mine"));
    assert!(theirs.contains("theirs"));

    // The conflict artifact never becomes a tracked file: the next pass
    // reports the same conflict instead of uploading it.
    let report = reconcile(&api, SPACE, dir.path(), &ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.uploaded, 0);
    let manifest = Manifest::load(dir.path());
    assert_eq!(manifest.docs.len(), 1);
}
