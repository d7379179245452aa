//! Debounced, deduplicated per-document work queue.
//!
//! The processor is an owned actor: event sources post messages into its
//! inbox and a single consumer executes actions, which also serializes
//! every manifest write after startup. Per-document debounce timers live in
//! a map keyed by `documentId`; a timer task posts a fire message back into
//! the inbox when its deadline passes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::DocsApi;
use crate::block::FileType;
use crate::error::SyncError;
use crate::guard::EchoGuard;
use crate::local::ContentHash;
use crate::manifest::Manifest;
use crate::reconcile::{desired_filename, reconcile, ReconcileOptions};
use crate::transfer::{download_document, fetch_markdown, upload_markdown, write_markdown};
use crate::wiki::walk_wiki_documents;
use crate::{DEBOUNCE_MS, DEDUPE_WINDOW_MS};

/// Remote event kinds the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEventKind {
    CreatedInFolder,
    Edit,
    TitleUpdated,
    Trashed,
}

impl RemoteEventKind {
    /// Map a wire event type to a kind; unknown types are ignored.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "drive.file.created_in_folder_v1" => Some(Self::CreatedInFolder),
            "drive.file.edit_v1" => Some(Self::Edit),
            "drive.file.title_updated_v1" => Some(Self::TitleUpdated),
            "drive.file.trashed_v1" => Some(Self::Trashed),
            _ => None,
        }
    }
}

/// What happened to a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalChangeKind {
    Modified,
    Deleted,
}

/// Messages accepted by the processor inbox.
#[derive(Debug)]
pub enum ProcessorMsg {
    Remote {
        kind: RemoteEventKind,
        document_id: String,
        file_type: Option<FileType>,
    },
    Local {
        rel_path: String,
        kind: LocalChangeKind,
    },
    Fire {
        document_id: String,
    },
    FullSync {
        reason: String,
    },
    PollWiki,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocAction {
    Refresh,
    Upload,
}

struct DocState {
    action: DocAction,
    file_type: Option<FileType>,
    last_event_at: Instant,
    deadline: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Sender half handed to event sources.
#[derive(Clone)]
pub struct ProcessorHandle {
    tx: mpsc::UnboundedSender<ProcessorMsg>,
    poll_in_flight: Arc<AtomicBool>,
}

impl ProcessorHandle {
    /// Forward a remote event by its wire type. Unknown types are dropped.
    pub fn remote_event(&self, event_type: &str, document_id: String, file_type: Option<FileType>) {
        let Some(kind) = RemoteEventKind::from_event_type(event_type) else {
            debug!("Ignoring unhandled event type {event_type}");
            return;
        };
        let _ = self.tx.send(ProcessorMsg::Remote {
            kind,
            document_id,
            file_type,
        });
    }

    pub fn local_change(&self, rel_path: String, kind: LocalChangeKind) {
        let _ = self.tx.send(ProcessorMsg::Local { rel_path, kind });
    }

    pub fn request_full_sync(&self, reason: impl Into<String>) {
        let _ = self.tx.send(ProcessorMsg::FullSync {
            reason: reason.into(),
        });
    }

    /// Request a wiki poll unless one is already queued or running.
    pub fn try_poll_wiki(&self) -> bool {
        if self
            .poll_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if self.tx.send(ProcessorMsg::PollWiki).is_err() {
            self.poll_in_flight.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ProcessorMsg::Shutdown);
    }
}

/// The actor owning per-document scheduling state.
pub struct ChangeProcessor {
    api: Arc<dyn DocsApi>,
    space_id: String,
    root_dir: PathBuf,
    options: ReconcileOptions,
    guard: Arc<EchoGuard>,
    subscribed: Arc<StdMutex<HashSet<String>>>,
    poll_in_flight: Arc<AtomicBool>,
    inbox: mpsc::UnboundedReceiver<ProcessorMsg>,
    self_tx: mpsc::UnboundedSender<ProcessorMsg>,
    states: HashMap<String, DocState>,
    debounce: Duration,
    dedupe_window: Duration,
}

impl ChangeProcessor {
    pub fn new(
        api: Arc<dyn DocsApi>,
        space_id: impl Into<String>,
        root_dir: PathBuf,
        guard: Arc<EchoGuard>,
        subscribed: Arc<StdMutex<HashSet<String>>>,
        options: ReconcileOptions,
    ) -> (Self, ProcessorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poll_in_flight = Arc::new(AtomicBool::new(false));
        let handle = ProcessorHandle {
            tx: tx.clone(),
            poll_in_flight: poll_in_flight.clone(),
        };
        (
            Self {
                api,
                space_id: space_id.into(),
                root_dir,
                options,
                guard,
                subscribed,
                poll_in_flight,
                inbox: rx,
                self_tx: tx,
                states: HashMap::new(),
                debounce: Duration::from_millis(DEBOUNCE_MS),
                dedupe_window: Duration::from_millis(DEDUPE_WINDOW_MS),
            },
            handle,
        )
    }

    /// Consume the inbox until shutdown.
    pub async fn run(mut self) {
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                ProcessorMsg::Remote {
                    kind,
                    document_id,
                    file_type,
                } => self.on_remote(kind, document_id, file_type),
                ProcessorMsg::Local { rel_path, kind } => self.on_local(rel_path, kind),
                ProcessorMsg::Fire { document_id } => self.on_fire(document_id).await,
                ProcessorMsg::FullSync { reason } => self.run_full_sync(&reason).await,
                ProcessorMsg::PollWiki => self.run_poll().await,
                ProcessorMsg::Shutdown => break,
            }
        }
        for (_, state) in self.states.drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
    }

    fn on_remote(&mut self, kind: RemoteEventKind, document_id: String, file_type: Option<FileType>) {
        match kind {
            // Deletions and folder-level creations re-derive everything.
            RemoteEventKind::Trashed | RemoteEventKind::CreatedInFolder => {
                let _ = self.self_tx.send(ProcessorMsg::FullSync {
                    reason: format!("remote event {kind:?}"),
                });
            }
            RemoteEventKind::Edit | RemoteEventKind::TitleUpdated => {
                self.enqueue(document_id, DocAction::Refresh, file_type);
            }
        }
    }

    fn on_local(&mut self, rel_path: String, kind: LocalChangeKind) {
        if kind == LocalChangeKind::Deleted {
            // Deletion propagation is the reconciler's branch.
            if self.guard.ignoring_local() || self.guard.is_echo(now_wall_ms()) {
                debug!("Dropping engine-driven deletion of {rel_path}");
                return;
            }
            let _ = self.self_tx.send(ProcessorMsg::FullSync {
                reason: format!("local deletion of {rel_path}"),
            });
            return;
        }

        let mtime_ms = std::fs::metadata(self.root_dir.join(&rel_path))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_else(now_wall_ms);
        if self.guard.is_echo(mtime_ms) {
            debug!("Dropping echo for {rel_path}");
            return;
        }

        let manifest = Manifest::load(&self.root_dir);
        match manifest.entry_for_file(&rel_path) {
            Some((document_id, entry)) => {
                let document_id = document_id.to_string();
                let file_type = Some(entry.file_type);
                self.enqueue(document_id, DocAction::Upload, file_type);
            }
            None => {
                let _ = self.self_tx.send(ProcessorMsg::FullSync {
                    reason: format!("unpaired local change {rel_path}"),
                });
            }
        }
    }

    /// Schedule an action with dedupe + debounce: an identical pair within
    /// the dedupe window whose action already ran is dropped; otherwise the
    /// debounce timer (re)arms so a burst coalesces into one run after the
    /// last event.
    fn enqueue(&mut self, document_id: String, action: DocAction, file_type: Option<FileType>) {
        let now = Instant::now();
        if let Some(state) = self.states.get(&document_id) {
            let identical = state.action == action
                && now.duration_since(state.last_event_at) < self.dedupe_window;
            if identical && state.timer.is_none() {
                debug!("Dropping duplicate {action:?} for {document_id}");
                return;
            }
        }

        let deadline = now + self.debounce;
        let timer = self.arm_timer(document_id.clone());
        let previous = self.states.insert(
            document_id,
            DocState {
                action,
                file_type,
                last_event_at: now,
                deadline,
                timer: Some(timer),
            },
        );
        if let Some(previous) = previous {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }
    }

    fn arm_timer(&self, document_id: String) -> JoinHandle<()> {
        let tx = self.self_tx.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx.send(ProcessorMsg::Fire { document_id });
        })
    }

    async fn on_fire(&mut self, document_id: String) {
        let due = match self.states.get(&document_id) {
            Some(state) => state.deadline <= Instant::now(),
            None => return,
        };
        // A fire from an aborted-but-already-elapsed timer arrives early;
        // the re-armed timer will deliver the real one.
        if !due {
            return;
        }
        let state = self.states.get_mut(&document_id).expect("checked above");
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let action = state.action;
        let file_type = state.file_type;

        let result = match action {
            DocAction::Refresh => self.refresh_document(&document_id, file_type).await,
            DocAction::Upload => self.upload_document(&document_id).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() || matches!(e, SyncError::UnknownPairing(_)) => {
                warn!("Single-document action for {document_id} failed ({e})");
                let _ = self.self_tx.send(ProcessorMsg::FullSync {
                    reason: "fallback".into(),
                });
            }
            Err(e) => error!("{action:?} for {document_id} failed: {e}"),
        }
    }

    /// Pull the current remote state of one document into its paired file.
    async fn refresh_document(
        &self,
        document_id: &str,
        file_type: Option<FileType>,
    ) -> Result<(), SyncError> {
        let mut manifest = Manifest::load(&self.root_dir);
        let Some(mut entry) = manifest.docs.get(document_id).cloned() else {
            return Err(SyncError::UnknownPairing(document_id.to_string()));
        };

        let (meta, markdown) = fetch_markdown(self.api.as_ref(), document_id).await?;
        let hash = ContentHash::of(&markdown).into_string();

        if entry.hash.as_deref() == Some(hash.as_str()) {
            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
        } else {
            self.guard.begin_engine_writes();
            let written = write_markdown(&self.root_dir, &entry.file, &markdown).await;
            self.guard.end_engine_writes();
            written?;
            info!("Refreshed {} from {document_id}", entry.file);
            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
            entry.hash = Some(hash);
        }
        if let Some(file_type) = file_type {
            entry.file_type = file_type;
        }
        manifest.docs.insert(document_id.to_string(), entry);
        manifest
            .store(&self.root_dir)
            .map_err(|e| SyncError::io(self.root_dir.display().to_string(), e))
    }

    /// Push the paired file of one document to the remote side.
    async fn upload_document(&self, document_id: &str) -> Result<(), SyncError> {
        let mut manifest = Manifest::load(&self.root_dir);
        let Some(mut entry) = manifest.docs.get(document_id).cloned() else {
            return Err(SyncError::UnknownPairing(document_id.to_string()));
        };

        let full = self.root_dir.join(&entry.file);
        let content = match tokio::fs::read_to_string(&full).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // The file vanished between event and action.
                return Err(SyncError::UnknownPairing(entry.file.clone()));
            }
            Err(e) => return Err(SyncError::io(entry.file.clone(), e)),
        };

        upload_markdown(self.api.as_ref(), document_id, &content).await?;
        let meta = self.api.document_meta(document_id).await?;
        info!("Uploaded {} to {document_id}", entry.file);

        entry.revision_id = meta.revision_id;
        entry.title = meta.title;
        entry.hash = Some(ContentHash::of(&content).into_string());
        manifest.docs.insert(document_id.to_string(), entry);
        manifest
            .store(&self.root_dir)
            .map_err(|e| SyncError::io(self.root_dir.display().to_string(), e))
    }

    /// Re-derive everything from scratch; supersedes buffered per-document
    /// work.
    async fn run_full_sync(&mut self, reason: &str) {
        info!("Running full reconciliation ({reason})");
        self.guard.begin_engine_writes();
        let result = reconcile(self.api.as_ref(), &self.space_id, &self.root_dir, &self.options).await;
        self.guard.end_engine_writes();

        for (_, state) in self.states.drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }

        match result {
            Ok(report) => {
                info!("Full reconciliation done: {report}");
                self.subscribe_missing().await;
            }
            Err(e) => error!("Full reconciliation failed: {e}"),
        }
    }

    /// Pick up documents created in the space since the last look.
    async fn run_poll(&mut self) {
        if let Err(e) = self.poll_wiki_once().await {
            warn!("Wiki poll failed: {e}");
        }
        self.poll_in_flight.store(false, Ordering::SeqCst);
    }

    async fn poll_wiki_once(&mut self) -> Result<(), SyncError> {
        let docs = walk_wiki_documents(self.api.as_ref(), &self.space_id).await?;
        let mut manifest = Manifest::load(&self.root_dir);
        if manifest.space_id.is_empty() {
            manifest.space_id = self.space_id.clone();
        }

        let mut seen = HashSet::new();
        let fresh: Vec<_> = docs
            .into_iter()
            .filter(|d| !manifest.docs.contains_key(&d.document_id))
            .filter(|d| seen.insert(d.document_id.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let mut used = manifest.used_paths();
        used.extend(
            crate::local::walk_local_files(&self.root_dir)
                .map_err(|e| SyncError::io(self.root_dir.display().to_string(), e))?
                .into_iter()
                .map(|f| f.rel_path),
        );

        self.guard.begin_engine_writes();
        for doc in fresh {
            let rel = desired_filename(&doc.title, &doc.document_id, &used, None);
            match download_document(self.api.as_ref(), &self.root_dir, &rel, &doc.document_id).await
            {
                Ok((meta, hash)) => {
                    info!("Poller paired new document {} -> {rel}", doc.document_id);
                    used.insert(rel.clone());
                    manifest.docs.insert(
                        doc.document_id.clone(),
                        crate::manifest::DocEntry {
                            file: rel,
                            revision_id: meta.revision_id,
                            title: meta.title,
                            file_type: doc.file_type,
                            hash: Some(hash),
                        },
                    );
                }
                Err(e) => warn!("Poller failed to download {}: {e}", doc.document_id),
            }
        }
        self.guard.end_engine_writes();

        manifest
            .store(&self.root_dir)
            .map_err(|e| SyncError::io(self.root_dir.display().to_string(), e))?;
        self.subscribe_missing().await;
        Ok(())
    }

    /// Subscribe every manifested document that has not been subscribed in
    /// this process yet.
    async fn subscribe_missing(&self) {
        let manifest = Manifest::load(&self.root_dir);
        for (document_id, entry) in &manifest.docs {
            let already = self.subscribed.lock().unwrap().contains(document_id);
            if already {
                continue;
            }
            match self.api.subscribe_document(document_id, entry.file_type).await {
                Ok(()) => {
                    self.subscribed.lock().unwrap().insert(document_id.clone());
                }
                Err(e) => warn!("Failed to subscribe {document_id}: {e}"),
            }
        }
    }
}

fn now_wall_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryApi;
    use crate::codec::markdown_to_blocks;
    use tempfile::TempDir;

    const SPACE: &str = "space1";

    struct Fixture {
        api: Arc<InMemoryApi>,
        dir: TempDir,
        guard: Arc<EchoGuard>,
        handle: ProcessorHandle,
        worker: JoinHandle<()>,
        subscribed: Arc<StdMutex<HashSet<String>>>,
    }

    impl Fixture {
        fn start() -> Self {
            let api = Arc::new(InMemoryApi::new());
            let dir = TempDir::new().unwrap();
            let guard = Arc::new(EchoGuard::new());
            let subscribed = Arc::new(StdMutex::new(HashSet::new()));
            let (processor, handle) = ChangeProcessor::new(
                api.clone(),
                SPACE,
                dir.path().to_path_buf(),
                guard.clone(),
                subscribed.clone(),
                ReconcileOptions::default(),
            );
            let worker = tokio::spawn(processor.run());
            Self {
                api,
                dir,
                guard,
                handle,
                worker,
                subscribed,
            }
        }

        fn seed(&self, title: &str, body: &str) -> String {
            let draft = markdown_to_blocks(body);
            self.api.seed_document(
                SPACE,
                title,
                draft.blocks.iter().map(|d| d.block.clone()).collect(),
            )
        }

        async fn settle(self) {
            self.handle.shutdown();
            self.worker.await.unwrap();
        }
    }

    async fn drain() {
        // Let timers fire and the actor catch up; the paused clock
        // auto-advances whenever every task is idle.
        tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 4)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_refresh() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "v1\n");
        fixture.handle.request_full_sync("test setup");
        drain().await;

        let draft = markdown_to_blocks("v2\n");
        fixture
            .api
            .edit_document(&doc_id, draft.blocks.iter().map(|d| d.block.clone()).collect());

        let calls_before = fixture.api.meta_call_count();
        for _ in 0..5 {
            fixture
                .handle
                .remote_event("drive.file.edit_v1", doc_id.clone(), None);
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        drain().await;

        // One refresh: one meta fetch, and the manifest carries the new
        // revision.
        assert_eq!(fixture.api.meta_call_count(), calls_before + 1);
        let manifest = Manifest::load(fixture.dir.path());
        assert_eq!(
            manifest.docs.get(&doc_id).unwrap().revision_id,
            fixture.api.revision(&doc_id)
        );
        let content = std::fs::read_to_string(fixture.dir.path().join("Doc.md")).unwrap();
        assert!(content.contains("v2"));
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_after_run_is_dropped() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "v1\n");
        fixture.handle.request_full_sync("test setup");
        drain().await;

        fixture
            .handle
            .remote_event("drive.file.edit_v1", doc_id.clone(), None);
        drain().await;
        let calls_after_first = fixture.api.meta_call_count();

        // The identical event inside the dedupe window does not run again.
        fixture
            .handle
            .remote_event("drive.file.edit_v1", doc_id.clone(), None);
        drain().await;
        assert_eq!(fixture.api.meta_call_count(), calls_after_first);
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_change_uploads() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "original\n");
        // Pair directly so the fixture guard carries no completion stamp.
        reconcile(&*fixture.api, SPACE, fixture.dir.path(), &Default::default())
            .await
            .unwrap();

        let revision_before = fixture.api.revision(&doc_id).unwrap();
        std::fs::write(fixture.dir.path().join("Doc.md"), "# Doc\n\nedited\n").unwrap();
        fixture
            .handle
            .local_change("Doc.md".into(), LocalChangeKind::Modified);
        drain().await;

        assert!(fixture.api.revision(&doc_id).unwrap() > revision_before);
        let manifest = Manifest::load(fixture.dir.path());
        assert_eq!(
            manifest.docs.get(&doc_id).unwrap().hash.as_deref(),
            Some(ContentHash::of("# Doc\n\nedited\n").as_str())
        );
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_change_suppressed_while_engine_writes() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "original\n");
        reconcile(&*fixture.api, SPACE, fixture.dir.path(), &Default::default())
            .await
            .unwrap();

        let revision_before = fixture.api.revision(&doc_id).unwrap();
        std::fs::write(fixture.dir.path().join("Doc.md"), "# Doc\n\nedited\n").unwrap();

        fixture.guard.begin_engine_writes();
        fixture
            .handle
            .local_change("Doc.md".into(), LocalChangeKind::Modified);
        drain().await;
        fixture.guard.end_engine_writes();

        assert_eq!(fixture.api.revision(&doc_id).unwrap(), revision_before);
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_window_suppresses_fresh_write() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "original\n");
        reconcile(&*fixture.api, SPACE, fixture.dir.path(), &Default::default())
            .await
            .unwrap();

        let revision_before = fixture.api.revision(&doc_id).unwrap();

        // An engine write just completed; the file's mtime falls inside
        // the ignore window.
        std::fs::write(fixture.dir.path().join("Doc.md"), "# Doc\n\nengine write\n").unwrap();
        fixture.guard.begin_engine_writes();
        fixture.guard.end_engine_writes();
        fixture
            .handle
            .local_change("Doc.md".into(), LocalChangeKind::Modified);
        drain().await;

        assert_eq!(fixture.api.revision(&doc_id).unwrap(), revision_before);
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpaired_local_change_falls_back_to_full_sync() {
        let fixture = Fixture::start();
        std::fs::write(fixture.dir.path().join("new.md"), "# New\n\nbody\n").unwrap();

        fixture
            .handle
            .local_change("new.md".into(), LocalChangeKind::Modified);
        drain().await;

        // The full sync created a remote document for the unpaired file.
        let manifest = Manifest::load(fixture.dir.path());
        assert_eq!(manifest.docs.len(), 1);
        assert_eq!(fixture.api.document_ids().len(), 1);
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_falls_back_to_full_sync() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "body\n");
        fixture.handle.request_full_sync("test setup");
        drain().await;

        fixture.api.trash_document(&doc_id);
        fixture
            .handle
            .remote_event("drive.file.edit_v1", doc_id.clone(), None);
        drain().await;

        // The fallback reconciliation removed the stale pairing and file.
        assert!(Manifest::load(fixture.dir.path()).docs.is_empty());
        assert!(!fixture.dir.path().join("Doc.md").exists());
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trashed_event_runs_full_sync() {
        let fixture = Fixture::start();
        let doc_id = fixture.seed("Doc", "body\n");
        fixture.handle.request_full_sync("test setup");
        drain().await;

        fixture.api.trash_document(&doc_id);
        fixture
            .handle
            .remote_event("drive.file.trashed_v1", doc_id.clone(), None);
        drain().await;

        assert!(Manifest::load(fixture.dir.path()).docs.is_empty());
        assert!(!fixture.dir.path().join("Doc.md").exists());
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_pairs_and_subscribes_new_documents() {
        let fixture = Fixture::start();
        fixture.handle.request_full_sync("test setup");
        drain().await;

        let doc_id = fixture.seed("Late Arrival", "body\n");
        assert!(fixture.handle.try_poll_wiki());
        drain().await;

        assert!(fixture.dir.path().join("Late Arrival.md").exists());
        let manifest = Manifest::load(fixture.dir.path());
        assert!(manifest.docs.contains_key(&doc_id));
        assert!(fixture.subscribed.lock().unwrap().contains(&doc_id));
        assert!(fixture.api.subscribed_documents().contains(&doc_id));
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skips_while_in_flight() {
        let fixture = Fixture::start();
        assert!(fixture.handle.try_poll_wiki());
        // The first request is still queued; the second is refused.
        assert!(!fixture.handle.try_poll_wiki());
        drain().await;
        // Once drained, polling is available again.
        assert!(fixture.handle.try_poll_wiki());
        fixture.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_event_type_ignored() {
        let fixture = Fixture::start();
        let calls = fixture.api.meta_call_count();
        fixture
            .handle
            .remote_event("drive.file.renamed_v99", "doc-1".into(), None);
        drain().await;
        assert_eq!(fixture.api.meta_call_count(), calls);
        fixture.settle().await;
    }
}
