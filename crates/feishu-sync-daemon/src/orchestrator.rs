//! Daemon orchestration.
//!
//! Startup order: token → optional initial reconciliation → subscribe
//! manifested documents → poller → local watcher → event stream. The
//! orchestrator owns the echo guard and the subscription set; every
//! post-startup manifest write happens on the change processor actor.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use feishu_sync_core::{
    reconcile, ChangeProcessor, DocsApi, EchoGuard, FeishuClient, Manifest, ReconcileOptions,
};

use crate::config::Config;
use crate::events::EventStream;
use crate::poller;
use crate::watcher::FileWatcher;

/// Run the daemon until SIGTERM/ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let token = config.read_token()?;
    let root_dir = config.root_dir();
    std::fs::create_dir_all(&root_dir)
        .with_context(|| format!("creating sync root {}", root_dir.display()))?;

    let api: Arc<dyn DocsApi> = Arc::new(FeishuClient::new(token));
    let guard = Arc::new(EchoGuard::new());
    let subscribed = Arc::new(Mutex::new(HashSet::new()));
    let options = ReconcileOptions::default();

    if config.sync.initial_sync {
        guard.begin_engine_writes();
        let result = reconcile(api.as_ref(), &config.wiki_space_id, &root_dir, &options).await;
        guard.end_engine_writes();
        let report = result.context("initial reconciliation")?;
        info!("Initial reconciliation: {report}");
    }

    // Subscribe everything we already track; later pairings subscribe as
    // they appear.
    let manifest = Manifest::load(&root_dir);
    for (document_id, entry) in &manifest.docs {
        match api.subscribe_document(document_id, entry.file_type).await {
            Ok(()) => {
                subscribed.lock().unwrap().insert(document_id.clone());
            }
            Err(e) => warn!("Failed to subscribe {document_id}: {e}"),
        }
    }
    info!("Subscribed {} documents", subscribed.lock().unwrap().len());

    let (processor, handle) = ChangeProcessor::new(
        api.clone(),
        config.wiki_space_id.clone(),
        root_dir.clone(),
        guard,
        subscribed,
        options,
    );
    let processor_task = tokio::spawn(processor.run());

    let poller_task = config
        .sync
        .poll_interval_seconds
        .as_duration()
        .map(|interval| {
            info!("Poller enabled every {interval:?}");
            poller::spawn(handle.clone(), interval)
        });

    let mut watcher = FileWatcher::new(root_dir.clone())?;
    info!("Watching {}", root_dir.display());
    let watcher_handle = handle.clone();
    let watcher_task = tokio::spawn(async move {
        while let Some(event) = watcher.recv().await {
            watcher_handle.local_change(event.rel_path, event.kind);
        }
    });

    let ws_task = match (&config.auth.client_id, &config.auth.client_secret) {
        (Some(client_id), Some(client_secret)) => {
            let stream = EventStream::new(client_id, client_secret, handle.clone());
            Some(tokio::spawn(stream.run()))
        }
        _ => {
            warn!("No app credentials configured; running without the event stream");
            None
        }
    };

    info!("Daemon running");
    wait_for_shutdown().await?;
    info!("Shutdown signal received");

    // Let the in-flight action finish so the manifest stays consistent.
    handle.shutdown();
    processor_task.await.ok();
    if let Some(task) = poller_task {
        task.abort();
    }
    watcher_task.abort();
    if let Some(task) = ws_task {
        task.abort();
    }

    info!("Daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
