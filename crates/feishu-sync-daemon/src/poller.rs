//! Periodic wiki poller.
//!
//! Catches documents created in the space that never produced a usable
//! event. Each tick requests a poll from the change processor; the request
//! is refused while a previous run is still in flight.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use feishu_sync_core::ProcessorHandle;

/// Spawn the poll loop. The first poll fires one full interval after
/// startup; the orchestrator's initial reconciliation covers time zero.
pub fn spawn(handle: ProcessorHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            if handle.try_poll_wiki() {
                debug!("Requested wiki poll");
            } else {
                debug!("Skipping wiki poll; previous run still in flight");
            }
        }
    })
}
