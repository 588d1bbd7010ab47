use std::time::Duration;

use reveille_core::events::{Event, EventKind};
use tokio::sync::mpsc;

use crate::config::CliConfig;
use crate::error::CliError;
use crate::runtime::Runtime;

const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Hub answered with `SyncComplete` before the timeout
    pub confirmed: bool,
    pub alarms: usize,
    pub queued: usize,
    pub last_full_sync: Option<i64>,
}

/// Connect, let the orchestrator run its connect-time full sync, and wait
/// up to `timeout` for the hub to confirm it.
pub async fn sync_once(runtime: &Runtime, timeout: Duration) -> Result<SyncReport, CliError> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let router = runtime.connection.router();
    let listener = router.add_event_listener(EventKind::SyncComplete, move |event| {
        if let Event::SyncComplete(sync) = event {
            let _ = done_tx.send(sync.device_id.clone());
        }
        Ok(())
    });

    runtime.sync.start();
    runtime.connect().await;
    if !runtime.connection.is_connected() {
        router.remove_event_listener(listener);
        return Err(CliError::HubUnavailable);
    }

    let confirmed = tokio::time::timeout(timeout, async {
        let reply = done_rx.recv().await;
        while runtime.sync.is_syncing() {
            tokio::time::sleep(SYNC_POLL_INTERVAL).await;
        }
        reply.is_some()
    })
    .await
    .unwrap_or(false);
    router.remove_event_listener(listener);

    let snapshot = runtime.sync.snapshot().await;
    Ok(SyncReport {
        confirmed,
        alarms: snapshot.sync_status.len(),
        queued: runtime.queue.len().await,
        last_full_sync: snapshot.multi_device_state.last_full_sync,
    })
}

pub async fn run_sync(config: &CliConfig, timeout_secs: u64) -> Result<(), CliError> {
    let runtime = Runtime::build(config).await?;
    let result = sync_once(&runtime, Duration::from_secs(timeout_secs)).await;
    runtime.shutdown().await?;
    let report = result?;

    if report.confirmed {
        println!(
            "Sync completed: {} alarm(s) tracked, {} operation(s) still queued",
            report.alarms, report.queued
        );
    } else {
        println!(
            "Sync requested, but the hub did not confirm within {timeout_secs}s; {} operation(s) still queued",
            report.queued
        );
    }
    Ok(())
}
