//! Worker liveness watchdog.
//!
//! A single background loop per supervisor: every interval it asks the
//! supervisor to reap the child if it has exited, and if so waits out a
//! cooldown and relaunches. Relaunch failures are logged and retried on
//! the next tick; the loop never gives up on its own, only cancellation
//! stops it. A worker that was deliberately stopped leaves no handle
//! behind, so the loop sees nothing to reap and leaves it alone.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::supervisor::Supervisor;

pub(crate) fn spawn(supervisor: Arc<Supervisor>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(supervisor, cancel))
}

async fn run(supervisor: Arc<Supervisor>, cancel: CancellationToken) {
    let interval = supervisor.timing().watchdog_interval;
    let cooldown = supervisor.timing().restart_cooldown;
    tracing::info!(interval = ?interval, "watchdog started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(status) = supervisor.reap_if_exited().await else {
            continue;
        };
        tracing::warn!(status = %status, "worker exited, scheduling relaunch");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(cooldown) => {}
        }

        match supervisor.launch().await {
            Ok(()) => tracing::info!("worker relaunched"),
            Err(e) => {
                // Transient conditions (port still draining, binary being
                // reinstalled) resolve on their own; keep retrying.
                tracing::error!(error = %e, "relaunch failed, retrying next interval");
            }
        }
    }

    tracing::info!("watchdog stopped");
}
