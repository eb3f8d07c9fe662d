//! Periodic pruning of persisted log records.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use embebot_telemetry::TelemetryGuard;

/// Drop records older than `max_age`. Returns rows removed, or `None` when
/// there is no sink or the delete failed.
pub fn prune_once(telemetry: &TelemetryGuard, max_age: Duration) -> Option<usize> {
    let sink = telemetry.logs()?;
    match sink.prune_older_than(max_age) {
        Ok(0) => {
            debug!("no expired log records");
            Some(0)
        }
        Ok(removed) => {
            let kept = sink.count().unwrap_or_default();
            info!(removed, kept, "pruned expired log records");
            Some(removed)
        }
        Err(e) => {
            warn!(error = %e, "log pruning failed");
            None
        }
    }
}

/// Prune once per `period`, starting immediately. Exits at once when there
/// is no sink to prune.
pub fn start_log_retention(
    telemetry: TelemetryGuard,
    max_age: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if telemetry.logs().is_none() {
            return;
        }
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    prune_once(&telemetry, max_age);
                }
            }
        }
    })
}
