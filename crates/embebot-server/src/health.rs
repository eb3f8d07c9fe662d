//! Periodic liveness check that reconnects a dropped gateway.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use embebot_gateway::{GatewayError, GatewayHandle};

/// Ask for status and connect when the gateway is down. Returns whether a
/// connect was requested.
pub async fn check_once(gateway: &GatewayHandle) -> Result<bool, GatewayError> {
    let status = gateway.status().await?;
    if status.connected {
        return Ok(false);
    }
    info!(phase = ?status.phase, "gateway not connected, reconnecting");
    gateway.connect().await?;
    Ok(true)
}

pub fn start_health_check(
    gateway: GatewayHandle,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match check_once(&gateway).await {
                        Ok(_) => {}
                        Err(GatewayError::ActorGone) => {
                            warn!("gateway actor gone, stopping health check");
                            break;
                        }
                        Err(e) => warn!(error = %e, "health check failed"),
                    }
                }
            }
        }
    })
}
