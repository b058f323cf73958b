//! Presence heartbeat scheduling.
//!
//! Runs on its own timer, decoupled from the poll cadence: a heartbeat
//! is due even while a long-poll is outstanding. The task reads the
//! same state snapshots as the loop but never touches the cursor. It
//! only announces while at least one presence-enabled channel is
//! subscribed; failures are reported and logged but never stop the
//! subscribe loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::event::ErrorEvent;
use crate::metrics::ClientMetrics;
use crate::state::SharedState;
use crate::transport::{HeartbeatRequest, Transport};

/// Everything the heartbeat task needs, bundled for the spawn.
pub(crate) struct HeartbeatContext {
    pub transport: Arc<dyn Transport>,
    pub state: Arc<SharedState>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<ClientMetrics>,
    pub cancel: CancellationToken,
    pub interval: Duration,
    pub presence_timeout: Duration,
}

/// Runs the heartbeat scheduler until the manager is stopped.
pub(crate) async fn run(ctx: HeartbeatContext) {
    let HeartbeatContext {
        transport,
        state,
        dispatcher,
        metrics,
        cancel,
        interval,
        presence_timeout,
    } = ctx;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of `interval` completes immediately; the first
    // announce belongs one full interval after start.
    ticker.tick().await;

    info!(interval_ms = interval.as_millis() as u64, "heartbeat scheduler started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snap = state.snapshot();
        if snap.presence_channels().is_empty() {
            continue;
        }

        let req = HeartbeatRequest {
            channels: snap.channels().iter().cloned().collect(),
            groups: snap.groups().iter().cloned().collect(),
            state: snap.active_state(),
            presence_timeout: presence_timeout.as_secs(),
        };

        match transport.heartbeat(req).await {
            Ok(()) => {
                metrics.record_heartbeat();
                debug!(channels = snap.channels().len(), "presence heartbeat sent");
            }
            Err(err) => {
                metrics.record_heartbeat_failure();
                warn!(error = %err, "presence heartbeat failed");
                dispatcher.dispatch_error(ErrorEvent {
                    channel: None,
                    message: format!("heartbeat failed: {err}"),
                });
            }
        }
    }

    info!("heartbeat scheduler stopped");
}
