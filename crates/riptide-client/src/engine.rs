//! The subscribe loop.
//!
//! A single task drives the state machine: read the current
//! subscription snapshot, issue one long-poll, dispatch the response,
//! repeat. At most one poll is ever in flight; poll N+1 is not issued
//! until poll N's events are handed to the listener queues. The loop
//! suspends on an empty subscription set, during backoff waits, and
//! while a poll is outstanding; all three waits abort promptly on
//! shutdown or on a qualifying subscription change.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::cursor::SubscribeCursor;
use crate::dispatcher::Dispatcher;
use crate::error::FailureClass;
use crate::event::{ConnectionStatus, ErrorEvent};
use crate::metrics::ClientMetrics;
use crate::reconnect::ReconnectPolicy;
use crate::state::{SharedState, StateSnapshot};
use crate::transport::{SubscribeRequest, Transport};

/// Everything the loop task needs, bundled for the spawn.
pub(crate) struct EngineContext {
    pub config: ClientConfig,
    pub transport: Arc<dyn Transport>,
    pub state: Arc<SharedState>,
    pub cursor: Arc<Mutex<SubscribeCursor>>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<ClientMetrics>,
    pub cancel: CancellationToken,
}

/// Per-session status ledger.
///
/// Tracks what has been emitted so each transition is broadcast exactly
/// once: `Connected` on the first success of a session, `Reconnected`
/// on recovery from an emitted failure status.
#[derive(Debug, Default)]
struct SessionFlags {
    connected: bool,
    degraded: bool,
}

impl SessionFlags {
    fn note_success(&mut self, dispatcher: &Dispatcher) {
        if !self.connected {
            self.connected = true;
            self.degraded = false;
            dispatcher.dispatch_status(ConnectionStatus::Connected);
        } else if self.degraded {
            self.degraded = false;
            dispatcher.dispatch_status(ConnectionStatus::Reconnected);
        }
    }

    fn reset(&mut self) {
        self.connected = false;
        self.degraded = false;
    }
}

fn build_request(config: &ClientConfig, snap: &StateSnapshot, cursor: SubscribeCursor) -> SubscribeRequest {
    let heartbeat = if snap.presence_channels().is_empty() {
        None
    } else {
        Some(config.presence.timeout.as_secs())
    };
    SubscribeRequest {
        channels: snap.poll_channels(),
        groups: snap.groups().iter().cloned().collect(),
        cursor,
        state: snap.active_state(),
        heartbeat,
        filter: config.filter_expression.clone(),
    }
}

/// Runs the subscribe loop until the manager is stopped.
pub(crate) async fn run(ctx: EngineContext) {
    let EngineContext {
        config,
        transport,
        state,
        cursor,
        dispatcher,
        metrics,
        cancel,
    } = ctx;

    let mut epoch: watch::Receiver<u64> = state.watch();
    let mut policy = ReconnectPolicy::new(config.reconnect.clone());
    let mut session = SessionFlags::default();

    info!("subscribe loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Mark the current poll target as seen before reading it, so
        // any later mutation is guaranteed to trip `changed()`.
        epoch.borrow_and_update();
        let snap = state.snapshot();

        if snap.is_empty() {
            if session.connected {
                dispatcher.dispatch_status(ConnectionStatus::Disconnected);
                // Going idle ends the session; the next one starts
                // from "now" even if a late poll result advanced the
                // cursor after the unsubscribe reset it.
                *cursor.lock() = SubscribeCursor::start();
            }
            session.reset();
            policy.reset();
            debug!("subscription set empty, loop idle");
            tokio::select! {
                _ = epoch.changed() => continue,
                () = cancel.cancelled() => break,
            }
        }

        let req = build_request(&config, &snap, *cursor.lock());
        let call_cancel = cancel.child_token();
        metrics.record_poll();
        debug!(
            channels = req.channels.len(),
            groups = req.groups.len(),
            timetoken = req.cursor.timetoken,
            "issuing subscribe poll"
        );

        let poll = transport.subscribe(req, call_cancel.clone());
        tokio::pin!(poll);

        let result = tokio::select! {
            res = &mut poll => res,
            _ = epoch.changed() => {
                call_cancel.cancel();
                debug!("subscription changed, abandoning in-flight poll");
                continue;
            }
            () = cancel.cancelled() => {
                call_cancel.cancel();
                break;
            }
        };

        match result {
            Ok(envelope) => {
                policy.reset();
                cursor.lock().advance(envelope.cursor);
                session.note_success(&dispatcher);
                if !envelope.events.is_empty() {
                    debug!(events = envelope.events.len(), "poll returned events");
                }
                dispatcher.dispatch_batch(envelope.events);
            }
            Err(err) => match err.class() {
                // The long-poll design relies on the server timing out
                // with an empty response: success with zero events.
                FailureClass::Timeout => {
                    policy.reset();
                    session.note_success(&dispatcher);
                }
                FailureClass::Canceled => continue,
                FailureClass::Transient => {
                    metrics.record_poll_failure();
                    warn!(error = %err, "subscribe poll failed");

                    if !policy.enabled() {
                        dispatcher.dispatch_status(ConnectionStatus::Disconnected);
                        session.reset();
                        park(&mut epoch, &cancel).await;
                        continue;
                    }

                    let delay = policy.next_backoff();
                    metrics.record_reconnect_attempt();
                    if !session.degraded {
                        session.degraded = true;
                        dispatcher.dispatch_status(ConnectionStatus::ReconnectionAttempt);
                    }
                    if policy.limit_crossed() {
                        dispatcher.dispatch_status(ConnectionStatus::Disconnected);
                    }
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = epoch.changed() => {}
                        () = cancel.cancelled() => break,
                    }
                }
                FailureClass::Forbidden => {
                    metrics.record_poll_failure();
                    warn!(error = %err, "subscribe poll denied");
                    dispatcher.dispatch_status(ConnectionStatus::AccessDenied);
                    session.reset();
                    policy.reset();
                    park(&mut epoch, &cancel).await;
                }
                FailureClass::Fatal => {
                    metrics.record_poll_failure();
                    error!(error = %err, "subscribe poll rejected, polling parked");
                    dispatcher.dispatch_error(ErrorEvent {
                        channel: None,
                        message: err.to_string(),
                    });
                    session.reset();
                    policy.reset();
                    park(&mut epoch, &cancel).await;
                }
            },
        }
    }

    info!("subscribe loop stopped");
}

/// Suspends polling until the subscription set changes or the manager
/// shuts down. Used after non-retryable failures.
async fn park(epoch: &mut watch::Receiver<u64>, cancel: &CancellationToken) {
    tokio::select! {
        _ = epoch.changed() => {}
        () = cancel.cancelled() => {}
    }
}
