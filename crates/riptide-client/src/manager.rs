//! Caller-facing subscription manager.
//!
//! One [`SubscriptionManager`] owns one logical subscription session:
//! the shared subscription state, the stream cursor, the listener
//! registry, the subscribe loop task, and the heartbeat task. Control
//! calls mutate state and return immediately; the loop adopts changes
//! no later than its next iteration (canceling the in-flight poll when
//! the poll target actually changed). `set_state`/`get_state` are the
//! awaited one-shots and propagate their errors to the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::cursor::SubscribeCursor;
use crate::dispatcher::Dispatcher;
use crate::engine::{self, EngineContext};
use crate::error::ClientError;
use crate::event::{EventCodec, JsonCodec};
use crate::heartbeat::{self, HeartbeatContext};
use crate::listener::{EventListener, ListenerId, ListenerRegistry};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::state::{SharedState, StateSnapshot};
use crate::transport::{GetStateRequest, LeaveRequest, SetStateRequest, Transport};

/// A subscription change to apply.
///
/// Build with [`Subscription::channels`] and chain the optional parts:
///
/// ```no_run
/// use riptide_client::Subscription;
/// use serde_json::json;
///
/// let sub = Subscription::channels(["lobby", "alerts"])
///     .with_presence()
///     .state_for("lobby", json!({"mood": "curious"}));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    /// Channels to add to the subscription set.
    pub channels: Vec<String>,
    /// Channel groups to add to the subscription set.
    pub groups: Vec<String>,
    /// Whether to receive presence events for the added channels.
    pub with_presence: bool,
    /// Presence state staged per channel at subscribe time.
    pub state: BTreeMap<String, Value>,
}

impl Subscription {
    /// Starts a subscription for the given channels.
    #[must_use]
    pub fn channels<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Starts a subscription for the given channel groups.
    #[must_use]
    pub fn groups<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds channel groups to this subscription.
    #[must_use]
    pub fn and_groups<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(names.into_iter().map(Into::into));
        self
    }

    /// Enables presence events for the subscribed channels.
    #[must_use]
    pub fn with_presence(mut self) -> Self {
        self.with_presence = true;
        self
    }

    /// Stages presence state for one channel.
    #[must_use]
    pub fn state_for(mut self, channel: impl Into<String>, state: Value) -> Self {
        self.state.insert(channel.into(), state);
        self
    }
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    state: Arc<SharedState>,
    cursor: Arc<Mutex<SubscribeCursor>>,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<ClientMetrics>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// Subscription and presence manager for one session.
///
/// Must be created from within a Tokio runtime: construction spawns the
/// subscribe loop and (when configured) the heartbeat scheduler.
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Creates a manager with the default JSON codec.
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_codec(config, transport, Arc::new(JsonCodec))
    }

    /// Creates a manager with a custom event codec.
    #[must_use]
    pub fn with_codec(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn EventCodec>,
    ) -> Self {
        let state = Arc::new(SharedState::new());
        let cursor = Arc::new(Mutex::new(SubscribeCursor::start()));
        let listeners = Arc::new(ListenerRegistry::new());
        let metrics = Arc::new(ClientMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            codec,
            Arc::clone(&listeners),
            Arc::clone(&metrics),
        ));
        let cancel = CancellationToken::new();

        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(engine::run(EngineContext {
            config: config.clone(),
            transport: Arc::clone(&transport),
            state: Arc::clone(&state),
            cursor: Arc::clone(&cursor),
            dispatcher: Arc::clone(&dispatcher),
            metrics: Arc::clone(&metrics),
            cancel: cancel.clone(),
        })));

        if let Some(interval) = config.presence.interval {
            tasks.push(tokio::spawn(heartbeat::run(HeartbeatContext {
                transport: Arc::clone(&transport),
                state: Arc::clone(&state),
                dispatcher,
                metrics: Arc::clone(&metrics),
                cancel: cancel.clone(),
                interval,
                presence_timeout: config.presence.timeout,
            })));
        }

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state,
                cursor,
                listeners,
                metrics,
                cancel,
                tasks: Mutex::new(tasks),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a listener; every listener receives every event.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    /// Removes a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Adds channels and groups to the subscription set.
    ///
    /// Takes effect no later than the loop's next iteration; when the
    /// poll target actually changed, the in-flight poll is abandoned so
    /// the new set is adopted immediately.
    pub fn subscribe(&self, subscription: Subscription) {
        if self.check_stopped() {
            return;
        }
        self.inner.state.subscribe(
            &subscription.channels,
            &subscription.groups,
            subscription.with_presence,
            &subscription.state,
        );
    }

    /// Removes channels and groups from the subscription set and
    /// announces the departure (best-effort).
    pub fn unsubscribe<I, J, S, T>(&self, channels: I, groups: J)
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        if self.check_stopped() {
            return;
        }
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        let groups: Vec<String> = groups.into_iter().map(Into::into).collect();
        let (removed_channels, removed_groups) = self.inner.state.unsubscribe(&channels, &groups);
        self.spawn_leave(removed_channels, removed_groups);
    }

    /// Clears the whole subscription set.
    ///
    /// The loop goes idle (no outstanding requests), the cursor resets
    /// to "start from now", and departure is announced for everything
    /// that was subscribed.
    pub fn unsubscribe_all(&self) {
        if self.check_stopped() {
            return;
        }
        let (channels, groups) = self.inner.state.clear();
        *self.inner.cursor.lock() = SubscribeCursor::start();
        self.spawn_leave(channels, groups);
    }

    /// Writes presence state for one channel and awaits the
    /// server-confirmed value.
    ///
    /// The confirmed state also replaces the staged entry for the
    /// channel, so subsequent heartbeats and polls carry it ambiently.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Stopped`] after [`stop`](Self::stop), or
    /// the transport failure otherwise.
    pub async fn set_state(&self, channel: &str, state: Value) -> Result<Value, ClientError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ClientError::Stopped);
        }
        let confirmed = self
            .inner
            .transport
            .set_state(SetStateRequest {
                channel: channel.to_string(),
                state,
            })
            .await?;
        self.inner
            .state
            .set_staged_state(channel, confirmed.clone());
        debug!(channel, "presence state confirmed");
        Ok(confirmed)
    }

    /// Reads presence state for the given channels.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Stopped`] after [`stop`](Self::stop), or
    /// the transport failure otherwise.
    pub async fn get_state<I, S>(&self, channels: I) -> Result<BTreeMap<String, Value>, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ClientError::Stopped);
        }
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        let states = self
            .inner
            .transport
            .get_state(GetStateRequest { channels })
            .await?;
        Ok(states)
    }

    /// Returns the current subscription snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.inner.state.snapshot()
    }

    /// Returns the current stream cursor, for optional persistence
    /// across process restarts.
    #[must_use]
    pub fn cursor(&self) -> SubscribeCursor {
        *self.inner.cursor.lock()
    }

    /// Resumes the stream from a previously persisted cursor.
    ///
    /// Only honored while the cursor is still at "start from now";
    /// once the loop has advanced past a live position, a restore
    /// would roll the stream back and is ignored.
    pub fn resume_from(&self, cursor: SubscribeCursor) {
        let mut current = self.inner.cursor.lock();
        if current.is_start() {
            *current = cursor;
        }
    }

    /// Returns a point-in-time copy of the client counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// The configuration this manager was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Stops the manager. Terminal: cancels the in-flight poll and any
    /// backoff wait, stops the heartbeat scheduler, and tears down the
    /// listener queues so no further callback fires.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("stopping subscription manager");
        self.inner.cancel.cancel();
        self.inner.listeners.shutdown();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    fn check_stopped(&self) -> bool {
        let stopped = self.inner.stopped.load(Ordering::SeqCst);
        if stopped {
            warn!("control call ignored: manager is stopped");
        }
        stopped
    }

    fn spawn_leave(&self, channels: Vec<String>, groups: Vec<String>) {
        if channels.is_empty() && groups.is_empty() {
            return;
        }
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            if let Err(err) = transport.leave(LeaveRequest { channels, groups }).await {
                warn!(error = %err, "presence leave failed");
            }
        });
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("stopped", &self.inner.stopped.load(Ordering::Relaxed))
            .field("snapshot", &self.inner.state.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_builder() {
        let sub = Subscription::channels(["a", "b"])
            .and_groups(["g"])
            .with_presence()
            .state_for("a", json!({"k": 1}));

        assert_eq!(sub.channels, vec!["a", "b"]);
        assert_eq!(sub.groups, vec!["g"]);
        assert!(sub.with_presence);
        assert_eq!(sub.state.get("a"), Some(&json!({"k": 1})));
    }

    #[test]
    fn test_groups_only_subscription() {
        let sub = Subscription::groups(["g1", "g2"]);
        assert!(sub.channels.is_empty());
        assert_eq!(sub.groups, vec!["g1", "g2"]);
        assert!(!sub.with_presence);
    }
}
