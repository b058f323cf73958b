//! Transport abstraction.
//!
//! The subscription engine is transport-agnostic: everything that
//! touches the network is behind [`Transport`]. The crate ships an HTTP
//! long-poll implementation (feature `http-transport`); tests inject
//! scripted mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cursor::SubscribeCursor;
use crate::error::TransportError;
use crate::event::RawEvent;

/// One long-poll request.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    /// Wire channel list (presence companions already derived).
    pub channels: Vec<String>,
    /// Channel-group names.
    pub groups: Vec<String>,
    /// Resume position; a start cursor means "from now".
    pub cursor: SubscribeCursor,
    /// Staged presence state for the subscribed channels.
    pub state: BTreeMap<String, Value>,
    /// Presence timeout (seconds) advertised on the poll, when presence
    /// is in use.
    pub heartbeat: Option<u64>,
    /// Optional server-side filter expression.
    pub filter: Option<String>,
}

/// Result of one successful long-poll.
#[derive(Debug, Clone, Default)]
pub struct SubscribeEnvelope {
    /// Events in server delivery order.
    pub events: Vec<RawEvent>,
    /// Cursor to resume from.
    pub cursor: SubscribeCursor,
}

/// One presence heartbeat announce.
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    /// Subscribed channel names (no presence companions).
    pub channels: Vec<String>,
    /// Subscribed channel-group names.
    pub groups: Vec<String>,
    /// Staged presence state carried with the announce.
    pub state: BTreeMap<String, Value>,
    /// Presence timeout in seconds.
    pub presence_timeout: u64,
}

/// One synchronous presence-state write.
#[derive(Debug, Clone)]
pub struct SetStateRequest {
    /// Channel to set state on.
    pub channel: String,
    /// State payload.
    pub state: Value,
}

/// One presence-state read.
#[derive(Debug, Clone)]
pub struct GetStateRequest {
    /// Channels to read state for.
    pub channels: Vec<String>,
}

/// One presence leave announce, fired on unsubscribe.
#[derive(Debug, Clone)]
pub struct LeaveRequest {
    /// Channels being left.
    pub channels: Vec<String>,
    /// Channel groups being left.
    pub groups: Vec<String>,
}

/// Network operations required by the subscription engine.
///
/// Implementations must be cheap to share (`Arc`) and safe to call from
/// the loop and the heartbeat task concurrently. The long-poll takes a
/// cancellation token so shutdown and subscription changes can abort
/// the wait promptly instead of riding out the poll window.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Executes one long-poll.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] classified by the reconnection
    /// policy; a poll-window timeout must surface as
    /// [`TransportError::Timeout`], a fired token as
    /// [`TransportError::Canceled`].
    async fn subscribe(
        &self,
        req: SubscribeRequest,
        cancel: CancellationToken,
    ) -> Result<SubscribeEnvelope, TransportError>;

    /// Announces presence on the given channels.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`]; failures are reported but never
    /// stop the subscribe loop.
    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), TransportError>;

    /// Writes presence state for one channel, returning the
    /// server-confirmed value.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`], propagated to the awaiting caller.
    async fn set_state(&self, req: SetStateRequest) -> Result<Value, TransportError>;

    /// Reads presence state for the given channels.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`], propagated to the awaiting caller.
    async fn get_state(
        &self,
        req: GetStateRequest,
    ) -> Result<BTreeMap<String, Value>, TransportError>;

    /// Announces departure from the given channels and groups.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`]; leave is best-effort and failures
    /// are only logged.
    async fn leave(&self, req: LeaveRequest) -> Result<(), TransportError>;
}
