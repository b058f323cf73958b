//! # Riptide Client
//!
//! Client-side subscription and presence engine for the Riptide
//! realtime messaging service.
//!
//! A [`SubscriptionManager`] turns a mutable set of channels and
//! channel groups into a sequence of long-poll requests, tracks the
//! stream cursor across polls, classifies incoming events and fans
//! them out to registered listeners, and recovers from transport
//! failures with capped, jittered backoff. An independent heartbeat
//! task announces presence while presence-enabled channels are
//! subscribed.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use riptide_client::{
//!     ClientConfig, EventListener, HttpTransport, MessageEvent, Subscription,
//!     SubscriptionManager,
//! };
//!
//! struct Printer;
//!
//! impl EventListener for Printer {
//!     fn on_message(&self, event: &MessageEvent) {
//!         println!("{}: {}", event.channel, event.payload);
//!     }
//! }
//!
//! # async fn run() -> Result<(), riptide_client::TransportError> {
//! let config = ClientConfig::new("sub-key");
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let manager = SubscriptionManager::new(config, transport);
//!
//! manager.add_listener(Arc::new(Printer));
//! manager.subscribe(Subscription::channels(["lobby"]).with_presence());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Client configuration: keys, identity, timeouts, presence, reconnect.
pub mod config;

/// Subscribe stream cursor.
pub mod cursor;

/// Transport and client error types.
pub mod error;

/// Event model and payload decoding.
pub mod event;

/// Listener trait and registration handles.
pub mod listener;

/// The caller-facing subscription manager.
pub mod manager;

/// Client-side counters.
pub mod metrics;

/// Reconnection backoff policy.
pub mod reconnect;

/// Subscription state snapshots.
pub mod state;

/// Transport abstraction and request types.
pub mod transport;

/// Built-in HTTP long-poll transport.
#[cfg(feature = "http-transport")]
pub mod http;

mod dispatcher;
mod engine;
mod heartbeat;

pub use config::{ClientConfig, PresenceConfig, ReconnectConfig};
pub use cursor::SubscribeCursor;
pub use error::{ClientError, FailureClass, TransportError};
pub use event::{
    ActionEvent, ConnectionStatus, DecodeError, ErrorEvent, EventCodec, JsonCodec, MessageEvent,
    MessageKind, ObjectEvent, PresenceAction, PresenceEvent, RawEvent, StreamEvent,
    PRESENCE_SUFFIX,
};
#[cfg(feature = "http-transport")]
pub use http::HttpTransport;
pub use listener::{EventListener, ListenerId};
pub use manager::{Subscription, SubscriptionManager};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use reconnect::ReconnectPolicy;
pub use state::StateSnapshot;
pub use transport::{
    GetStateRequest, HeartbeatRequest, LeaveRequest, SetStateRequest, SubscribeEnvelope,
    SubscribeRequest, Transport,
};
