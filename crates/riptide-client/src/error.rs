//! Error types for the riptide client.
//!
//! [`TransportError`] is the failure surface of a [`Transport`](crate::transport::Transport)
//! implementation. The subscribe loop never propagates these to the caller;
//! it maps them through [`TransportError::class`] and reacts per the
//! reconnection policy. One-shot calls (`set_state`, `get_state`) wrap them
//! in [`ClientError`] and return them to the awaiting caller directly.

/// Errors produced by transport implementations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request timed out at the network layer.
    ///
    /// For the long-poll this is the expected steady-state outcome when no
    /// events arrive within the poll window and is treated as a successful
    /// poll with zero events.
    #[error("request timed out")]
    Timeout,

    /// The call was canceled through its cancellation token.
    #[error("request canceled")]
    Canceled,

    /// Connectivity-level failure (DNS, connect, reset, broken pipe).
    #[error("network error: {0}")]
    Network(String),

    /// The service rejected the request for access-policy reasons (HTTP 403).
    #[error("access denied: {0}")]
    Forbidden(String),

    /// The service considered the request malformed (HTTP 400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The response body could not be parsed as a valid envelope.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The service reported a server-side failure (HTTP 5xx).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code returned by the service.
        status: u16,
        /// Response body or status text.
        message: String,
    },
}

/// Coarse classification of a transport failure, consumed by the
/// reconnection policy in the subscribe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Expected long-poll timeout: success with zero events, no backoff.
    Timeout,
    /// Caller-initiated cancellation: not retried, no status emitted.
    Canceled,
    /// Connectivity or server-side failure: retried with backoff.
    Transient,
    /// Policy rejection: surfaced as `AccessDenied`, no automatic retry.
    Forbidden,
    /// Protocol mismatch: surfaced to listeners, polling parks.
    Fatal,
}

impl TransportError {
    /// Classifies this failure for the reconnection policy.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout => FailureClass::Timeout,
            Self::Canceled => FailureClass::Canceled,
            Self::Network(_) | Self::Server { .. } => FailureClass::Transient,
            Self::Forbidden(_) => FailureClass::Forbidden,
            Self::BadRequest(_) | Self::Malformed(_) => FailureClass::Fatal,
        }
    }
}

/// Errors returned from the caller-facing control surface.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A one-shot transport call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An event payload could not be decoded.
    #[error("decode error on channel '{channel}': {message}")]
    Decode {
        /// Channel the undecodable event arrived on.
        channel: String,
        /// Parser failure detail.
        message: String,
    },

    /// The manager has been stopped; no further calls are accepted.
    #[error("subscription manager is stopped")]
    Stopped,
}
