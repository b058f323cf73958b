//! Event model and payload decoding.
//!
//! A [`RawEvent`] is one element of a subscribe envelope as produced by
//! the transport. The dispatcher runs each raw event through an
//! [`EventCodec`] to obtain the typed [`StreamEvent`] delivered to
//! listeners. Presence traffic arrives on companion channels named
//! `<channel>-pnpres`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the companion channel carrying presence events.
pub const PRESENCE_SUFFIX: &str = "-pnpres";

// ---------------------------------------------------------------------------
// Raw events
// ---------------------------------------------------------------------------

/// Wire-level discriminant of a subscribe-envelope entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A published message.
    Message,
    /// A lightweight signal (small payload, no history).
    Signal,
    /// A presence event (join/leave/timeout/state-change).
    Presence,
    /// An object (metadata) update notification.
    Object,
    /// A message-action notification.
    Action,
}

impl MessageKind {
    /// Maps the numeric wire code to a kind. Unknown codes decode as
    /// [`MessageKind::Message`] so new server-side types degrade to
    /// plain message delivery instead of being dropped.
    #[must_use]
    pub fn from_wire(code: u32) -> Self {
        match code {
            1 => Self::Signal,
            2 => Self::Object,
            3 => Self::Action,
            _ => Self::Message,
        }
    }
}

/// One undecoded entry of a subscribe envelope.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Channel the event arrived on (presence companion suffix included).
    pub channel: String,
    /// Subscription match when the event arrived via a channel group or
    /// wildcard (the name the caller subscribed with).
    pub subscription: Option<String>,
    /// Position of this event in the stream.
    pub timetoken: u64,
    /// Identity of the publishing client, when reported.
    pub publisher: Option<String>,
    /// Wire-level event kind.
    pub kind: MessageKind,
    /// Undecoded payload.
    pub payload: Value,
}

impl RawEvent {
    /// Whether this event is presence traffic, either by kind or by the
    /// companion-channel naming convention.
    #[must_use]
    pub fn is_presence(&self) -> bool {
        self.kind == MessageKind::Presence || self.channel.ends_with(PRESENCE_SUFFIX)
    }
}

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

/// A decoded message or signal.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Channel the message was published on.
    pub channel: String,
    /// Subscription match (group or wildcard name), if any.
    pub subscription: Option<String>,
    /// Identity of the publisher, when reported.
    pub publisher: Option<String>,
    /// Position of this message in the stream.
    pub timetoken: u64,
    /// Message payload.
    pub payload: Value,
}

/// Kind of presence transition reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    /// A client joined the channel.
    Join,
    /// A client left the channel.
    Leave,
    /// A client's presence timed out.
    Timeout,
    /// A client changed its presence state.
    StateChange,
    /// Periodic occupancy rollup.
    Interval,
}

impl fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Timeout => "timeout",
            Self::StateChange => "state-change",
            Self::Interval => "interval",
        };
        f.write_str(s)
    }
}

/// A decoded presence event.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    /// Channel the presence event concerns (companion suffix stripped).
    pub channel: String,
    /// Presence transition kind.
    pub action: PresenceAction,
    /// Identity of the client the transition concerns.
    pub uuid: Option<String>,
    /// Channel occupancy after the transition, when reported.
    pub occupancy: Option<u64>,
    /// Presence state attached to the transition (state-change, join).
    pub state: Option<Value>,
    /// Server-side timestamp of the transition (seconds).
    pub timestamp: u64,
    /// Position of this event in the stream.
    pub timetoken: u64,
}

/// A decoded object (metadata) update notification.
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    /// Channel the update was announced on.
    pub channel: String,
    /// Update payload as delivered by the service.
    pub payload: Value,
    /// Position of this event in the stream.
    pub timetoken: u64,
}

/// A decoded message-action notification.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    /// Channel the action was announced on.
    pub channel: String,
    /// Action payload as delivered by the service.
    pub payload: Value,
    /// Position of this event in the stream.
    pub timetoken: u64,
}

/// A non-fatal failure surfaced to listeners (decode failures,
/// heartbeat failures).
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Channel the failure concerns, when channel-scoped.
    pub channel: Option<String>,
    /// Human-readable failure detail.
    pub message: String,
}

/// A decoded event ready for listener delivery.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A published message.
    Message(MessageEvent),
    /// A lightweight signal.
    Signal(MessageEvent),
    /// A presence transition.
    Presence(PresenceEvent),
    /// An object update notification.
    Object(ObjectEvent),
    /// A message-action notification.
    Action(ActionEvent),
}

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Connection-health transitions broadcast to listeners.
///
/// Statuses are emitted once per transition: `Connected` only after at
/// least one successful poll, `Reconnected` only after a prior
/// `ReconnectionAttempt` or `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// First successful poll of a subscription session.
    Connected,
    /// The loop gave up fast recovery (retry budget exceeded, retries
    /// continue at the capped interval) or went idle from a connected
    /// session.
    Disconnected,
    /// A transient failure occurred and the loop is retrying.
    ReconnectionAttempt,
    /// A poll succeeded again after a failure status.
    Reconnected,
    /// The service denied access; polling stops until a new subscribe.
    AccessDenied,
    /// Unclassified transition.
    Unknown,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Failure to decode a raw event's payload.
#[derive(Debug, Clone, thiserror::Error)]
#[error("decode error on channel '{channel}': {message}")]
pub struct DecodeError {
    /// Channel the undecodable event arrived on.
    pub channel: String,
    /// Parser failure detail.
    pub message: String,
}

/// Decodes raw envelope entries into typed events.
///
/// Injected into the dispatcher; the default [`JsonCodec`] understands
/// the service's JSON conventions. A custom codec can layer payload
/// decryption or schema validation on top.
pub trait EventCodec: Send + Sync + 'static {
    /// Decodes one raw event.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload does not match the shape
    /// implied by the event's classification. The dispatcher surfaces
    /// the error and continues with the rest of the batch.
    fn decode(&self, raw: &RawEvent) -> Result<StreamEvent, DecodeError>;
}

/// Wire shape of a presence event payload.
#[derive(Debug, Deserialize)]
struct PresenceWire {
    action: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    occupancy: Option<u64>,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    data: Option<Value>,
}

/// Default codec for the service's JSON event conventions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn decode_presence(raw: &RawEvent) -> Result<StreamEvent, DecodeError> {
        let wire: PresenceWire =
            serde_json::from_value(raw.payload.clone()).map_err(|e| DecodeError {
                channel: raw.channel.clone(),
                message: format!("invalid presence payload: {e}"),
            })?;

        let action = match wire.action.as_str() {
            "join" => PresenceAction::Join,
            "leave" => PresenceAction::Leave,
            "timeout" => PresenceAction::Timeout,
            "state-change" => PresenceAction::StateChange,
            "interval" => PresenceAction::Interval,
            other => {
                return Err(DecodeError {
                    channel: raw.channel.clone(),
                    message: format!("unknown presence action '{other}'"),
                })
            }
        };

        let channel = raw
            .channel
            .strip_suffix(PRESENCE_SUFFIX)
            .unwrap_or(&raw.channel)
            .to_string();

        Ok(StreamEvent::Presence(PresenceEvent {
            channel,
            action,
            uuid: wire.uuid,
            occupancy: wire.occupancy,
            state: wire.data,
            timestamp: wire.timestamp,
            timetoken: raw.timetoken,
        }))
    }

    fn message_event(raw: &RawEvent) -> MessageEvent {
        MessageEvent {
            channel: raw.channel.clone(),
            subscription: raw.subscription.clone(),
            publisher: raw.publisher.clone(),
            timetoken: raw.timetoken,
            payload: raw.payload.clone(),
        }
    }
}

impl EventCodec for JsonCodec {
    fn decode(&self, raw: &RawEvent) -> Result<StreamEvent, DecodeError> {
        if raw.is_presence() {
            return Self::decode_presence(raw);
        }
        match raw.kind {
            MessageKind::Message => Ok(StreamEvent::Message(Self::message_event(raw))),
            MessageKind::Signal => Ok(StreamEvent::Signal(Self::message_event(raw))),
            MessageKind::Object => Ok(StreamEvent::Object(ObjectEvent {
                channel: raw.channel.clone(),
                payload: raw.payload.clone(),
                timetoken: raw.timetoken,
            })),
            MessageKind::Action => Ok(StreamEvent::Action(ActionEvent {
                channel: raw.channel.clone(),
                payload: raw.payload.clone(),
                timetoken: raw.timetoken,
            })),
            // is_presence() handled above; a Presence kind on a plain
            // channel still decodes as presence.
            MessageKind::Presence => Self::decode_presence(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(channel: &str, kind: MessageKind, payload: Value) -> RawEvent {
        RawEvent {
            channel: channel.into(),
            subscription: None,
            timetoken: 42,
            publisher: Some("client-1".into()),
            kind,
            payload,
        }
    }

    #[test]
    fn test_wire_kind_mapping() {
        assert_eq!(MessageKind::from_wire(0), MessageKind::Message);
        assert_eq!(MessageKind::from_wire(1), MessageKind::Signal);
        assert_eq!(MessageKind::from_wire(2), MessageKind::Object);
        assert_eq!(MessageKind::from_wire(3), MessageKind::Action);
        // Unknown codes degrade to plain messages.
        assert_eq!(MessageKind::from_wire(9), MessageKind::Message);
    }

    #[test]
    fn test_decode_message() {
        let ev = JsonCodec
            .decode(&raw("ch", MessageKind::Message, json!({"text": "hi"})))
            .unwrap();
        match ev {
            StreamEvent::Message(m) => {
                assert_eq!(m.channel, "ch");
                assert_eq!(m.timetoken, 42);
                assert_eq!(m.payload, json!({"text": "hi"}));
                assert_eq!(m.publisher.as_deref(), Some("client-1"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_presence_by_channel_suffix() {
        let payload = json!({
            "action": "join",
            "uuid": "client-2",
            "occupancy": 3,
            "timestamp": 1_700_000_000u64,
        });
        let ev = JsonCodec
            .decode(&raw("room-pnpres", MessageKind::Message, payload))
            .unwrap();
        match ev {
            StreamEvent::Presence(p) => {
                assert_eq!(p.channel, "room");
                assert_eq!(p.action, PresenceAction::Join);
                assert_eq!(p.uuid.as_deref(), Some("client-2"));
                assert_eq!(p.occupancy, Some(3));
                assert!(p.state.is_none());
            }
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_state_change_carries_state() {
        let payload = json!({
            "action": "state-change",
            "uuid": "client-2",
            "data": {"mood": "happy"},
            "timestamp": 1_700_000_000u64,
        });
        let ev = JsonCodec
            .decode(&raw("room-pnpres", MessageKind::Presence, payload))
            .unwrap();
        match ev {
            StreamEvent::Presence(p) => {
                assert_eq!(p.action, PresenceAction::StateChange);
                assert_eq!(p.state, Some(json!({"mood": "happy"})));
            }
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_presence_garbage_fails() {
        let err = JsonCodec
            .decode(&raw("room-pnpres", MessageKind::Presence, json!("nope")))
            .unwrap_err();
        assert_eq!(err.channel, "room-pnpres");

        let err = JsonCodec
            .decode(&raw(
                "room-pnpres",
                MessageKind::Presence,
                json!({"action": "levitate"}),
            ))
            .unwrap_err();
        assert!(err.message.contains("levitate"));
    }

    #[test]
    fn test_decode_signal_and_object() {
        let ev = JsonCodec
            .decode(&raw("ch", MessageKind::Signal, json!("ping")))
            .unwrap();
        assert!(matches!(ev, StreamEvent::Signal(_)));

        let ev = JsonCodec
            .decode(&raw("ch", MessageKind::Object, json!({"event": "set"})))
            .unwrap();
        assert!(matches!(ev, StreamEvent::Object(_)));

        let ev = JsonCodec
            .decode(&raw("ch", MessageKind::Action, json!({"type": "reaction"})))
            .unwrap();
        assert!(matches!(ev, StreamEvent::Action(_)));
    }
}
