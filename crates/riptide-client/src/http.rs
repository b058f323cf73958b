//! Built-in HTTP long-poll transport.
//!
//! [`HttpTransport`] implements [`Transport`] against the service's
//! HTTP surface: a held-open GET for the subscribe poll and short GETs
//! for the presence one-shots. Channel names are percent-encoded into
//! the path; lists are comma-joined with a `,` placeholder when only
//! channel groups are subscribed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::cursor::SubscribeCursor;
use crate::error::TransportError;
use crate::event::{MessageKind, RawEvent, PRESENCE_SUFFIX};
use crate::transport::{
    GetStateRequest, HeartbeatRequest, LeaveRequest, SetStateRequest, SubscribeEnvelope,
    SubscribeRequest, Transport,
};

/// Percent-encoding set for path segments: everything but unreserved
/// characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Subscribe envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "t")]
    cursor: WireCursor,
    #[serde(rename = "m", default)]
    messages: Vec<WireMessage>,
}

/// Stream cursor as it appears on the wire (timetoken is a decimal
/// string).
#[derive(Debug, Deserialize)]
struct WireCursor {
    #[serde(rename = "t")]
    timetoken: String,
    #[serde(rename = "r", default)]
    region: u32,
}

impl WireCursor {
    fn parse(&self) -> Result<SubscribeCursor, TransportError> {
        let timetoken = self.timetoken.parse::<u64>().map_err(|_| {
            TransportError::Malformed(format!("invalid timetoken '{}'", self.timetoken))
        })?;
        Ok(SubscribeCursor {
            timetoken,
            region: self.region,
        })
    }
}

/// One envelope entry as it appears on the wire.
#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "c")]
    channel: String,
    #[serde(rename = "b", default)]
    subscription: Option<String>,
    #[serde(rename = "d", default)]
    payload: Value,
    #[serde(rename = "e", default)]
    kind: u32,
    #[serde(rename = "i", default)]
    publisher: Option<String>,
    #[serde(rename = "p", default)]
    publish_cursor: Option<WireCursor>,
}

/// Response envelope of the presence one-shots.
#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    #[allow(dead_code)]
    status: u16,
    #[serde(default)]
    payload: Option<Value>,
}

fn parse_subscribe_body(body: &str) -> Result<SubscribeEnvelope, TransportError> {
    let wire: WireEnvelope =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;

    let cursor = wire.cursor.parse()?;
    let mut events = Vec::with_capacity(wire.messages.len());
    for msg in wire.messages {
        let timetoken = match &msg.publish_cursor {
            Some(pc) => pc.parse()?.timetoken,
            None => cursor.timetoken,
        };
        let kind = if msg.channel.ends_with(PRESENCE_SUFFIX) {
            MessageKind::Presence
        } else {
            MessageKind::from_wire(msg.kind)
        };
        events.push(RawEvent {
            channel: msg.channel,
            subscription: msg.subscription,
            timetoken,
            publisher: msg.publisher,
            kind,
            payload: msg.payload,
        });
    }
    Ok(SubscribeEnvelope { events, cursor })
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// HTTP implementation of [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    subscribe_key: String,
    user_id: String,
    subscribe_timeout: Duration,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] when the HTTP client cannot
    /// be constructed (TLS backend initialization).
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let scheme = if config.secure { "https" } else { "http" };
        Ok(Self {
            client,
            base: format!("{scheme}://{}", config.origin),
            subscribe_key: config.subscribe_key.clone(),
            user_id: config.user_id.clone(),
            subscribe_timeout: config.subscribe_timeout,
            request_timeout: config.request_timeout,
        })
    }

    /// Joins channel names for the URL path, percent-encoding each.
    /// An empty list yields the `,` placeholder (groups-only polls).
    fn join_channels(channels: &[String]) -> String {
        if channels.is_empty() {
            return ",".to_string();
        }
        channels
            .iter()
            .map(|c| utf8_percent_encode(c, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn subscribe_params(&self, req: &SubscribeRequest) -> Result<Vec<(String, String)>, TransportError> {
        let mut params = vec![("uuid".to_string(), self.user_id.clone())];
        if !req.cursor.is_start() {
            params.push(("tt".to_string(), req.cursor.timetoken.to_string()));
            params.push(("tr".to_string(), req.cursor.region.to_string()));
        }
        if !req.groups.is_empty() {
            params.push(("channel-group".to_string(), req.groups.join(",")));
        }
        if !req.state.is_empty() {
            let state = serde_json::to_string(&req.state)
                .map_err(|e| TransportError::Malformed(e.to_string()))?;
            params.push(("state".to_string(), state));
        }
        if let Some(hb) = req.heartbeat {
            params.push(("heartbeat".to_string(), hb.to_string()));
        }
        if let Some(filter) = &req.filter {
            params.push(("filter-expr".to_string(), filter.clone()));
        }
        Ok(params)
    }

    async fn get_envelope(
        &self,
        url: String,
        params: Vec<(String, String)>,
    ) -> Result<StatusEnvelope, TransportError> {
        let response = self
            .client
            .get(&url)
            .query(&params)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        response
            .json::<StatusEnvelope>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(TransportError::Forbidden(body)),
        400 => Err(TransportError::BadRequest(body)),
        s if s >= 500 => Err(TransportError::Server {
            status: s,
            message: body,
        }),
        s => Err(TransportError::BadRequest(format!(
            "unexpected status {s}: {body}"
        ))),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn subscribe(
        &self,
        req: SubscribeRequest,
        cancel: CancellationToken,
    ) -> Result<SubscribeEnvelope, TransportError> {
        let url = format!(
            "{}/v2/subscribe/{}/{}/0",
            self.base,
            self.subscribe_key,
            Self::join_channels(&req.channels)
        );
        let params = self.subscribe_params(&req)?;
        debug!(url = %url, "long-poll");

        let request = self
            .client
            .get(&url)
            .query(&params)
            .timeout(self.subscribe_timeout)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(TransportError::Canceled),
            res = request => res.map_err(map_reqwest_error)?,
        };
        let response = check_status(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        parse_subscribe_body(&body)
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), TransportError> {
        let url = format!(
            "{}/v2/presence/sub-key/{}/channel/{}/heartbeat",
            self.base,
            self.subscribe_key,
            Self::join_channels(&req.channels)
        );
        let mut params = vec![
            ("uuid".to_string(), self.user_id.clone()),
            ("heartbeat".to_string(), req.presence_timeout.to_string()),
        ];
        if !req.groups.is_empty() {
            params.push(("channel-group".to_string(), req.groups.join(",")));
        }
        if !req.state.is_empty() {
            let state = serde_json::to_string(&req.state)
                .map_err(|e| TransportError::Malformed(e.to_string()))?;
            params.push(("state".to_string(), state));
        }
        self.get_envelope(url, params).await.map(|_| ())
    }

    async fn set_state(&self, req: SetStateRequest) -> Result<Value, TransportError> {
        let url = format!(
            "{}/v2/presence/sub-key/{}/channel/{}/uuid/{}/data",
            self.base,
            self.subscribe_key,
            utf8_percent_encode(&req.channel, PATH_SEGMENT),
            utf8_percent_encode(&self.user_id, PATH_SEGMENT),
        );
        let state = serde_json::to_string(&req.state)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let params = vec![("state".to_string(), state)];

        let envelope = self.get_envelope(url, params).await?;
        envelope
            .payload
            .ok_or_else(|| TransportError::Malformed("set-state response without payload".into()))
    }

    async fn get_state(
        &self,
        req: GetStateRequest,
    ) -> Result<BTreeMap<String, Value>, TransportError> {
        let url = format!(
            "{}/v2/presence/sub-key/{}/channel/{}/uuid/{}",
            self.base,
            self.subscribe_key,
            Self::join_channels(&req.channels),
            utf8_percent_encode(&self.user_id, PATH_SEGMENT),
        );
        let envelope = self.get_envelope(url, Vec::new()).await?;
        let payload = envelope
            .payload
            .ok_or_else(|| TransportError::Malformed("get-state response without payload".into()))?;
        let channels = payload
            .get("channels")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                TransportError::Malformed("get-state response without channels map".into())
            })?;
        Ok(channels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn leave(&self, req: LeaveRequest) -> Result<(), TransportError> {
        let url = format!(
            "{}/v2/presence/sub-key/{}/channel/{}/leave",
            self.base,
            self.subscribe_key,
            Self::join_channels(&req.channels)
        );
        let mut params = vec![("uuid".to_string(), self.user_id.clone())];
        if !req.groups.is_empty() {
            params.push(("channel-group".to_string(), req.groups.join(",")));
        }
        self.get_envelope(url, params).await.map(|_| ())
    }
}
