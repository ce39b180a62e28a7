use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::constants::{method, JSON_RPC_VERSION, PING_KEYWORD, PONG_KEYWORD, CHANNEL_ID_KEYS};
use crate::error::DecodeError;
use crate::models::{Channel, ChannelKind, Envelope, Event, EventKind};

/// Size of the big-endian length prefix used by binary-mode frames.
const LENGTH_PREFIX_LEN: usize = 4;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Outgoing JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

impl<'a, P: Serialize> RpcRequest<'a, P> {
    fn new(method: &'a str, params: Option<P>, id: Option<i64>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION,
            method,
            params,
            id,
        }
    }
}

/// Outgoing JSON-RPC result (our reply to a server ping)
#[derive(Debug, Serialize)]
struct RpcResult<'a> {
    jsonrpc: &'static str,
    result: &'a str,
    id: i64,
}

#[derive(Debug, Serialize)]
struct SubscribeParams<'a> {
    channels: ChannelLists<'a>,
}

#[derive(Debug, Serialize)]
struct ChannelLists<'a> {
    private: Vec<&'a str>,
    shared: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct AckParams<'a> {
    mid: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusParams {
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct PublishParams<'a> {
    #[serde(rename = "channelList")]
    channel_list: &'a [String],
    body: PublishBody<'a>,
}

#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    module_id: &'a str,
    command: &'a str,
    params: &'a Map<String, Value>,
}

/// A message published to other subscribers of the given channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub channels: Vec<String>,
    pub module_id: String,
    pub command: String,
    pub params: Map<String, Value>,
}

impl Publication {
    pub fn new(
        channels: Vec<String>,
        module_id: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            channels,
            module_id: module_id.into(),
            command: command.into(),
            params: Map::new(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Typing indicator for chat `chat_id`.
    pub fn typing(chat_id: i64, typing: bool) -> Self {
        let mut params = Map::new();
        params.insert("chat_id".to_string(), Value::from(chat_id));
        params.insert("typing".to_string(), Value::from(typing));
        Self::new(vec![chat_id.to_string()], "im", "typing").with_params(params)
    }
}

/// Control messages announced by the server through the `pull` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    /// Our channel id was replaced; refresh session data and reconnect.
    ChannelReplaced,
    /// Configuration expired; refresh session data and reconnect.
    ConfigExpired,
    /// Server is restarting; reconnect later.
    ServerRestarted,
    /// Server software was updated to a new web revision.
    RevisionChanged(i64),
}

/// Translates between wire frames and typed envelopes/events.
///
/// Stateless; every method is an associated function.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolCodec;

impl ProtocolCodec {
    /// `{"jsonrpc":"2.0","method":"subscribe","params":{"channels":{"private":[..],"shared":[..]}}}`
    pub fn encode_subscribe(channels: &[Channel]) -> String {
        let ids_of = |kind: ChannelKind| {
            channels
                .iter()
                .filter(|c| c.kind == kind)
                .map(|c| c.id.as_str())
                .collect::<Vec<_>>()
        };
        let params = SubscribeParams {
            channels: ChannelLists {
                private: ids_of(ChannelKind::Private),
                shared: ids_of(ChannelKind::Shared),
            },
        };
        to_json(&RpcRequest::new(method::SUBSCRIBE, Some(params), None))
    }

    /// `{"jsonrpc":"2.0","method":"ping","id":rpc_id}`
    pub fn encode_ping(rpc_id: i64) -> String {
        to_json(&RpcRequest::<()>::new(method::PING, None, Some(rpc_id)))
    }

    /// Reply to a JSON-RPC ping carrying `rpc_id`.
    pub fn encode_pong(rpc_id: i64) -> String {
        to_json(&RpcResult {
            jsonrpc: JSON_RPC_VERSION,
            result: PONG_KEYWORD,
            id: rpc_id,
        })
    }

    /// Acknowledge delivery of message `mid`.
    pub fn encode_ack(mid: &str, rpc_id: i64) -> String {
        to_json(&RpcRequest::new(
            method::ACK,
            Some(AckParams { mid }),
            Some(rpc_id),
        ))
    }

    /// `{"jsonrpc":"2.0","method":"publish","params":{"channelList":[..],"body":{..}},"id":rpc_id}`
    pub fn encode_publish(publication: &Publication, rpc_id: i64) -> String {
        let params = PublishParams {
            channel_list: &publication.channels,
            body: PublishBody {
                module_id: &publication.module_id,
                command: &publication.command,
                params: &publication.params,
            },
        };
        to_json(&RpcRequest::new(method::PUBLISH, Some(params), Some(rpc_id)))
    }

    pub fn encode_user_status_subscription(user_id: i64, subscribe: bool, rpc_id: i64) -> String {
        let method = if subscribe {
            method::SUBSCRIBE_STATUS
        } else {
            method::UNSUBSCRIBE_STATUS
        };
        to_json(&RpcRequest::new(
            method,
            Some(UserStatusParams { user_id }),
            Some(rpc_id),
        ))
    }

    /// Decode a single frame.
    ///
    /// Accepts plain UTF-8 JSON, a 4-byte big-endian length prefix followed by
    /// JSON, and the bare `ping`/`pong` keywords.
    pub fn decode(frame: &[u8]) -> Result<Envelope, DecodeError> {
        match Self::decode_value(frame)? {
            Value::Array(_) => Err(DecodeError::NotAnEnvelope("batch".to_string())),
            value => envelope_from_value(value),
        }
    }

    /// Decode a frame that may hold a JSON-RPC batch.
    ///
    /// Invalid batch elements are logged and skipped.
    pub fn decode_batch(frame: &[u8]) -> Result<Vec<Envelope>, DecodeError> {
        match Self::decode_value(frame)? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match envelope_from_value(item) {
                    Ok(env) => Some(env),
                    Err(e) => {
                        warn!("Skipping invalid batch element: {}", e);
                        None
                    }
                })
                .collect()),
            value => envelope_from_value(value).map(|env| vec![env]),
        }
    }

    fn decode_value(frame: &[u8]) -> Result<Value, DecodeError> {
        let payload = unwrap_payload(frame)?;
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }
        if text == PING_KEYWORD || text == PONG_KEYWORD {
            return Ok(serde_json::json!({ "method": text }));
        }
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))
    }

    /// Map an envelope to the public event type.
    ///
    /// Unknown methods become `ConfigUpdate` events carrying the raw envelope.
    pub fn to_event(envelope: &Envelope) -> Event {
        let channel_id = extract_channel_id(envelope);
        let params = envelope.params.clone();

        let (kind, payload) = match envelope.method.as_str() {
            method::PUSH => (EventKind::Message, params),
            method::MESSAGE => {
                let kind = match envelope.module_id().as_deref() {
                    Some("online") => EventKind::UserStatus,
                    Some("pull") => EventKind::ConfigUpdate,
                    _ => EventKind::Message,
                };
                (kind, params)
            }
            method::STATE => (EventKind::UserStatus, params),
            method::CONFIG => (EventKind::ConfigUpdate, params),
            method::PING => (EventKind::Ping, params),
            method::PONG => (EventKind::Pong, params),
            "" if envelope.is_response() => (EventKind::Pong, response_payload(envelope)),
            other => {
                let mut payload = Map::new();
                payload.insert("method".to_string(), Value::from(other));
                payload.insert("raw".to_string(), envelope.to_value());
                (EventKind::ConfigUpdate, payload)
            }
        };

        Event::new(kind, channel_id, payload)
    }

    /// Recognize `pull` module control commands.
    pub fn server_command(envelope: &Envelope) -> Option<ServerCommand> {
        if envelope.method != method::MESSAGE || envelope.module_id().as_deref() != Some("pull") {
            return None;
        }
        match envelope.command()? {
            "channel_expire" | "channel_replaced" => Some(ServerCommand::ChannelReplaced),
            "config_expire" | "config_expired" => Some(ServerCommand::ConfigExpired),
            "server_restart" | "server_restarted" => Some(ServerCommand::ServerRestarted),
            "revision_changed" => envelope
                .body()?
                .get("params")?
                .get("revision")
                .and_then(|rev| match rev {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                })
                .map(ServerCommand::RevisionChanged),
            _ => None,
        }
    }
}

/// Strip a leading byte-order mark and the optional binary length prefix.
fn unwrap_payload(frame: &[u8]) -> Result<&[u8], DecodeError> {
    let frame = frame.strip_prefix(UTF8_BOM).unwrap_or(frame);
    let first = frame
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or(DecodeError::Empty)?;

    // Length prefixes start with a zero byte for any frame under 16 MiB;
    // everything else is text.
    if first != 0 {
        return Ok(frame);
    }

    if frame.len() < LENGTH_PREFIX_LEN {
        return Err(DecodeError::Truncated {
            expected: LENGTH_PREFIX_LEN,
            actual: frame.len(),
        });
    }

    let (prefix, body) = frame.split_at(LENGTH_PREFIX_LEN);
    let declared = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if declared > body.len() {
        return Err(DecodeError::Truncated {
            expected: declared,
            actual: body.len(),
        });
    }
    Ok(&body[..declared])
}

fn envelope_from_value(value: Value) -> Result<Envelope, DecodeError> {
    match value {
        Value::Object(_) => {
            serde_json::from_value(value).map_err(|e| DecodeError::NotAnEnvelope(e.to_string()))
        }
        other => Err(DecodeError::NotAnEnvelope(other.to_string())),
    }
}

fn response_payload(envelope: &Envelope) -> Map<String, Value> {
    let mut payload = Map::new();
    if let Some(id) = envelope.rpc_id {
        payload.insert("id".to_string(), Value::from(id));
    }
    if let Some(result) = &envelope.result {
        payload.insert("result".to_string(), result.clone());
    }
    if let Some(error) = &envelope.error {
        payload.insert("error".to_string(), error.clone());
    }
    payload
}

/// Look up the chat id in `params`, then in `params.body.params`.
fn extract_channel_id(envelope: &Envelope) -> Option<String> {
    let nested = envelope
        .body()
        .and_then(|body| body.get("params"))
        .and_then(Value::as_object);

    std::iter::once(&envelope.params)
        .chain(nested)
        .find_map(|params| {
            CHANNEL_ID_KEYS
                .iter()
                .find_map(|key| params.get(*key).and_then(id_string))
        })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_json<T: Serialize>(message: &T) -> String {
    // Only strings, integers and JSON values are serialized here, which cannot fail.
    serde_json::to_string(message).unwrap_or_default()
}
