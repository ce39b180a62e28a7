use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Decoded JSON-RPC structure carried by a single inbound frame.
///
/// Responses (`{"result": ..., "id": ...}`) have no method and decode with an
/// empty `method`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "deserialize_method")]
    pub method: String,
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: Map<String, Value>,
    #[serde(
        rename = "id",
        default,
        deserialize_with = "deserialize_rpc_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub rpc_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_rpc_id(mut self, id: i64) -> Self {
        self.rpc_id = Some(id);
        self
    }

    /// True for id-keyed replies to a request we sent.
    pub fn is_response(&self) -> bool {
        self.method.is_empty() && self.rpc_id.is_some()
    }

    /// Server-assigned message id used for acks and de-duplication.
    pub fn message_id(&self) -> Option<String> {
        match self.params.get("mid")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// `params.body` of a `message` envelope.
    pub fn body(&self) -> Option<&Map<String, Value>> {
        self.params.get("body").and_then(Value::as_object)
    }

    pub fn module_id(&self) -> Option<String> {
        self.body()?
            .get("module_id")
            .and_then(Value::as_str)
            .map(|m| m.to_lowercase())
    }

    pub fn command(&self) -> Option<&str> {
        self.body()?.get("command").and_then(Value::as_str)
    }

    /// Re-serialize as a JSON object (used for forward-compatible passthrough).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn deserialize_method<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts an object, null or any other value; non-object params are wrapped
/// under `"value"` so nothing the server sends is lost.
fn deserialize_params<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

fn deserialize_rpc_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}
