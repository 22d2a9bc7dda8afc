//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::WatchError;

/// Error code providers use to signal throttling.
pub const RATE_LIMIT_CODE: i64 = -32007;

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A single JSON-RPC parameter value.
pub type RpcParam = Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<RpcParam>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Returns `true` if the provider is throttling us.
    pub fn is_rate_limit(&self) -> bool {
        self.code == RATE_LIMIT_CODE
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Provider-assigned subscription identifier.
///
/// Nodes answer `eth_subscribe` with a hex string, some test doubles with a
/// bare integer; both are normalised to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(pub String);

impl<'de> Deserialize<'de> for SubscriptionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u64),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Str(s) => Self(s),
            Repr::Num(n) => Self(n.to_string()),
        })
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<RpcId>,
    #[serde(default)]
    params: Option<NotificationParams>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: SubscriptionId,
    #[serde(default)]
    result: Option<Value>,
}

/// One inbound frame, classified by envelope shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `eth_subscription` push carrying a log.
    Notification {
        subscription: SubscriptionId,
        result: Value,
    },
    /// Reply to one of our requests.
    Response { id: RpcId, result: Value },
    /// Error object, either a reply or an unsolicited provider error.
    Error {
        id: Option<RpcId>,
        error: JsonRpcError,
    },
}

impl Inbound {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> Result<Self, WatchError> {
        let env: Envelope = serde_json::from_str(text)?;

        if let Some(error) = env.error {
            return Ok(Self::Error { id: env.id, error });
        }
        if let Some(params) = env.params {
            return match params.result {
                Some(result) if !result.is_null() => Ok(Self::Notification {
                    subscription: params.subscription,
                    result,
                }),
                _ => Err(WatchError::Malformed(
                    "subscription notification without result".into(),
                )),
            };
        }
        match (env.id, env.result) {
            (Some(id), Some(result)) => Ok(Self::Response { id, result }),
            _ => Err(WatchError::Malformed(
                "envelope is neither a notification, a response nor an error".into(),
            )),
        }
    }
}
