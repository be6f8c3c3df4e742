//! JSON-RPC 2.0 message model.
//!
//! Decoding is strict: the `jsonrpc` member must be `"2.0"` and the members present
//! must identify exactly one of request, notification or response. A stream that
//! produces anything else is considered corrupted.

use crate::error::{ProtocolError, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier
    Number(i64),
    /// String identifier
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// `result` member (may be `null`)
    Result(Value),
    /// `error` member
    Error(RpcError),
}

/// A validated JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a response.
    Request {
        /// Request identifier.
        id: Id,
        /// Method name.
        method: String,
        /// Structured parameters (object or array).
        params: Option<Value>,
    },
    /// Call without a response.
    Notification {
        /// Method name.
        method: String,
        /// Structured parameters (object or array).
        params: Option<Value>,
    },
    /// Reply to a request. `id` is `None` only for errors answering an
    /// unidentifiable request.
    Response {
        /// Identifier of the request being answered.
        id: Option<Id>,
        /// Result or error.
        outcome: ResponseOutcome,
    },
}

impl Message {
    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// Parameters for requests and notifications.
    pub fn params(&self) -> Option<&Value> {
        match self {
            Self::Request { params, .. } | Self::Notification { params, .. } => params.as_ref(),
            Self::Response { .. } => None,
        }
    }

    /// Decode and validate a message from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Encode the message as compact JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_value())?)
    }

    /// Validate a parsed JSON value as a message.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::invalid("message is not a JSON object"));
        };

        match obj.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(ProtocolError::invalid(format!(
                    "unsupported jsonrpc version {other}"
                )))
            }
            None => return Err(ProtocolError::invalid("missing jsonrpc member")),
        }

        // absent / null / value must stay distinguishable here
        let id = match obj.remove("id") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(v) => Some(Some(
                serde_json::from_value::<Id>(v)
                    .map_err(|_| ProtocolError::invalid("id must be a number or a string"))?,
            )),
        };

        let params = match obj.remove("params") {
            None => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
            Some(_) => return Err(ProtocolError::invalid("params must be an object or array")),
        };

        let result = obj.remove("result");
        let error = obj.remove("error");

        match obj.remove("method") {
            Some(Value::String(method)) => {
                if result.is_some() || error.is_some() {
                    return Err(ProtocolError::invalid(
                        "a call must not carry result or error",
                    ));
                }
                match id {
                    None => Ok(Self::Notification { method, params }),
                    Some(Some(id)) => Ok(Self::Request { id, method, params }),
                    Some(None) => Err(ProtocolError::invalid("request id must not be null")),
                }
            }
            Some(_) => Err(ProtocolError::invalid("method must be a string")),
            None => {
                if params.is_some() {
                    return Err(ProtocolError::invalid("a response must not carry params"));
                }
                let outcome = match (result, error) {
                    (Some(result), None) => ResponseOutcome::Result(result),
                    (None, Some(error)) => ResponseOutcome::Error(
                        serde_json::from_value(error)
                            .map_err(|e| ProtocolError::invalid(format!("bad error object: {e}")))?,
                    ),
                    (Some(_), Some(_)) => {
                        return Err(ProtocolError::invalid(
                            "response carries both result and error",
                        ))
                    }
                    (None, None) => {
                        return Err(ProtocolError::invalid(
                            "message is neither a call nor a response",
                        ))
                    }
                };
                let is_error = matches!(outcome, ResponseOutcome::Error(_));
                match (id, is_error) {
                    (None, _) => Err(ProtocolError::invalid("response without id")),
                    (Some(None), false) => {
                        Err(ProtocolError::invalid("successful response with null id"))
                    }
                    (Some(id), _) => Ok(Self::Response { id, outcome }),
                }
            }
        }
    }

    /// Convert to a JSON value.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request { id, method, params } => {
                obj.insert("id".into(), id_value(id));
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(p) = params {
                    obj.insert("params".into(), p.clone());
                }
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(p) = params {
                    obj.insert("params".into(), p.clone());
                }
            }
            Self::Response { id, outcome } => {
                obj.insert("id".into(), id.as_ref().map(id_value).unwrap_or(Value::Null));
                match outcome {
                    ResponseOutcome::Result(r) => {
                        obj.insert("result".into(), r.clone());
                    }
                    ResponseOutcome::Error(e) => {
                        obj.insert(
                            "error".into(),
                            serde_json::to_value(e).unwrap_or(Value::Null),
                        );
                    }
                }
            }
        }
        Value::Object(obj)
    }
}

fn id_value(id: &Id) -> Value {
    match id {
        Id::Number(n) => Value::from(*n),
        Id::String(s) => Value::from(s.as_str()),
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(de::Error::custom)
    }
}
