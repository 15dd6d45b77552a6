//! JSON-RPC 2.0 message types and codec.
//!
//! Every frame exchanged with a peer decodes into exactly one [`Message`]
//! variant. Decoding is strict: a frame that is ambiguous (e.g. carries both
//! `result` and `error`) or incomplete is rejected as a whole with
//! [`Error::Parse`].
//!
//! # Format
//!
//! | Variant | Shape |
//! |---------|-------|
//! | `Request` | `{"jsonrpc":"2.0","id":1,"method":"m","params":{}}` |
//! | `Notification` | `{"jsonrpc":"2.0","method":"m","params":{}}` |
//! | `Response` | `{"jsonrpc":"2.0","id":1,"result":{}}` |
//! | `Error` | `{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"..."}}` |
//!
//! Batches are not supported.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Value of the `jsonrpc` member on every frame.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// RequestId
// ============================================================================

/// Request identifier: a JSON string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    /// Generates a fresh random string id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self::String(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

// ============================================================================
// ErrorCode
// ============================================================================

/// Standard JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON or message shape (-32700).
    ParseError,
    /// Not a valid request object (-32600).
    InvalidRequest,
    /// Method does not exist (-32601).
    MethodNotFound,
    /// Invalid method parameters (-32602).
    InvalidParams,
    /// Internal JSON-RPC error (-32603).
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric wire code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    /// Returns the canonical message for this code.
    #[inline]
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

// ============================================================================
// ErrorObject
// ============================================================================

/// The `error` member of an Error frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,

    /// Short description.
    pub message: String,

    /// Optional structured detail.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates an error object with the canonical message for `code`.
    #[inline]
    #[must_use]
    pub fn new(code: ErrorCode, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data,
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// A call that expects exactly one reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Correlation id, unique per originating connection.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Structured parameters (object or array).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a new request with specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A one-way message; never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Method name.
    pub method: String,

    /// Structured parameters (object or array).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a new notification.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result payload.
    pub result: Value,
}

impl Response {
    /// Creates a new response.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, result: Value) -> Self {
        Self { id, result }
    }

    /// Deserializes the result into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the result does not match `T`.
    pub fn parse_result<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.result.clone())?)
    }

    /// Gets a string value from the result.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.result
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// ErrorResponse
// ============================================================================

/// A failed reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Matches the request `id`; `null` when the request could not be read.
    pub id: Option<RequestId>,

    /// Error detail.
    pub error: ErrorObject,
}

impl ErrorResponse {
    /// Creates a new error response.
    #[inline]
    #[must_use]
    pub fn new(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self { id, error }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Any JSON-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a reply.
    Request(Request),
    /// Successful reply.
    Response(Response),
    /// Failed reply.
    Error(ErrorResponse),
    /// One-way message.
    Notification(Notification),
}

impl Message {
    /// Returns the frame's id, if it carries a non-null one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Error(e) => e.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Returns the method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Returns `true` for responses and error responses.
    #[inline]
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Response(_) | Self::Error(_))
    }

    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the payload is not valid JSON or does not
    /// match exactly one JSON-RPC message shape.
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text).map_err(|e| Error::parse(e.to_string()))?;
        raw.into_message()
    }

    /// Encodes this message as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a payload value cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        let json = match self {
            Self::Request(body) => serde_json::to_string(&Envelope::new(body)),
            Self::Response(body) => serde_json::to_string(&Envelope::new(body)),
            Self::Error(body) => serde_json::to_string(&Envelope::new(body)),
            Self::Notification(body) => serde_json::to_string(&Envelope::new(body)),
        }?;
        Ok(json)
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<ErrorResponse> for Message {
    fn from(value: ErrorResponse) -> Self {
        Self::Error(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

// ============================================================================
// Wire Helpers
// ============================================================================

/// Adds the `jsonrpc` member around a message body.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    fn new(body: &'a T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            body,
        }
    }
}

/// Untyped view of a frame, used to classify it.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    error: Option<Value>,
}

impl RawMessage {
    fn into_message(self) -> Result<Message> {
        match self.jsonrpc.as_deref() {
            Some(JSONRPC_VERSION) => {}
            Some(other) => return Err(Error::parse(format!("unsupported jsonrpc version: {other}"))),
            None => return Err(Error::parse("missing jsonrpc version")),
        }

        match (self.method, self.result, self.error) {
            (Some(method), None, None) => {
                let params = check_params(self.params)?;
                match self.id {
                    None => Ok(Message::Notification(Notification { method, params })),
                    Some(id) => Ok(Message::Request(Request {
                        id: parse_id(id)?,
                        method,
                        params,
                    })),
                }
            }
            (None, Some(result), None) => {
                let id = self.id.ok_or_else(|| Error::parse("response missing id"))?;
                Ok(Message::Response(Response {
                    id: parse_id(id)?,
                    result,
                }))
            }
            (None, None, Some(error)) => {
                let id = match self.id {
                    Some(Value::Null) => None,
                    Some(id) => Some(parse_id(id)?),
                    None => return Err(Error::parse("error response missing id")),
                };
                let error: ErrorObject =
                    serde_json::from_value(error).map_err(|e| Error::parse(format!("invalid error object: {e}")))?;
                Ok(Message::Error(ErrorResponse { id, error }))
            }
            (None, None, None) => Err(Error::parse("frame has no method, result or error")),
            _ => Err(Error::parse("frame mixes method, result and error members")),
        }
    }
}

/// Deserializes a member so that an explicit `null` is kept as `Some(Null)`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn parse_id(value: Value) -> Result<RequestId> {
    if value.is_null() {
        return Err(Error::parse("id must not be null"));
    }
    serde_json::from_value(value).map_err(|_| Error::parse("id must be a string or integer"))
}

fn check_params(params: Option<Value>) -> Result<Option<Value>> {
    match params {
        None => Ok(None),
        Some(p @ (Value::Object(_) | Value::Array(_))) => Ok(Some(p)),
        Some(_) => Err(Error::parse("params must be an object or array")),
    }
}

// ============================================================================
// Tests
// ============================================================================
