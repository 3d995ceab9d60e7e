//! Message envelope encoding/decoding for the control and event channels.
//!
//! Every textual message on the wire is one `Envelope`. Requests and
//! responses are correlated by `id`; events carry a `method` naming the
//! event type. Unknown JSON fields are ignored on read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Event,
    StreamStart,
    StreamData,
    StreamEnd,
    Cancel,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Request
    }
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::StreamStart => "stream_start",
            MessageType::StreamData => "stream_data",
            MessageType::StreamEnd => "stream_end",
            MessageType::Cancel => "cancel",
        }
    }
}

/// Optional request metadata: advisory timeout, retry counter, priority,
/// trace id. All fields optional; omitted when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Advisory timeout in milliseconds. The dispatcher does not enforce
    /// it; polling handlers derive their deadline from it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none()
            && self.retry.is_none()
            && self.priority.is_none()
            && self.trace_id.is_none()
    }
}

/// The universal wire message.
///
/// Exactly one of `result` / `error` is set on a response. A response
/// echoes the `id` of its request verbatim; `method` on a response is
/// advisory only. Decoding is lenient: a missing `type` reads as a
/// request and a missing `timestamp` is stamped on arrival; encoding
/// always emits both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default = "now_ms")]
    pub timestamp: i64,
}

/// Millisecond epoch timestamp
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Envelope {
    /// Create a request with a fresh UUID id
    pub fn request(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type: MessageType::Request,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
            metadata: None,
            timestamp: now_ms(),
        }
    }

    /// Create a successful response for a request
    pub fn response(request: &Envelope, result: Value) -> Self {
        Envelope {
            id: request.id.clone(),
            msg_type: MessageType::Response,
            method: request.method.clone(),
            params: None,
            result: Some(result),
            error: None,
            metadata: None,
            timestamp: now_ms(),
        }
    }

    /// Create an error response for a request
    pub fn error_response(request: &Envelope, error: WireError) -> Self {
        Envelope {
            id: request.id.clone(),
            msg_type: MessageType::Response,
            method: request.method.clone(),
            params: None,
            result: None,
            error: Some(error),
            metadata: None,
            timestamp: now_ms(),
        }
    }

    /// Create a server-push event
    pub fn event(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type: MessageType::Event,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
            metadata: None,
            timestamp: now_ms(),
        }
    }

    pub fn is_request(&self) -> bool {
        self.msg_type == MessageType::Request
    }

    pub fn is_success(&self) -> bool {
        self.msg_type == MessageType::Response && self.error.is_none()
    }

    /// Advisory timeout from metadata, if any
    pub fn timeout_ms(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.timeout)
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse from JSON text. Unknown fields are ignored; missing required
    /// fields fail with a protocol error.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Envelope-level protocol failures
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}
