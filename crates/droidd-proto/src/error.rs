//! Agent error taxonomy.
//!
//! Every failure on the wire carries a numeric code from a closed table.
//! The category is derived from the code range; the recoverable flag comes
//! from a fixed list. Extending either is a protocol-compatibility change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ===== Code constants (closed set) =====

// TRANSPORT 1000-1999
pub const AUTH_FAILED: u32 = 1001;
pub const TRANSPORT_TIMEOUT: u32 = 1002;
pub const RATE_LIMITED: u32 = 1003;
pub const TRANSPORT_PROTOCOL_ERROR: u32 = 1004;

// DEVICE 2000-2999
pub const DEVICE_OFFLINE: u32 = 2001;
pub const PERMISSION_DENIED: u32 = 2002;
pub const PRIVILEGE_REQUIRED: u32 = 2003;
pub const LOW_MEMORY: u32 = 2004;
pub const SCREEN_OFF: u32 = 2005;

// APP 3000-3999
pub const APP_NOT_INSTALLED: u32 = 3001;
pub const INSTALL_FAILED: u32 = 3002;
pub const LAUNCH_TIMEOUT: u32 = 3003;

// UI 4000-4999
pub const ELEMENT_NOT_FOUND: u32 = 4001;
pub const ELEMENT_NOT_VISIBLE: u32 = 4002;
pub const STALE_ELEMENT: u32 = 4003;
pub const GESTURE_FAILED: u32 = 4004;
pub const HIERARCHY_UNAVAILABLE: u32 = 4005;

// PERF 5000-5999
pub const PERF_SESSION_NOT_FOUND: u32 = 5001;
pub const PERF_SESSION_RUNNING: u32 = 5002;
pub const COLLECTOR_FAILED: u32 = 5003;

// FILE 6000-6999
pub const FILE_NOT_FOUND: u32 = 6001;
pub const FILE_ACCESS_DENIED: u32 = 6002;

// PLUGIN 7000-7999
pub const PLUGIN_INIT_FAILED: u32 = 7001;
pub const PLUGIN_DEPENDENCY_MISSING: u32 = 7002;
pub const PLUGIN_MANIFEST_INVALID: u32 = 7003;

// INTERNAL 9000-9999
pub const INTERNAL_ERROR: u32 = 9001;
pub const NOT_IMPLEMENTED: u32 = 9002;
pub const UNKNOWN: u32 = 9003;
pub const MESSAGE_PROTOCOL_ERROR: u32 = 9004;

/// Error categories, one per code range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    Transport,
    Device,
    App,
    Ui,
    Perf,
    File,
    Plugin,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "TRANSPORT",
            ErrorCategory::Device => "DEVICE",
            ErrorCategory::App => "APP",
            ErrorCategory::Ui => "UI",
            ErrorCategory::Perf => "PERF",
            ErrorCategory::File => "FILE",
            ErrorCategory::Plugin => "PLUGIN",
            ErrorCategory::Internal => "INTERNAL",
        }
    }
}

/// Derive the category from a code's thousand-range
pub fn category_of(code: u32) -> ErrorCategory {
    match code {
        1000..=1999 => ErrorCategory::Transport,
        2000..=2999 => ErrorCategory::Device,
        3000..=3999 => ErrorCategory::App,
        4000..=4999 => ErrorCategory::Ui,
        5000..=5999 => ErrorCategory::Perf,
        6000..=6999 => ErrorCategory::File,
        7000..=7999 => ErrorCategory::Plugin,
        _ => ErrorCategory::Internal,
    }
}

/// The fixed recoverable set. Frozen; extending it is a versioned
/// protocol change.
pub fn is_recoverable(code: u32) -> bool {
    matches!(
        code,
        RATE_LIMITED
            | TRANSPORT_TIMEOUT
            | LOW_MEMORY
            | SCREEN_OFF
            | ELEMENT_NOT_FOUND
            | ELEMENT_NOT_VISIBLE
            | STALE_ELEMENT
            | LAUNCH_TIMEOUT
    )
}

/// Typed agent error raised by handlers and strategies
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AgentError {
    pub code: u32,
    pub message: String,
    pub details: Option<Value>,
    pub suggested_action: Option<String>,
}

impl AgentError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        AgentError {
            code,
            message: message.into(),
            details: None,
            suggested_action: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        category_of(self.code)
    }

    pub fn not_implemented(method: &str) -> Self {
        AgentError::new(NOT_IMPLEMENTED, format!("Unknown method: {}", method))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AgentError::new(INTERNAL_ERROR, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        AgentError::new(UNKNOWN, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        AgentError::new(INTERNAL_ERROR, message)
    }
}

/// Error object as serialized into a response envelope.
/// `category` and `recoverable` are always derived from `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl From<AgentError> for WireError {
    fn from(err: AgentError) -> Self {
        WireError {
            code: err.code,
            category: category_of(err.code),
            message: err.message,
            details: err.details,
            recoverable: is_recoverable(err.code),
            suggested_action: err.suggested_action,
        }
    }
}
