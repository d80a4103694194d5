//! Message types exchanged between the engine and the host application.
//!
//! Requests and responses follow the JSON-RPC 2.0 shape. Host-originated
//! events arrive as notifications (no `id`) and are lifted into typed
//! [`HostEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NetError;

/// The protocol version stamped on every outgoing message.
pub const JSONRPC_VERSION: &str = "2.0";

// ── Requests & responses ────────────────────────────────────────────────────

/// A call from the engine into the host's scripting runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The remote method name.
    pub method: String,
    /// Request identifier, unique for the lifetime of a bridge instance.
    pub id: u64,
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Request {
    /// Build a request with the given id.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            params,
        }
    }
}

/// Error payload carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Host-defined error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
}

/// The host's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The id of the request this answers.
    pub id: u64,
    /// The call result. A JSON `null` result decodes to `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set when the remote call raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// A successful response.
    #[must_use]
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn err(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Collapse into a `Result`, treating a missing result as `null`.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] if the host reported one.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A one-way message without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Always [`JSONRPC_VERSION`].
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// The event name.
    pub method: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl Notification {
    /// Build a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Any frame the engine can receive from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The answer to an earlier request.
    Response(Response),
    /// A host-originated event.
    Notification(Notification),
}

// ── Host events ─────────────────────────────────────────────────────────────

/// Notification method names sent by the host.
pub mod methods {
    /// The host switched to another document.
    pub const ACTIVE_DOCUMENT_CHANGED: &str = "active_document_changed";
    /// A log line produced on the host side.
    pub const LOGGING: &str = "logging";
    /// The user triggered a panel command.
    pub const COMMAND: &str = "command";
    /// The panel asked for a full state refresh.
    pub const STATE_REQUESTED: &str = "state_requested";
    /// The host asked the engine to run its embedded test suite.
    pub const RUN_TESTS: &str = "run_tests";
}

/// A typed host-originated event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The active document changed. An empty path means no document.
    ActiveDocumentChanged {
        /// Filesystem path of the new active document.
        path: String,
    },
    /// A log message from the host.
    Logging {
        /// One of `debug`, `info`, `warn`/`warning`, `error`.
        level: String,
        /// The message text.
        message: String,
    },
    /// A registered command was invoked from the panel.
    Command {
        /// The command uid assigned at registration.
        uid: u64,
    },
    /// The panel wants the current state re-sent.
    StateRequested,
    /// Run the embedded test suite.
    RunTests,
}

impl HostEvent {
    /// Returns the notification method name for this event.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::ActiveDocumentChanged { .. } => methods::ACTIVE_DOCUMENT_CHANGED,
            Self::Logging { .. } => methods::LOGGING,
            Self::Command { .. } => methods::COMMAND,
            Self::StateRequested => methods::STATE_REQUESTED,
            Self::RunTests => methods::RUN_TESTS,
        }
    }

    /// Lift a raw notification into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] for unknown methods or parameters of
    /// the wrong shape.
    pub fn from_notification(notification: &Notification) -> Result<Self, NetError> {
        let params = &notification.params;
        let text = |idx: usize| -> Result<String, NetError> {
            match params.get(idx) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Null) | None => Ok(String::new()),
                Some(other) => Err(NetError::Malformed(format!(
                    "{}: expected string parameter at {idx}, got {other}",
                    notification.method
                ))),
            }
        };

        match notification.method.as_str() {
            methods::ACTIVE_DOCUMENT_CHANGED => Ok(Self::ActiveDocumentChanged { path: text(0)? }),
            methods::LOGGING => Ok(Self::Logging {
                level: text(0)?,
                message: text(1)?,
            }),
            methods::COMMAND => {
                let uid = params.first().and_then(Value::as_u64).ok_or_else(|| {
                    NetError::Malformed("command: missing integer uid".to_string())
                })?;
                Ok(Self::Command { uid })
            }
            methods::STATE_REQUESTED => Ok(Self::StateRequested),
            methods::RUN_TESTS => Ok(Self::RunTests),
            other => Err(NetError::Malformed(format!("unknown event method {other:?}"))),
        }
    }

    /// Lower the event into the notification the host would send.
    #[must_use]
    pub fn to_notification(&self) -> Notification {
        let params = match self {
            Self::ActiveDocumentChanged { path } => vec![Value::from(path.as_str())],
            Self::Logging { level, message } => {
                vec![Value::from(level.as_str()), Value::from(message.as_str())]
            }
            Self::Command { uid } => vec![Value::from(*uid)],
            Self::StateRequested | Self::RunTests => Vec::new(),
        };
        Notification::new(self.method(), params)
    }
}
