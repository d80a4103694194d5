//! Typed calls into the host-side panel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bridge::RpcCall;
use crate::commands::CommandState;
use crate::error::BridgeError;

/// Panel method names.
pub mod methods {
    pub const CONTEXT_ABOUT_TO_CHANGE: &str = "context_about_to_change";
    pub const SEND_COMMANDS: &str = "send_commands";
    pub const SEND_CONTEXT_DISPLAY: &str = "send_context_display";
    pub const SEND_CONTEXT_THUMBNAIL: &str = "send_context_thumbnail";
    pub const LOG_MESSAGE: &str = "log_message";
    pub const SEND_LOG_FILE_PATH: &str = "send_log_file_path";
    pub const ACTIVE_DOCUMENT_PATH: &str = "active_document_path";
    pub const OPEN_DOCUMENT_COUNT: &str = "open_document_count";
    pub const SETENV: &str = "setenv";
}

/// Thumbnail shown next to the context display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub thumb_path: PathBuf,
    /// Page opened when the thumbnail is clicked.
    pub url: String,
}

/// The host panel, reached through the bridge.
#[derive(Clone)]
pub struct HostPanel {
    rpc: Arc<dyn RpcCall>,
}

impl std::fmt::Debug for HostPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPanel").finish_non_exhaustive()
    }
}

impl HostPanel {
    #[must_use]
    pub fn new(rpc: Arc<dyn RpcCall>) -> Self {
        Self { rpc }
    }

    /// The underlying call handle.
    #[must_use]
    pub fn rpc(&self) -> &Arc<dyn RpcCall> {
        &self.rpc
    }

    async fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), BridgeError> {
        self.rpc.call(method, params).await.map(|_| ())
    }

    /// Tell the panel to show its "loading" state.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn context_about_to_change(&self) -> Result<(), BridgeError> {
        self.notify(methods::CONTEXT_ABOUT_TO_CHANGE, Vec::new()).await
    }

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn send_commands(&self, state: &CommandState) -> Result<(), BridgeError> {
        let state = serde_json::to_value(state).map_err(|e| BridgeError::UnexpectedResult {
            method: methods::SEND_COMMANDS.to_string(),
            detail: e.to_string(),
        })?;
        self.notify(methods::SEND_COMMANDS, vec![state]).await
    }

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn send_context_display(&self, html: &str) -> Result<(), BridgeError> {
        self.notify(methods::SEND_CONTEXT_DISPLAY, vec![json!(html)])
            .await
    }

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn send_context_thumbnail(&self, thumbnail: &Thumbnail) -> Result<(), BridgeError> {
        self.notify(methods::SEND_CONTEXT_THUMBNAIL, vec![json!(thumbnail)])
            .await
    }

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn log_message(&self, level: &str, message: &str) -> Result<(), BridgeError> {
        self.notify(methods::LOG_MESSAGE, vec![json!(level), json!(message)])
            .await
    }

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn send_log_file_path(&self, path: &Path) -> Result<(), BridgeError> {
        self.notify(
            methods::SEND_LOG_FILE_PATH,
            vec![json!(path.display().to_string())],
        )
        .await
    }

    /// Path of the document the host has in focus, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails or the answer is not a
    /// string.
    pub async fn active_document_path(&self) -> Result<Option<PathBuf>, BridgeError> {
        match self.rpc.call(methods::ACTIVE_DOCUMENT_PATH, Vec::new()).await? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => Ok(Some(PathBuf::from(s))),
            other => Err(BridgeError::UnexpectedResult {
                method: methods::ACTIVE_DOCUMENT_PATH.to_string(),
                detail: format!("expected a path, got {other}"),
            }),
        }
    }

    /// Number of documents open in the host.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails or the answer is not a
    /// number.
    pub async fn open_document_count(&self) -> Result<u64, BridgeError> {
        let value = self.rpc.call(methods::OPEN_DOCUMENT_COUNT, Vec::new()).await?;
        value.as_u64().ok_or_else(|| BridgeError::UnexpectedResult {
            method: methods::OPEN_DOCUMENT_COUNT.to_string(),
            detail: format!("expected a count, got {value}"),
        })
    }

    /// Set an environment variable in the host process.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the call fails.
    pub async fn setenv(&self, name: &str, value: &str) -> Result<(), BridgeError> {
        self.notify(methods::SETENV, vec![json!(name), json!(value)])
            .await
    }
}
