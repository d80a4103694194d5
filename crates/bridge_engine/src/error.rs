//! Engine error types.

use std::time::Duration;

use bridge_net::{NetError, RpcError};

/// Errors raised while talking to the host through the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Encoding or transport failure.
    #[error(transparent)]
    Net(#[from] NetError),

    /// The host ran the call and reported an error.
    #[error("remote call {method} failed: {} (code {})", .error.message, .error.code)]
    Remote {
        /// The remote method that failed.
        method: String,
        /// The host's error payload.
        error: RpcError,
    },

    /// No response arrived within the call deadline.
    #[error("remote call {method} (id {id}) timed out after {timeout:?}")]
    Timeout {
        /// The remote method.
        method: String,
        /// The request id that was abandoned.
        id: u64,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The connection to the host is gone.
    #[error("bridge disconnected")]
    Disconnected,

    /// The host answered with a value of the wrong shape.
    #[error("unexpected result from {method}: {detail}")]
    UnexpectedResult {
        /// The remote method.
        method: String,
        /// What was wrong with the value.
        detail: String,
    },
}

/// Errors from the user settings store.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Reading or writing a settings file failed.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be serialised.
    #[error("failed to encode setting: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A stored value could not be deserialised.
    #[error("failed to decode setting: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A document path (or entity) could not be mapped to a pipeline context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot resolve context: {0}")]
pub struct ResolveError(pub String);

/// Top-level engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bridge call failure.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Settings persistence failure.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Context resolution failure that could not be recovered locally.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A command callback failed.
    #[error("command {name:?} failed: {source}")]
    Command {
        /// The command display name.
        name: String,
        /// The callback's error.
        #[source]
        source: anyhow::Error,
    },

    /// Local filesystem or process failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialising a context for export failed.
    #[error("failed to serialise context: {0}")]
    Serialize(#[from] serde_json::Error),
}
