//! Control socket (C8): length-prefixed JSON over a local Unix socket.
//!
//! Narrowed from the teacher's always-on, line-delimited IPC server to the
//! three operations spec.md names, true length-prefixed framing (the
//! teacher's docstring claimed this but its wire format was actually
//! newline-delimited — corrected here), and a lifecycle tied to whether an
//! IRC client is currently attached (spec §4.8).

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// A decoded request from `irslackd-ctl` or any other control-socket client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ControlRequest {
    /// Post a message to a room or thread via the bridge.
    SendMessage {
        /// IRC-visible target: a channel name or synthetic thread channel.
        target: String,
        /// Message body.
        text: String,
    },
    /// Upload a file to a room via the bridge.
    SendFile {
        /// IRC-visible target.
        target: String,
        /// Path to the file to upload.
        path: String,
    },
    /// Fetch the bridge's resolved configuration.
    GetConfig,
}

/// Response written back over the control socket.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    /// Build a success response.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// A [`ControlRequest`], translated into a mutation the bridge event loop
/// applies itself — background tasks never touch bridge state directly
/// (spec §5).
#[derive(Debug)]
pub enum BridgeCommand {
    /// See [`ControlRequest::SendMessage`].
    SendMessage {
        /// Target room/thread.
        target: String,
        /// Message body.
        text: String,
        /// Channel the connection handler awaits for the outcome.
        reply: oneshot::Sender<crate::Result<()>>,
    },
    /// See [`ControlRequest::SendFile`].
    SendFile {
        /// Target room/thread.
        target: String,
        /// Path to upload.
        path: String,
        /// Channel the connection handler awaits for the outcome.
        reply: oneshot::Sender<crate::Result<()>>,
    },
    /// See [`ControlRequest::GetConfig`].
    GetConfig {
        /// Channel the connection handler awaits for the config snapshot.
        reply: oneshot::Sender<Value>,
    },
}
