//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Only [`AppError::Config`] and [`AppError::Auth`] are fatal. Every other
/// variant is logged and handled by the caller without tearing down the
/// event loop.
#[derive(Debug)]
pub enum AppError {
    /// Missing token, unreadable files, bad port, or other startup misconfiguration.
    Config(String),
    /// Slack rejected the token or cookie.
    Auth(String),
    /// Network drop, 5xx, or rate-limit; retried internally by the transport.
    TransportTransient(String),
    /// Transport retry budget exhausted; the caller should reconnect.
    TransportTerminal(String),
    /// Unknown user/room/ts; a background refresh is triggered.
    LookupMiss(String),
    /// Event JSON failed to parse or a required field was absent.
    MalformedEvent(String),
    /// IRC or extension command referenced a missing target or invalid argument.
    Command(String),
    /// Status file unreadable or unwritable; in-memory state continues.
    Persistence(String),
    /// IPC communication failure.
    Ipc(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure outside the categories above.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::TransportTransient(msg) => write!(f, "transport (transient): {msg}"),
            Self::TransportTerminal(msg) => write!(f, "transport (terminal): {msg}"),
            Self::LookupMiss(msg) => write!(f, "lookup miss: {msg}"),
            Self::MalformedEvent(msg) => write!(f, "malformed event: {msg}"),
            Self::Command(msg) => write!(f, "command: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedEvent(err.to_string())
    }
}

/// Returns true for error kinds that must terminate the process.
#[must_use]
pub fn is_fatal(err: &AppError) -> bool {
    matches!(err, AppError::Config(_) | AppError::Auth(_))
}
