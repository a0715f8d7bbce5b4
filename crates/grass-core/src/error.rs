//! Error types
//!
//! Each layer has its own `thiserror` enum. Transport and protocol failures
//! are always recovered inside a session; only configuration errors and
//! route rejections ever reach the caller.

use thiserror::Error;

/// Failures of a single transport binding (connect, send, receive).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Proxy tunnel failed: {0}")]
    Proxy(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// An inbound message that could not be understood.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Binary frame is not valid UTF-8")]
    NonUtf8,
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The route failed validation and must not carry a session
    #[error("Route {route} is unreachable: {reason}")]
    RouteUnreachable { route: String, reason: String },

    /// Fatal: the run cannot start
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CoreError>;
