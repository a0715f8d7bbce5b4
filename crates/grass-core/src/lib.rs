//! Grass Core Library
//!
//! Keeps one long-lived WebSocket session per (account, egress route) pair
//! against a single remote endpoint. Each session answers `AUTH` challenges,
//! sends keep-alive pings, tracks received bytes, and reconnects forever after
//! a fixed delay. Nothing here prints or parses arguments; the CLI crate does.
//!
//! # Modules
//!
//! - [`supervisor`] - Route validation fan-out and session startup
//! - [`session`] - Per-pair connection state machine
//! - [`transport`] - WebSocket bindings and the connector trait
//! - [`tunnel`] - Direct, SOCKS5 and HTTP(S) CONNECT egress streams
//! - [`validator`] - Proxy reachability and egress metadata checks
//! - [`protocol`] - Wire messages (handshake response, ping)
//! - [`route`] - Route and proxy address normalization
//! - [`usage`] - Per-identity usage accounting
//! - [`events`] - Status event sink trait and implementations
//! - [`session_names`] - Session labels
//! - [`config`] - Client configuration and defaults
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod protocol;
pub mod route;
pub mod session;
pub mod session_names;
pub mod supervisor;
pub mod transport;
pub mod tunnel;
pub mod usage;
pub mod validator;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::ClientConfig;
pub use error::{CoreError, ProtocolError, Result, TransportError};
pub use events::{EventSink, StatusEvent, StatusKind};
pub use identity::Identity;
pub use route::{ProxyAddress, ProxyScheme, Route, RouteMetadata};
pub use session::{SessionHandle, SessionState};
pub use session_names::SessionId;
pub use supervisor::{Mode, SessionPlan, Supervisor, SupervisorHandle};
pub use transport::{Binding, Connector, WsConnector};
pub use usage::{kilobytes, UsageTable};
pub use validator::{HttpRouteValidator, RouteValidator};
