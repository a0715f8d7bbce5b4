//! Wire messages
//!
//! JSON records exchanged over the WebSocket. The server sends
//! `{ id, action, ... }`; the client answers `AUTH` challenges with a
//! handshake response and sends a `PING` on every keep-alive tick.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::identity::Identity;

pub const ACTION_AUTH: &str = "AUTH";
pub const ACTION_PONG: &str = "PONG";
pub const ACTION_PING: &str = "PING";

/// Client version reported in handshake responses
pub const CLIENT_VERSION: &str = "4.28.2";
/// Version tag carried by ping messages
pub const PING_VERSION: &str = "1.0.0";
pub const HANDSHAKE_USER_AGENT: &str = "Mozilla/5.0";
pub const DEVICE_TYPE: &str = "desktop";

/// Inbound server action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Auth,
    Pong,
    /// Anything else; ignored
    Other(String),
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        match value {
            ACTION_AUTH => Action::Auth,
            ACTION_PONG => Action::Pong,
            other => Action::Other(other.to_string()),
        }
    }
}

/// A server → client message
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<Value>,
    pub action: String,
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn action(&self) -> Action {
        Action::from(self.action.as_str())
    }
}

/// Payload of a handshake response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthResult {
    pub browser_id: String,
    pub user_id: String,
    pub user_agent: String,
    pub timestamp: i64,
    pub device_type: String,
    pub version: String,
}

/// Client answer to an `AUTH` challenge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeResponse {
    pub id: Value,
    pub origin_action: String,
    pub result: AuthResult,
}

impl HandshakeResponse {
    /// Answer the challenge `challenge_id` on behalf of `identity`.
    /// Each response carries a fresh browser id.
    pub fn new(challenge_id: Value, identity: &Identity) -> Self {
        Self {
            id: challenge_id,
            origin_action: ACTION_AUTH.to_string(),
            result: AuthResult {
                browser_id: Uuid::new_v4().to_string(),
                user_id: identity.as_str().to_string(),
                user_agent: HANDSHAKE_USER_AGENT.to_string(),
                timestamp: Utc::now().timestamp(),
                device_type: DEVICE_TYPE.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        }
    }

    /// Answer an inbound `AUTH` message, which must carry an `id`
    pub fn answer(message: &InboundMessage, identity: &Identity) -> Result<Self, ProtocolError> {
        let id = message
            .id
            .clone()
            .filter(|id| !id.is_null())
            .ok_or_else(|| ProtocolError::Malformed("AUTH message without id".to_string()))?;
        Ok(Self::new(id, identity))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Keep-alive message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PingMessage {
    pub id: String,
    pub version: String,
    pub action: String,
    pub data: serde_json::Map<String, Value>,
}

impl PingMessage {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            version: PING_VERSION.to_string(),
            action: ACTION_PING.to_string(),
            data: serde_json::Map::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Default for PingMessage {
    fn default() -> Self {
        Self::new()
    }
}
