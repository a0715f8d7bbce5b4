//! Session Naming Module
//!
//! Every session gets a unique id and a readable name built from its identity
//! and route, e.g. `2ofrQxyz@10.0.0.1:1080` or `2ofrQxyz@direct`.

use uuid::Uuid;

use crate::identity::Identity;
use crate::route::Route;

/// Session identifier with both internal UUID and display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId {
    /// Internal unique identifier (UUID v4)
    pub id: String,
    /// Human-friendly display name
    pub name: String,
}

impl SessionId {
    /// Create a session id for an (identity, route) pair
    pub fn for_pair(identity: &Identity, route: &Route) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: create_session_name(identity, route),
        }
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// `<identity prefix>@<route host>`
pub fn create_session_name(identity: &Identity, route: &Route) -> String {
    format!("{}@{}", identity.short(), route.host_label())
}
