//! Resolved caller identity. Authentication happens outside this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: String,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: role.into(),
        }
    }

    /// Identity used by background runners acting on persisted intent
    pub fn system() -> Self {
        Self::new("system", super::playbook::ADMIN_ROLE)
    }
}
