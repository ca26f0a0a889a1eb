//! User data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tenant account as stored by the account service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    /// Name of the container this user owns, if one has been provisioned.
    pub container: Option<String>,
    pub created_at: String,
}

impl User {
    /// Container name, when the user has one.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }
}

/// Account seed used by tests and local bootstrapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub container: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}
