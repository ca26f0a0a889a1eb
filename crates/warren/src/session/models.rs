//! Session data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registry row: one terminal session owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Display name chosen by the owner.
    pub name: String,
    /// tmux session inside the owner's container.
    pub backing_session: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

/// Session as returned to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub name: String,
    pub backing_session: String,
    pub created_at: String,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            name: session.name,
            backing_session: session.backing_session,
            created_at: session.created_at,
        }
    }
}

/// Request body for creating a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Request body for renaming a session.
#[derive(Debug, Clone, Deserialize)]
pub struct RenameSessionRequest {
    pub name: String,
}

/// Lifecycle of a session, derived from the row, in-flight deletes and
/// attached relay channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Row exists, nobody is attached.
    Created,
    /// At least one relay channel is attached.
    Attached,
    /// A delete is in progress.
    Terminating,
    /// No row.
    Gone,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Attached => write!(f, "attached"),
            SessionState::Terminating => write!(f, "terminating"),
            SessionState::Gone => write!(f, "gone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStateReport {
    pub state: SessionState,
    pub attached: usize,
}

/// A live in-container session joined against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Registry id; `None` for orphans.
    pub id: Option<String>,
    pub user_id: Option<String>,
    /// Registry display name, or the raw tmux name for orphans.
    pub name: String,
    pub backing_session: String,
    pub created_at: Option<String>,
    pub orphan: bool,
    pub attached: usize,
}
