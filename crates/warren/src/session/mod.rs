//! Terminal session management.
//!
//! A session is a registry row pointing at a tmux session inside the owner's
//! container. The registry never caches tmux state; liveness is observed only
//! through reconciliation.

mod error;
mod models;
pub mod multiplexer;
pub mod naming;
mod repository;
mod service;
mod tracker;

pub use error::{SessionError, SessionResult};
pub use models::{
    CreateSessionRequest, RenameSessionRequest, Session, SessionResponse, SessionState,
    SessionStateReport, SessionView,
};
pub use naming::is_valid_session_id;
pub use repository::SessionRepository;
pub use service::{MAX_NAME_CHARS, SessionRegistry, SessionRegistryConfig, normalize_name};
pub use tracker::{ChannelGuard, ChannelTracker};
