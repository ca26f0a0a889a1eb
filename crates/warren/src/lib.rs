//! Multi-tenant terminal workspaces.
//!
//! Each user owns an LXD container; named tmux sessions inside it are exposed
//! to browsers through a WebSocket terminal relay, and services listening in
//! the container are reachable through a path-based reverse proxy.

pub mod api;
pub mod auth;
pub mod config;
pub mod container;
pub mod db;
pub mod files;
pub mod host;
pub mod proxy;
pub mod session;
pub mod terminal;
pub mod user;
