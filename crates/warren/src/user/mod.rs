//! Tenant accounts and their containers.

mod models;
mod repository;
mod service;

pub use models::{NewUser, User};
pub use repository::UserRepository;
pub use service::{TenantConfig, TenantError, TenantService};
