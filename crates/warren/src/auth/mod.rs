//! Authentication.
//!
//! Credentials are issued by the account service; warren only resolves them.

mod credentials;
mod error;
mod middleware;

pub use credentials::{CredentialResolver, TokenStore};
pub use error::AuthError;
pub(crate) use middleware::bearer_token_from_header;
pub use middleware::{
    AuthState, CurrentUser, RequireAdmin, SESSION_COOKIE, auth_middleware, extract_token,
};
