//! Request authentication.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use super::{AuthError, CredentialResolver};
use crate::user::User;

/// Cookie carrying the session token for browser clients.
pub const SESSION_COOKIE: &str = "session";

/// Extract a Bearer token from an Authorization header value.
pub(crate) fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" && !value.is_empty() {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Find the presented credential: `token` query parameter, then
/// `Authorization: Bearer`, then the session cookie.
pub fn extract_token(query: Option<&str>, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query.and_then(token_from_query) {
        return Ok(token);
    }

    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        return bearer_token_from_header(value).map(str::to_string);
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|cookies| token_from_cookie_header(cookies, SESSION_COOKIE))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::MissingCredentials)
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    resolver: Arc<dyn CredentialResolver>,
}

impl AuthState {
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve the credential carried by a request.
    pub async fn authenticate(
        &self,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<CurrentUser, AuthError> {
        let token = extract_token(query, headers)?;
        match self.resolver.resolve(&token).await {
            Ok(Some(user)) => Ok(CurrentUser { user }),
            Ok(None) => Err(AuthError::InvalidToken),
            Err(e) => {
                error!("Credential lookup failed: {:#}", e);
                Err(AuthError::Internal("credential lookup failed".to_string()))
            }
        }
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState").finish_non_exhaustive()
    }
}

/// The authenticated user of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

/// Reject requests that do not carry valid credentials.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let user = auth.authenticate(req.uri().query(), req.headers()).await?;
    debug!("Authenticated user: {}", user.id());
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Extractor that only admits admin users.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions(
                "admin access required".to_string(),
            ));
        }

        Ok(RequireAdmin(user))
    }
}
