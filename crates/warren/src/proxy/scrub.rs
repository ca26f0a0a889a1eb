//! Removal of warren's own credentials from proxied requests.

use axum::http::{HeaderMap, HeaderValue, header};
use log::{debug, warn};

use crate::auth::{CredentialResolver, SESSION_COOKIE, bearer_token_from_header};

/// Drop the warren session cookie from every `Cookie` header.
///
/// Other cookies are kept in order; a header left empty is removed.
pub fn strip_session_cookie(headers: &mut HeaderMap) {
    let kept: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| {
            let Ok(value) = value.to_str() else {
                return Some(String::from_utf8_lossy(value.as_bytes()).into_owned());
            };
            let pairs: Vec<&str> = value
                .split(';')
                .map(str::trim)
                .filter(|pair| {
                    !pair.is_empty()
                        && pair
                            .split_once('=')
                            .is_none_or(|(name, _)| name.trim() != SESSION_COOKIE)
                })
                .collect();
            (!pairs.is_empty()).then(|| pairs.join("; "))
        })
        .collect();

    headers.remove(header::COOKIE);
    for value in kept {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.append(header::COOKIE, value);
        }
    }
}

/// Drop an `Authorization: Bearer` header that carries a warren credential.
///
/// Bearer tokens warren does not know belong to the tenant's application and
/// pass through. A failed lookup removes the header.
pub async fn strip_warren_bearer(headers: &mut HeaderMap, resolver: &dyn CredentialResolver) {
    let token = match headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(bearer_token_from_header)
    {
        Some(Ok(token)) => token.to_string(),
        _ => return,
    };

    let strip = match resolver.resolve(&token).await {
        Ok(user) => user.is_some(),
        Err(e) => {
            warn!("Credential lookup for proxied request failed: {:#}", e);
            true
        }
    };
    if strip {
        debug!("Removing warren credential from proxied request");
        headers.remove(header::AUTHORIZATION);
    }
}
