//! Router layer that diverts tenant paths to their containers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State, ws::WebSocketUpgrade},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::forward::{HttpClient, forward, http_client};
use super::path::{TenantDirectory, TenantPath};
use super::scrub::{strip_session_cookie, strip_warren_bearer};
use super::websocket::{is_upgrade_request, proxy_websocket};
use crate::api::ApiError;
use crate::auth::CredentialResolver;
use crate::container::IpCache;

/// Everything the proxy layer needs per request.
#[derive(Clone)]
pub struct ProxyState {
    directory: Arc<dyn TenantDirectory>,
    ip_cache: Arc<IpCache>,
    credentials: Arc<dyn CredentialResolver>,
    client: HttpClient,
    extra_reserved: Arc<Vec<String>>,
}

impl ProxyState {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        ip_cache: Arc<IpCache>,
        credentials: Arc<dyn CredentialResolver>,
        extra_reserved: Vec<String>,
    ) -> Self {
        Self {
            directory,
            ip_cache,
            credentials,
            client: http_client(),
            extra_reserved: Arc::new(extra_reserved),
        }
    }
}

impl std::fmt::Debug for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyState")
            .field("extra_reserved", &self.extra_reserved)
            .finish_non_exhaustive()
    }
}

/// Proxy requests addressed to a known tenant; pass everything else on.
///
/// Unknown identifiers fall through to the rest of the router untouched. A
/// known tenant whose container has no address gets 503.
pub async fn tenant_proxy(
    State(proxy): State<ProxyState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(target) = TenantPath::parse(req.uri().path(), &proxy.extra_reserved) else {
        return next.run(req).await;
    };

    let container = match proxy.directory.container_for(&target.identifier).await {
        Ok(Some(container)) => container,
        Ok(None) => return next.run(req).await,
        Err(e) => {
            warn!("Tenant lookup for {} failed: {:#}", target.identifier, e);
            return next.run(req).await;
        }
    };

    let Some(address) = proxy.ip_cache.get(&container).await else {
        return ApiError::service_unavailable(format!(
            "container for {} is not running",
            target.identifier
        ))
        .into_response();
    };

    strip_session_cookie(req.headers_mut());
    strip_warren_bearer(req.headers_mut(), proxy.credentials.as_ref()).await;

    let path_and_query = target.upstream_path_and_query(req.uri().query());
    debug!(
        "Tenant {} -> {}:{}{}",
        target.identifier, address, target.port, path_and_query
    );

    if is_upgrade_request(req.headers()) {
        let (mut parts, _body) = req.into_parts();
        let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => ws,
            Err(rejection) => return rejection.into_response(),
        };
        let url = format!("ws://{}:{}{}", address, target.port, path_and_query);
        return proxy_websocket(ws, &parts.headers, url).await;
    }

    match forward(&proxy.client, req, address, target.port, &path_and_query).await {
        Ok(response) => response,
        Err(status) => ApiError::from_status(
            status,
            format!("upstream for {} failed", target.identifier),
        )
        .into_response(),
    }
}
