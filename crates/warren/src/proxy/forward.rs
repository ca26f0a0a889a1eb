//! Plain HTTP forwarding to a tenant container.

use std::net::Ipv4Addr;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode, Uri, header},
    response::Response,
};
use hyper::body::Incoming;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use log::{debug, error, warn};

/// Upstream HTTP client shared by all proxied requests.
pub type HttpClient = Client<HttpConnector, Body>;

pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Forward `req` to `http://<address>:<port><path_and_query>`.
///
/// The body streams through unbuffered and the response is relayed as is.
/// Connection failures map to 503, any other upstream failure to 502.
pub async fn forward(
    client: &HttpClient,
    req: Request<Body>,
    address: Ipv4Addr,
    port: u16,
    path_and_query: &str,
) -> Result<Response, StatusCode> {
    let target_uri = format!("http://{}:{}{}", address, port, path_and_query);
    let uri: Uri = target_uri.parse().map_err(|e| {
        warn!("Invalid upstream URI {}: {:?}", target_uri, e);
        StatusCode::BAD_REQUEST
    })?;

    debug!("Proxying {} {} to {}", req.method(), req.uri(), uri);

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;

    if let Some(authority) = parts.uri.authority() {
        let value = HeaderValue::from_str(authority.as_str()).map_err(|e| {
            error!("Invalid Host header value {}: {:?}", authority.as_str(), e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        parts.headers.insert(header::HOST, value);
    }

    let forwarded = Request::from_parts(parts, body);

    let response = client.request(forwarded).await.map_err(|err| {
        if err.is_connect() {
            warn!("Upstream {} unreachable: {}", target_uri, err);
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            error!("Proxy request to {} failed: {:?}", target_uri, err);
            StatusCode::BAD_GATEWAY
        }
    })?;

    let (parts, body): (_, Incoming) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}
