//! WebSocket pass-through to a tenant container.

use axum::{
    extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message as TungsteniteMessage, client::IntoClientRequest},
};

/// Client headers carried over to the upstream handshake.
const FORWARDED_HEADERS: &[HeaderName] = &[
    header::COOKIE,
    header::AUTHORIZATION,
    header::ORIGIN,
    header::USER_AGENT,
    header::SEC_WEBSOCKET_PROTOCOL,
];

type Upstream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Open the upstream socket first, then upgrade the client and relay frames.
///
/// Returns 503 without upgrading when the upstream handshake fails.
pub async fn proxy_websocket(
    ws: WebSocketUpgrade,
    client_headers: &HeaderMap,
    target_url: String,
) -> Response {
    let mut request = match target_url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            warn!("Invalid upstream WebSocket URL {}: {}", target_url, e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    for name in FORWARDED_HEADERS {
        for value in client_headers.get_all(name) {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }

    let (upstream, response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!("Upstream WebSocket {} unavailable: {}", target_url, e);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ws = match protocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    debug!("Proxying WebSocket to {}", target_url);
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = relay(socket, upstream).await {
            debug!("WebSocket proxy to {} ended: {}", target_url, e);
        }
    })
}

async fn relay(client_socket: WebSocket, upstream: Upstream) -> anyhow::Result<()> {
    let (mut client_tx, mut client_rx) = client_socket.split();
    let (mut server_tx, mut server_rx) = upstream.split();

    let client_to_server = async {
        while let Some(msg) = client_rx.next().await {
            let forward = match msg? {
                AxumMessage::Text(text) => TungsteniteMessage::Text(text.to_string().into()),
                AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
                AxumMessage::Ping(data) => TungsteniteMessage::Ping(data),
                AxumMessage::Pong(data) => TungsteniteMessage::Pong(data),
                AxumMessage::Close(_) => {
                    server_tx.send(TungsteniteMessage::Close(None)).await?;
                    break;
                }
            };
            server_tx.send(forward).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    let server_to_client = async {
        while let Some(msg) = server_rx.next().await {
            let forward = match msg? {
                TungsteniteMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
                TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
                TungsteniteMessage::Ping(data) => AxumMessage::Ping(data),
                TungsteniteMessage::Pong(data) => AxumMessage::Pong(data),
                TungsteniteMessage::Close(_) => {
                    client_tx.send(AxumMessage::Close(None)).await?;
                    break;
                }
                TungsteniteMessage::Frame(_) => continue,
            };
            client_tx.send(forward).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = client_to_server => result?,
        result = server_to_client => result?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn detects_websocket_upgrade() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_upgrade_request(&headers));
    }
}
