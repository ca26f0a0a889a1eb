//! WebSocket traffic through the tenant proxy.

mod common;

use std::net::Ipv4Addr;

use axum::{
    Router,
    extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header},
    },
};

use common::TestApp;

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.next().await {
        let reply = match msg {
            ServerMessage::Text(text) => ServerMessage::Text(format!("echo: {}", text.as_str()).into()),
            ServerMessage::Binary(data) => ServerMessage::Binary(data),
            ServerMessage::Close(_) => break,
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            break;
        }
    }
}

async fn spawn_echo_upstream() -> u16 {
    let app = Router::new().route(
        "/echo",
        get(|ws: WebSocketUpgrade| async move {
            let response: Response = ws.protocols(["chat.v1"]).on_upgrade(echo);
            response
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn websocket_is_relayed_to_tenant_with_subprotocol() {
    let app = TestApp::new().await;
    app.tenant("alice", Ipv4Addr::LOCALHOST).await;
    let addr = app.spawn().await;
    let port = spawn_echo_upstream().await;

    let mut request = format!("ws://{}/alice:{}/echo", addr, port)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static("chat.v1"),
    );

    let (mut client, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get(header::SEC_WEBSOCKET_PROTOCOL).unwrap(),
        "chat.v1"
    );

    client.send(Message::Text("hi".into())).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("echo: hi".into()));

    client
        .send(Message::Binary(vec![1u8, 2, 3].into()))
        .await
        .unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Binary(vec![1u8, 2, 3].into()));

    client.close(None).await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_websocket_is_unavailable() {
    let app = TestApp::new().await;
    app.tenant("alice", Ipv4Addr::LOCALHOST).await;
    let addr = app.spawn().await;

    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = connect_async(format!("ws://{}/alice:{}/echo", addr, port))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
