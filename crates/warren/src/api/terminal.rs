//! `GET /ws/terminal`: attach a WebSocket to an in-container session.

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, future};
use serde::Deserialize;
use tracing::{debug, info};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::AuthError;
use crate::session::{ChannelGuard, is_valid_session_id};
use crate::terminal::{Attachment, InboundFrame, RelayError, bridge};

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub session: Option<String>,
}

/// Authenticate, authorize and attach before upgrading; any failure is a
/// plain HTTP error response.
pub async fn terminal_ws(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<TerminalQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let user = state
        .auth
        .authenticate(uri.query(), &headers)
        .await
        .map_err(|err| match err {
            AuthError::Internal(msg) => ApiError::Internal(msg),
            _ => RelayError::Unauthorized.into(),
        })?;

    let session_id = query
        .session
        .filter(|id| is_valid_session_id(id))
        .ok_or_else(|| RelayError::Validation("missing or invalid session id".to_string()))?;

    let session = state
        .registry
        .get(&session_id)
        .await?
        .ok_or(RelayError::NotFound)?;
    if session.user_id != user.id() {
        return Err(RelayError::Forbidden.into());
    }

    let container = user
        .user
        .container()
        .ok_or_else(|| RelayError::Validation("user has no container".to_string()))?
        .to_string();

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    state.engine.ensure_running(&container).await?;
    let attachment = state
        .attacher
        .attach(&container, &session.backing_session, state.terminal_size)
        .await?;

    info!(
        "Relay opened for session {} ({}/{})",
        session.id, container, session.backing_session
    );

    let registry = state.registry.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        let guard = registry.track_channel(&session.id);
        run_relay(socket, attachment, guard).await;
    }))
}

async fn run_relay(socket: WebSocket, attachment: Attachment, guard: ChannelGuard) {
    let (sink, stream) = socket.split();

    let inbound = Box::pin(stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(InboundFrame::Text(text.to_string())),
            Ok(Message::Binary(data)) => Some(InboundFrame::Binary(data)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Ok(Message::Close(_)) | Err(_) => Some(InboundFrame::Close),
        })
    }));
    let outbound = Box::pin(
        sink.with(|data: Bytes| future::ready(Ok::<_, axum::Error>(Message::Binary(data)))),
    );

    let end = bridge(inbound, outbound, attachment).await;
    debug!("Relay finished: {:?}", end);
    drop(guard);
}
