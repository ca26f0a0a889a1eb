//! HTTP handlers for sessions, administration and health.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use futures::future::join_all;
use serde::Serialize;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::{CurrentUser, RequireAdmin};
use crate::container::{ContainerIdentity, is_template_name, validate_name};
use crate::host::{ServerInfo, read_server_info};
use crate::session::{
    CreateSessionRequest, RenameSessionRequest, SessionResponse, SessionStateReport, SessionView,
    is_valid_session_id,
};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct RenameResponse {
    pub ok: bool,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub ok: bool,
    pub container: Option<String>,
}

/// The signed-in account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    pub container: Option<String>,
}

/// A managed container with the apparent size of its filesystem.
#[derive(Debug, Serialize)]
pub struct ContainerSummary {
    #[serde(flatten)]
    pub identity: ContainerIdentity,
    /// Bytes, when the filesystem is visible from this host.
    pub size: Option<u64>,
}

fn check_session_id(id: &str) -> ApiResult<()> {
    if is_valid_session_id(id) {
        Ok(())
    } else {
        Err(ApiError::bad_request("invalid session id"))
    }
}

pub async fn me(user: CurrentUser) -> Json<MeResponse> {
    let user = user.user;
    Json(MeResponse {
        id: user.id,
        username: user.username,
        is_admin: user.is_admin,
        container: user.container,
    })
}

/// Host memory, CPU, disk and uptime.
pub async fn server_info(RequireAdmin(_admin): RequireAdmin) -> ApiResult<Json<ServerInfo>> {
    Ok(Json(read_server_info().await?))
}

/// List the caller's sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<SessionResponse>>> {
    let sessions = state.registry.list(user.id()).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// Create a session in the caller's container. The body is optional.
pub async fn create_session(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?
    };

    let session = state
        .registry
        .create(&user.user, request.name.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn rename_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(request): Json<RenameSessionRequest>,
) -> ApiResult<Json<RenameResponse>> {
    check_session_id(&session_id)?;
    let session = state
        .registry
        .rename(&session_id, user.id(), &request.name)
        .await?;

    Ok(Json(RenameResponse {
        ok: true,
        name: session.name,
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    check_session_id(&session_id)?;
    state.registry.delete(&session_id, user.id()).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// Derived lifecycle state of one of the caller's sessions.
pub async fn session_state(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStateReport>> {
    check_session_id(&session_id)?;
    let foreign = state
        .registry
        .get(&session_id)
        .await?
        .is_some_and(|session| session.user_id != user.id());
    if foreign {
        return Err(ApiError::not_found("session not found"));
    }
    Ok(Json(state.registry.state(&session_id).await?))
}

/// Managed containers with their status, address and size.
pub async fn list_containers(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> ApiResult<Json<Vec<ContainerSummary>>> {
    let containers = state.engine.list(&is_template_name).await?;
    let sizes = join_all(
        containers
            .iter()
            .map(|identity| state.files.disk_usage(&identity.name)),
    )
    .await;

    Ok(Json(
        containers
            .into_iter()
            .zip(sizes)
            .map(|(identity, size)| ContainerSummary { identity, size })
            .collect(),
    ))
}

/// Live sessions in a container joined against the registry.
pub async fn container_sessions(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(container): Path<String>,
) -> ApiResult<Json<Vec<SessionView>>> {
    validate_name(&container)?;
    Ok(Json(state.registry.reconcile(&container).await?))
}

pub async fn provision_container(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(user_id): Path<String>,
) -> ApiResult<(StatusCode, Json<ContainerIdentity>)> {
    let identity = state.tenants.provision(&user_id).await?;
    Ok((StatusCode::CREATED, Json(identity)))
}

pub async fn release_container(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ReleaseResponse>> {
    let container = state.tenants.release(&user_id).await?;
    Ok(Json(ReleaseResponse {
        ok: true,
        container,
    }))
}

/// JSON 404 for anything no route or tenant claimed.
pub async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}
