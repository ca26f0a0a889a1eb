//! Route definitions.

use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::files;
use super::handlers;
use super::state::AppState;
use super::terminal;
use crate::auth::auth_middleware;
use crate::proxy::tenant_proxy;

/// Create the application router.
///
/// The tenant proxy wraps everything, so paths it does not claim fall through
/// to the routes below and finally to the JSON 404 fallback.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/me", get(handlers::me))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{session_id}",
            patch(handlers::rename_session).delete(handlers::delete_session),
        )
        .route("/sessions/{session_id}/state", get(handlers::session_state))
        .route(
            "/files",
            get(files::list_files).delete(files::delete_file),
        )
        .route("/files/read", get(files::read_file))
        .route("/files/write", post(files::write_file))
        .route("/files/mkdir", post(files::make_directory))
        .route("/files/rename", post(files::rename_file))
        .route("/files/download", get(files::download_file))
        .route("/files/raw", get(files::raw_file))
        .route("/files/upload", post(files::upload_file))
        .route("/server/info", get(handlers::server_info))
        .route("/admin/containers", get(handlers::list_containers))
        .route(
            "/admin/containers/{name}/sessions",
            get(handlers::container_sessions),
        )
        .route(
            "/admin/users/{user_id}/container",
            post(handlers::provision_container).delete(handlers::release_container),
        )
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws/terminal", get(terminal::terminal_ws))
        .nest("/api", api_routes)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.proxy.clone(),
            tenant_proxy,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
