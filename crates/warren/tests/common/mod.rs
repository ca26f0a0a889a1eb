//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use tower::ServiceExt;

use warren::api::{AppState, StateOptions, create_router};
use warren::auth::TokenStore;
use warren::container::fake::FakeEngine;
use warren::db::Database;
use warren::files::FileManagerConfig;
use warren::terminal::FakeAttacher;
use warren::user::{NewUser, User, UserRepository};

pub struct TestApp {
    pub db: Database,
    pub engine: Arc<FakeEngine>,
    pub attacher: Arc<FakeAttacher>,
    pub state: AppState,
    /// Stand-in for the LXD storage pool.
    pub storage: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_attacher(FakeAttacher::new()).await
    }

    pub async fn with_attacher(attacher: FakeAttacher) -> Self {
        let db = Database::in_memory().await.unwrap();
        let engine = Arc::new(FakeEngine::new());
        let attacher = Arc::new(attacher);
        let storage = tempfile::tempdir().unwrap();
        let options = StateOptions {
            files: FileManagerConfig {
                storage_root: storage.path().to_path_buf(),
                ..FileManagerConfig::default()
            },
            ..StateOptions::default()
        };
        let state = AppState::new(&db, engine.clone(), attacher.clone(), options);
        Self {
            db,
            engine,
            attacher,
            state,
            storage,
        }
    }

    /// Create `container`'s filesystem with `/root` and `/tmp`.
    pub fn rootfs(&self, container: &str) -> PathBuf {
        let rootfs = self.storage.path().join(container).join("rootfs");
        std::fs::create_dir_all(rootfs.join("root")).unwrap();
        std::fs::create_dir_all(rootfs.join("tmp")).unwrap();
        rootfs
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Create a user with a running container at `address` and a token for them.
    pub async fn tenant(&self, username: &str, address: Ipv4Addr) -> (User, String) {
        let container = format!("warren-{}", username);
        self.engine
            .insert_container(&container, true, Some(address));
        self.user(NewUser::new(username).with_container(container))
            .await
    }

    pub async fn user(&self, request: NewUser) -> (User, String) {
        let user = UserRepository::new(self.db.pool().clone())
            .create(request)
            .await
            .unwrap();
        let token = TokenStore::new(self.db.pool().clone())
            .issue(&user.id, None)
            .await
            .unwrap();
        (user, token)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }

    /// Serve the router on an ephemeral local port.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

pub fn authed(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
}

pub fn json_request(method: &str, uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    authed(method, uri, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    authed(method, uri, token).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn text_body(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn expect_status(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    json_body(response).await
}
