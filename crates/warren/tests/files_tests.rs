//! File manager, account and host information endpoints.

mod common;

use std::net::Ipv4Addr;

use axum::{
    body::Body,
    http::{StatusCode, header},
};
use serde_json::json;

use common::{TestApp, authed, empty_request, expect_status, json_request, text_body};
use warren::user::NewUser;

const ALICE_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 3, 2);

#[tokio::test]
async fn me_describes_the_caller() {
    let app = TestApp::new().await;
    let (alice, token) = app.tenant("alice", ALICE_ADDR).await;

    let response = app.send(empty_request("GET", "/api/me", &token)).await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(
        body,
        json!({
            "id": alice.id,
            "username": "alice",
            "isAdmin": false,
            "container": "warren-alice",
        })
    );
}

#[tokio::test]
async fn file_editing_round_trip() {
    let app = TestApp::new().await;
    let (_alice, token) = app.tenant("alice", ALICE_ADDR).await;
    let rootfs = app.rootfs("warren-alice");

    let response = app
        .send(json_request(
            "POST",
            "/api/files/mkdir",
            &token,
            json!({ "path": "/root/project" }),
        ))
        .await;
    assert_eq!(expect_status(response, StatusCode::OK).await, json!({ "ok": true }));

    let response = app
        .send(json_request(
            "POST",
            "/api/files/write",
            &token,
            json!({ "path": "/root/project/main.rs", "content": "fn main() {}\n" }),
        ))
        .await;
    expect_status(response, StatusCode::OK).await;
    assert_eq!(
        std::fs::read_to_string(rootfs.join("root/project/main.rs")).unwrap(),
        "fn main() {}\n"
    );

    let response = app.send(empty_request("GET", "/api/files", &token)).await;
    let listing = expect_status(response, StatusCode::OK).await;
    assert_eq!(listing["path"], "/root");
    assert_eq!(listing["files"][0]["name"], "project");
    assert_eq!(listing["files"][0]["isDir"], true);

    let response = app
        .send(empty_request(
            "GET",
            "/api/files/read?path=/root/project/main.rs",
            &token,
        ))
        .await;
    let content = expect_status(response, StatusCode::OK).await;
    assert_eq!(content, json!({ "content": "fn main() {}\n", "size": 13 }));

    let response = app
        .send(json_request(
            "POST",
            "/api/files/rename",
            &token,
            json!({ "oldPath": "/root/project/main.rs", "newPath": "/root/project/lib.rs" }),
        ))
        .await;
    expect_status(response, StatusCode::OK).await;
    assert!(rootfs.join("root/project/lib.rs").exists());

    let response = app
        .send(empty_request("DELETE", "/api/files?path=/root/project", &token))
        .await;
    expect_status(response, StatusCode::OK).await;
    assert!(!rootfs.join("root/project").exists());
}

#[tokio::test]
async fn file_paths_cannot_leave_the_container() {
    let app = TestApp::new().await;
    let (_alice, token) = app.tenant("alice", ALICE_ADDR).await;
    let rootfs = app.rootfs("warren-alice");
    let bob_rootfs = app.rootfs("warren-bob");
    std::fs::write(bob_rootfs.join("root/secret"), "bob's").unwrap();
    std::os::unix::fs::symlink(bob_rootfs.join("root"), rootfs.join("root/bob")).unwrap();

    for uri in [
        "/api/files/read?path=/root/../../../warren-bob/rootfs/root/secret",
        "/api/files/read?path=/root/bob/secret",
        "/api/files/download?path=/root/bob/secret",
    ] {
        let response = app.send(empty_request("GET", uri, &token)).await;
        let body = expect_status(response, StatusCode::FORBIDDEN).await;
        assert_eq!(body["code"], "FORBIDDEN", "{uri}");
    }

    let response = app
        .send(json_request(
            "POST",
            "/api/files/write",
            &token,
            json!({ "path": "/root/bob/secret", "content": "pwned" }),
        ))
        .await;
    expect_status(response, StatusCode::FORBIDDEN).await;
    assert_eq!(
        std::fs::read_to_string(bob_rootfs.join("root/secret")).unwrap(),
        "bob's"
    );

    let response = app
        .send(empty_request("DELETE", "/api/files?path=/root", &token))
        .await;
    expect_status(response, StatusCode::BAD_REQUEST).await;
    assert!(rootfs.join("root").exists());
}

#[tokio::test]
async fn file_routes_need_a_container_and_a_path() {
    let app = TestApp::new().await;
    let (_bob, bob_token) = app.user(NewUser::new("bob")).await;
    let (_alice, token) = app.tenant("alice", ALICE_ADDR).await;
    app.rootfs("warren-alice");

    let response = app.send(empty_request("GET", "/api/files", &bob_token)).await;
    let body = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert!(body["error"].as_str().unwrap().contains("no container"));

    let response = app
        .send(empty_request("GET", "/api/files/read", &token))
        .await;
    let body = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert!(body["error"].as_str().unwrap().contains("path required"));

    let response = app
        .send(empty_request("GET", "/api/files/read?path=/root/missing", &token))
        .await;
    expect_status(response, StatusCode::NOT_FOUND).await;
}

#[tokio::test]
async fn downloads_stream_with_attachment_headers() {
    let app = TestApp::new().await;
    let (_alice, token) = app.tenant("alice", ALICE_ADDR).await;
    let rootfs = app.rootfs("warren-alice");
    std::fs::write(rootfs.join("root/report.csv"), "a,b\n1,2\n").unwrap();
    std::fs::write(rootfs.join("root/page.html"), "<script>alert(1)</script>").unwrap();
    std::fs::write(rootfs.join("root/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let response = app
        .send(empty_request(
            "GET",
            "/api/files/download?path=/root/report.csv",
            &token,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.csv\""
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "8");
    assert_eq!(text_body(response).await, "a,b\n1,2\n");

    let response = app
        .send(empty_request("GET", "/api/files/raw?path=/root/page.html", &token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(response.headers()[header::CONTENT_SECURITY_POLICY], "sandbox");

    let response = app
        .send(empty_request("GET", "/api/files/raw?path=/root/logo.png", &token))
        .await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn uploads_land_under_a_sanitized_name() {
    let app = TestApp::new().await;
    let (_alice, token) = app.tenant("alice", ALICE_ADDR).await;
    let rootfs = app.rootfs("warren-alice");

    let response = app
        .send(
            authed("POST", "/api/files/upload?path=/root/inbox", &token)
                .header("x-filename", "..%2F..%2Fnotes%20v1.txt")
                .body(Body::from("uploaded"))
                .unwrap(),
        )
        .await;
    let body = expect_status(response, StatusCode::CREATED).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["path"], "/root/inbox/_.._notes_v1.txt");
    assert_eq!(
        std::fs::read_to_string(rootfs.join("root/inbox/_.._notes_v1.txt")).unwrap(),
        "uploaded"
    );

    let response = app
        .send(
            authed("POST", "/api/files/upload", &token)
                .body(Body::from("anonymous"))
                .unwrap(),
        )
        .await;
    let body = expect_status(response, StatusCode::CREATED).await;
    assert!(body["path"].as_str().unwrap().starts_with("/tmp/upload_"));
}

#[tokio::test]
async fn admin_listing_reports_container_size() {
    let app = TestApp::new().await;
    let (_root, admin) = app.user(NewUser::new("root").admin()).await;
    app.tenant("alice", ALICE_ADDR).await;
    app.engine.insert_container("warren-ghost", false, None);
    let rootfs = app.rootfs("warren-alice");
    std::fs::write(rootfs.join("root/data"), vec![0u8; 4096]).unwrap();

    let response = app
        .send(empty_request("GET", "/api/admin/containers", &admin))
        .await;
    let containers = expect_status(response, StatusCode::OK).await;
    let containers = containers.as_array().unwrap();

    let alice = containers
        .iter()
        .find(|c| c["name"] == "warren-alice")
        .unwrap();
    assert!(alice["size"].as_u64().unwrap() >= 4096);
    assert_eq!(alice["address"], "10.0.3.2");

    let ghost = containers
        .iter()
        .find(|c| c["name"] == "warren-ghost")
        .unwrap();
    assert!(ghost["size"].is_null());
}

#[tokio::test]
async fn server_info_is_admin_only() {
    let app = TestApp::new().await;
    let (_alice, token) = app.tenant("alice", ALICE_ADDR).await;

    let response = app
        .send(empty_request("GET", "/api/server/info", &token))
        .await;
    expect_status(response, StatusCode::FORBIDDEN).await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn server_info_reads_host_figures() {
    let app = TestApp::new().await;
    let (_root, admin) = app.user(NewUser::new("root").admin()).await;

    let response = app
        .send(empty_request("GET", "/api/server/info", &admin))
        .await;
    let info = expect_status(response, StatusCode::OK).await;
    assert!(info["memory"]["total"].as_u64().unwrap() > 0);
    assert!(info["cpu"]["cores"].as_u64().unwrap() >= 1);
    assert_eq!(info["cpu"]["load"].as_array().unwrap().len(), 3);
    assert!(info["uptime"].as_str().unwrap().starts_with("up "));
}
