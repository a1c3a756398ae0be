// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the hub HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;

use tether_hub::config::HubConfig;
use tether_hub::state::HubState;
use tether_hub::transport::build_router;

fn test_config() -> HubConfig {
    HubConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        salt: "integration-salt".to_owned(),
        auth_user: None,
        auth_pass: None,
        auth_algo: "plain".to_owned(),
        log_level: "info".to_owned(),
        built_path: "./built/{os}_{arch}".to_owned(),
        commit: "deadbeef".to_owned(),
    }
}

fn test_server(config: HubConfig) -> (Arc<HubState>, axum_test::TestServer) {
    let state =
        Arc::new(HubState::new(config, CancellationToken::new()).expect("state"));
    let app = build_router(Arc::clone(&state));
    let server =
        axum_test::TestServer::new(app.into_make_service_with_connect_info::<SocketAddr>())
            .expect("create test server");
    (state, server)
}

// -- Device list ---------------------------------------------------------------

#[tokio::test]
async fn device_list_starts_empty() {
    let (_state, server) = test_server(test_config());

    let resp = server.post("/api/device/list").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"], serde_json::json!({}));
}

// -- Dispatch validation -------------------------------------------------------

#[tokio::test]
async fn dispatch_without_target_is_bad_request() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/api/device/process/list")
        .json(&serde_json::json!({}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], -1);
}

#[tokio::test]
async fn dispatch_to_unknown_device_is_bad_gateway() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/api/device/process/list")
        .json(&serde_json::json!({"device": "no-such-device"}))
        .await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn exec_requires_a_command() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/api/device/exec")
        .json(&serde_json::json!({"device": "x", "cmd": ""}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_device_action_is_rejected() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/api/device/reformat")
        .json(&serde_json::json!({"device": "x"}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn file_remove_requires_a_file_list() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/api/device/file/remove")
        .json(&serde_json::json!({"device": "x", "files": []}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

// -- Device channel fallback ---------------------------------------------------

#[tokio::test]
async fn ws_fallback_without_secret_is_unauthorized() {
    let (_state, server) = test_server(test_config());

    let resp = server.post("/ws").bytes(vec![1u8, 2, 3].into()).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ws_fallback_with_unknown_secret_is_unauthorized() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .post("/ws")
        .add_header("Secret", "ab".repeat(32))
        .bytes(vec![1u8, 2, 3].into())
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

// -- Bridge endpoints ----------------------------------------------------------

#[tokio::test]
async fn bridge_push_without_id_is_bad_request() {
    let (_state, server) = test_server(test_config());

    let resp = server.post("/api/bridge/push").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], -1);
}

#[tokio::test]
async fn bridge_push_with_unknown_id_is_bad_request() {
    let (_state, server) = test_server(test_config());

    let resp = server.post("/api/bridge/push?bridge=0123456789abcdef0123456789abcdef").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["msg"], "invalid bridge id");
}

// -- Sub-session handshakes ----------------------------------------------------

#[tokio::test]
async fn terminal_handshake_requires_known_device() {
    let (_state, server) = test_server(test_config());

    let resp = server
        .get(&format!("/api/device/terminal?device=ghost&secret={}", "ab".repeat(16)))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn desktop_handshake_rejects_malformed_secret() {
    let (_state, server) = test_server(test_config());

    let resp = server.get("/api/device/desktop?device=ghost&secret=tooshort").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

// -- Operator auth -------------------------------------------------------------

#[tokio::test]
async fn operator_surface_enforces_basic_auth_when_configured() {
    let mut config = test_config();
    config.auth_user = Some("admin".to_owned());
    config.auth_pass = Some("secret".to_owned());
    let (_state, server) = test_server(config);

    let resp = server.post("/api/device/list").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server
        .post("/api/device/list")
        .add_header("Authorization", "Basic YWRtaW46c2VjcmV0") // admin:secret
        .await;
    resp.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn client_update_bypasses_operator_auth() {
    let mut config = test_config();
    config.auth_user = Some("admin".to_owned());
    config.auth_pass = Some("secret".to_owned());
    let (_state, server) = test_server(config);

    // Same commit: answered without operator credentials.
    let resp = server
        .get("/api/client/update?os=linux&arch=amd64&commit=deadbeef")
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], 0);
}
