// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests for client generation against real template files.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;

use tether_hub::config::HubConfig;
use tether_hub::crypto;
use tether_hub::state::HubState;
use tether_hub::transport::build_router;

const SLOT_SIZE: usize = 384;

struct TemplateDir {
    dir: std::path::PathBuf,
}

impl TemplateDir {
    async fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("tether-tpl-{}", crypto::new_id_hex()));
        tokio::fs::create_dir_all(&dir).await.expect("tempdir");
        Self { dir }
    }

    async fn write_template(&self, name: &str, content: &[u8]) {
        tokio::fs::write(self.dir.join(name), content).await.expect("write template");
    }

    fn built_path(&self) -> String {
        self.dir.join("{os}_{arch}").to_string_lossy().into_owned()
    }
}

impl Drop for TemplateDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn test_server(built_path: String) -> axum_test::TestServer {
    let config = HubConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        salt: "generate-salt".to_owned(),
        auth_user: None,
        auth_pass: None,
        auth_algo: "plain".to_owned(),
        log_level: "info".to_owned(),
        built_path,
        commit: "abc123".to_owned(),
    };
    let state =
        Arc::new(HubState::new(config, CancellationToken::new()).expect("state"));
    let app = build_router(Arc::clone(&state));
    axum_test::TestServer::new(app.into_make_service_with_connect_info::<SocketAddr>())
        .expect("create test server")
}

fn generate_body(os: &str) -> serde_json::Value {
    serde_json::json!({
        "os": os,
        "arch": "amd64",
        "host": "hub.example.com",
        "port": 443,
        "path": "/ws",
        "secure": "true",
    })
}

#[tokio::test]
async fn check_client_reports_missing_template() {
    let templates = TemplateDir::new().await;
    let server = test_server(templates.built_path());

    let resp = server.post("/api/client/check").json(&generate_body("linux")).await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn check_client_accepts_existing_template() {
    let templates = TemplateDir::new().await;
    templates.write_template("linux_amd64", &[0u8; 2048]).await;
    let server = test_server(templates.built_path());

    let resp = server.post("/api/client/check").json(&generate_body("linux")).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], 0);
}

#[tokio::test]
async fn check_client_rejects_oversized_config() {
    let templates = TemplateDir::new().await;
    templates.write_template("linux_amd64", &[0u8; 2048]).await;
    let server = test_server(templates.built_path());

    let mut body = generate_body("linux");
    body["path"] = serde_json::Value::String("/".to_owned() + &"p".repeat(400));
    let resp = server.post("/api/client/check").json(&body).await;
    resp.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn generate_client_patches_the_sentinel_slot() {
    let templates = TemplateDir::new().await;

    // Template: prefix + sentinel slot + suffix.
    let mut template = vec![0x7fu8; 700];
    template.extend_from_slice(&[0x19u8; SLOT_SIZE]);
    template.extend_from_slice(&[0x2au8; 500]);
    templates.write_template("windows_amd64", &template).await;

    let server = test_server(templates.built_path());
    let resp = server.post("/api/client/generate").json(&generate_body("windows")).await;
    resp.assert_status(StatusCode::OK);

    let disposition = resp
        .headers()
        .get("Content-Disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(disposition.contains("client.exe"));

    let body = resp.as_bytes().to_vec();
    assert_eq!(body.len(), template.len());
    assert_eq!(&body[..700], &template[..700]);
    assert_eq!(&body[700 + SLOT_SIZE..], &template[700 + SLOT_SIZE..]);

    // The slot now decodes into the submitted connection settings.
    let slot = &body[700..700 + SLOT_SIZE];
    let total = u16::from_be_bytes([slot[0], slot[1]]) as usize;
    assert!(total > 18 && total <= SLOT_SIZE);
    let key = &slot[2..18];
    let opened = crypto::dec_aes(&slot[18..total], key).expect("open slot");
    let config: serde_json::Value = serde_json::from_slice(&opened).expect("config json");
    assert_eq!(config["host"], "hub.example.com");
    assert_eq!(config["port"], 443);
    assert_eq!(config["secure"], true);
    assert_eq!(config["uuid"].as_str().map(str::len), Some(32));
}

#[tokio::test]
async fn update_with_stale_commit_requires_session_auth() {
    let templates = TemplateDir::new().await;
    templates.write_template("linux_amd64", &[0u8; 1024]).await;
    let server = test_server(templates.built_path());

    let resp = server
        .get("/api/client/update?os=linux&arch=amd64&commit=stale")
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_rejects_oversized_config_block() {
    let templates = TemplateDir::new().await;
    templates.write_template("linux_amd64", &[0u8; 1024]).await;
    let server = test_server(templates.built_path());

    let resp = server
        .post("/api/client/update?os=linux&arch=amd64&commit=stale")
        .bytes(vec![0u8; SLOT_SIZE + 1].into())
        .await;
    resp.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
}
