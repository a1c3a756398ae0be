// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the hub.

pub mod auth;
pub mod bridge;
pub mod desktop;
pub mod generate;
pub mod http;
pub mod terminal;
pub mod ws_device;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{any, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::HubState;

/// Build the axum `Router` with every hub route.
pub fn build_router(state: Arc<HubState>) -> Router {
    Router::new()
        // Device channel (websocket upgrade + oversize HTTP fallback)
        .route("/ws", any(ws_device::device_channel))
        // Streaming rendezvous — authenticated by bridge id possession
        .route("/api/bridge/push", any(bridge::bridge_push))
        .route("/api/bridge/pull", any(bridge::bridge_pull))
        // Client self-update — authenticated by session secret
        .route("/api/client/update", any(generate::check_update))
        // Operator surface
        .route("/api/device/list", post(http::list_devices))
        .route("/api/device/exec", post(http::exec_command))
        .route("/api/device/screenshot/get", post(http::get_screenshot))
        .route("/api/device/process/list", post(http::list_processes))
        .route("/api/device/process/kill", post(http::kill_process))
        .route("/api/device/file/list", post(http::list_files))
        .route("/api/device/file/remove", post(http::remove_files))
        .route("/api/device/file/upload", post(http::upload_file))
        .route("/api/device/file/text", post(http::get_text_file))
        .route("/api/device/file/get", post(http::get_files))
        .route("/api/device/terminal", any(terminal::init_terminal))
        .route("/api/device/desktop", any(desktop::init_desktop))
        .route("/api/device/{act}", post(http::call_device))
        .route("/api/client/check", post(generate::check_client))
        .route("/api/client/generate", post(generate::generate_client))
        // Middleware
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
