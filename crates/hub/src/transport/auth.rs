// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator authentication interface.
//!
//! The surrounding deployment may front this with its own login/brute-force
//! middleware; the core only enforces the configured Basic credentials and
//! stamps operator activity for the device ping cadence. The device channel,
//! bridge endpoints, and client self-update bypass this layer — each carries
//! its own authentication.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256, Sha512};
use tracing::warn;

use crate::packet::Packet;
use crate::state::HubState;

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Hash a presented password per the configured algorithm tag, then compare
/// against the stored value.
pub fn verify_password(presented: &str, stored: &str, algo: &str) -> bool {
    let computed = match algo {
        "sha256" => hex::encode(Sha256::digest(presented.as_bytes())),
        "sha512" => hex::encode(Sha512::digest(presented.as_bytes())),
        _ => presented.to_owned(),
    };
    constant_time_eq(&computed, stored)
}

/// Check an `Authorization: Basic` header against the configured operator
/// credentials.
pub fn validate_basic(header: Option<&str>, state: &HubState) -> bool {
    let (Some(user), Some(pass)) = (&state.config.auth_user, &state.config.auth_pass) else {
        return true;
    };
    let Some(header) = header else { return false };
    let Some(encoded) = header.strip_prefix("Basic ") else { return false };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else { return false };
    let Ok(decoded) = String::from_utf8(decoded) else { return false };
    let Some((presented_user, presented_pass)) = decoded.split_once(':') else {
        return false;
    };
    constant_time_eq(presented_user, user)
        && verify_password(presented_pass, pass, &state.config.auth_algo)
}

/// Axum middleware guarding the operator surface.
pub async fn auth_layer(
    State(state): State<Arc<HubState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();

    // Device-facing paths authenticate themselves.
    if path == "/ws" || path.starts_with("/api/bridge/") || path == "/api/client/update" {
        return next.run(req).await;
    }

    if !state.config.auth_enabled() {
        state.touch_request();
        return next.run(req).await;
    }

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if !validate_basic(header.as_deref(), &state) {
        warn!(%path, "operator auth failed");
        let mut response =
            (StatusCode::UNAUTHORIZED, Json(Packet::fail(1, "unauthorized"))).into_response();
        if let Ok(value) = "Basic realm=\"tether\"".parse() {
            response.headers_mut().insert("WWW-Authenticate", value);
        }
        return response;
    }

    state.touch_request();
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
