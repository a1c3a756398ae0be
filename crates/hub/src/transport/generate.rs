// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client installer personalization.
//!
//! Prebuilt client binaries carry a 384-byte configuration slot filled with
//! the byte 0x19. Generation seals the connection config into that slot and
//! streams the patched template; the update endpoint re-patches a template
//! with the client's current slot contents.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::config::SALT_PAD;
use crate::crypto;
use crate::error::HubError;
use crate::packet::Packet;
use crate::state::HubState;
use crate::transport::http::AnyForm;

/// Size of the sentinel slot inside prebuilt binaries.
const SLOT_SIZE: usize = 384;
/// Window size for the streaming patch.
const PATCH_WINDOW: usize = 1024;

/// Connection settings sealed into a client binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClientConfig {
    secure: bool,
    host: String,
    port: u16,
    path: String,
    uuid: String,
    key: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: String,
}

impl GenerateForm {
    fn validate(&self) -> bool {
        !self.os.is_empty()
            && !self.arch.is_empty()
            && !self.host.is_empty()
            && self.port != 0
            && !self.path.is_empty()
    }
}

/// `POST /api/client/check` — can a client be produced for this target?
pub async fn check_client(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<GenerateForm>,
) -> Response {
    if !form.validate() {
        return HubError::BadRequest.response();
    }
    let template = state.config.template_path(&form.os, &form.arch);
    if tokio::fs::metadata(&template).await.is_err() {
        return HubError::NotFound.response_msg("no prebuilt client found");
    }

    // Probe with maximum-width identity fields.
    let probe = ClientConfig {
        secure: form.secure == "true",
        host: form.host,
        port: form.port,
        path: form.path,
        uuid: "FF".repeat(16),
        key: "FF".repeat(32),
    };
    match seal_config(&probe) {
        Ok(_) => Json(Packet::ok()).into_response(),
        Err(HubError::PayloadTooLarge) => {
            HubError::PayloadTooLarge.response_msg("config too large")
        }
        Err(_) => HubError::Internal.response_msg("config generation failed"),
    }
}

/// `POST /api/client/generate` — mint an identity, seal the config, stream
/// the patched binary.
pub async fn generate_client(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<GenerateForm>,
) -> Response {
    if !form.validate() {
        return HubError::BadRequest.response();
    }
    let template = state.config.template_path(&form.os, &form.arch);
    let Ok(meta) = tokio::fs::metadata(&template).await else {
        return HubError::NotFound.response_msg("no prebuilt client found");
    };

    let client_uuid = crypto::new_id();
    let Ok(client_key) = crypto::enc_aes(&client_uuid, &state.salt) else {
        return HubError::Internal.response_msg("config generation failed");
    };
    let config = ClientConfig {
        secure: form.secure == "true",
        host: form.host.clone(),
        port: form.port,
        path: form.path.clone(),
        uuid: hex::encode(client_uuid),
        key: hex::encode(&client_key),
    };
    let slot = match seal_config(&config) {
        Ok(slot) => slot,
        Err(HubError::PayloadTooLarge) => {
            return HubError::PayloadTooLarge.response_msg("config too large")
        }
        Err(_) => return HubError::Internal.response_msg("config generation failed"),
    };

    info!(os = %form.os, arch = %form.arch, host = %form.host, "client generated");

    let filename = if form.os == "windows" { "client.exe" } else { "client" };
    let mut response = stream_patched(template, slot).await;
    let headers = response.headers_mut();
    set(headers, "Accept-Ranges", "none");
    set(headers, "Content-Transfer-Encoding", "binary");
    set(headers, "Content-Type", "application/octet-stream");
    set(headers, "Content-Length", &meta.len().to_string());
    set(
        headers,
        "Content-Disposition",
        &format!("attachment; filename={filename}; filename*=UTF-8''{filename}"),
    );
    response
}

#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub commit: String,
}

/// `ANY /api/client/update` — client-driven self-update, authenticated by a
/// live session secret. The client ships its current config slot as the
/// request body; the fresh binary is patched with it unchanged.
pub async fn check_update(
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Query(form): Query<UpdateForm>,
    body: Bytes,
) -> Response {
    if form.os.is_empty() || form.arch.is_empty() || form.commit.is_empty() {
        return HubError::BadRequest.response();
    }
    // Exact equality; there is no version ordering.
    if form.commit == state.config.commit {
        return Json(Packet::ok()).into_response();
    }

    let template = state.config.template_path(&form.os, &form.arch);
    let Ok(meta) = tokio::fs::metadata(&template).await else {
        warn!(os = %form.os, arch = %form.arch, "update requested without prebuilt asset");
        return HubError::NotFound.response_msg("no prebuilt client found");
    };
    if body.len() > SLOT_SIZE {
        return (StatusCode::PAYLOAD_TOO_LARGE, Json(Packet::fail(1, "config too large")))
            .into_response();
    }
    if find_session_secret(&state, &headers).is_none() {
        return (StatusCode::UNAUTHORIZED, Json(Packet::fail(1, "unauthorized")))
            .into_response();
    }

    info!(os = %form.os, arch = %form.arch, commit = %form.commit, "client updating");

    let mut response = stream_patched(template, body.to_vec()).await;
    let headers = response.headers_mut();
    set(headers, "Commit", &state.config.commit);
    set(headers, "Accept-Ranges", "none");
    set(headers, "Content-Transfer-Encoding", "binary");
    set(headers, "Content-Type", "application/octet-stream");
    if body.len() == SLOT_SIZE {
        set(headers, "Content-Length", &meta.len().to_string());
    }
    response
}

fn find_session_secret(state: &HubState, headers: &HeaderMap) -> Option<()> {
    let raw = headers.get("Secret").and_then(|v| v.to_str().ok())?;
    let secret = hex::decode(raw).ok()?;
    if secret.len() != 32 {
        return None;
    }
    let mut found = None;
    state.device_hub.iter_cb(|_, session| {
        if session.secret == secret {
            found = Some(());
            return false;
        }
        true
    });
    found
}

/// Seal a config into the fixed slot:
/// `[len:2 BE][key:16][enc_aes(json, key)][random pad]`, 384 bytes total.
/// The length field counts itself, the key, and the ciphertext.
fn seal_config(config: &ClientConfig) -> Result<Vec<u8>, HubError> {
    let json = serde_json::to_vec(config).map_err(|_| HubError::Internal)?;
    let key = crypto::new_id();
    let sealed = crypto::enc_aes(&json, &key).map_err(|_| HubError::Internal)?;

    let mut payload = Vec::with_capacity(16 + sealed.len());
    payload.extend_from_slice(&key);
    payload.extend_from_slice(&sealed);
    if payload.len() > SLOT_SIZE - 2 {
        return Err(HubError::PayloadTooLarge);
    }

    let total = (payload.len() + 2) as u16;
    let mut slot = Vec::with_capacity(SLOT_SIZE);
    slot.extend_from_slice(&total.to_be_bytes());
    slot.extend_from_slice(&payload);
    while slot.len() < SLOT_SIZE {
        slot.extend_from_slice(&crypto::new_id());
    }
    slot.truncate(SLOT_SIZE);
    Ok(slot)
}

/// Stream the template, replacing every 384-byte 0x19 sentinel run with the
/// given block. Windows of 1 KiB with a carry buffer; the replacement is
/// length-preserving only when the block is slot-sized.
async fn stream_patched(template: String, block: Vec<u8>) -> Response {
    let file = match tokio::fs::File::open(&template).await {
        Ok(file) => file,
        Err(_) => return HubError::NotFound.response_msg("no prebuilt client found"),
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    tokio::spawn(async move {
        let sentinel = vec![SALT_PAD; SLOT_SIZE];
        let mut file = file;
        let mut prev: Vec<u8> = Vec::new();
        loop {
            let mut chunk = vec![0u8; PATCH_WINDOW];
            let n = match file.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            chunk.truncate(n);

            let mut temp = prev.clone();
            temp.extend_from_slice(&chunk);
            temp = replace_all(temp, &sentinel, &block);

            let emit = prev.len().min(temp.len());
            if emit > 0 && tx.send(Ok(Bytes::copy_from_slice(&temp[..emit]))).await.is_err() {
                return;
            }
            prev = temp.split_off(emit);

            if n == 0 {
                break;
            }
        }
        if !prev.is_empty() {
            let _ = tx.send(Ok(Bytes::from(prev))).await;
        }
    });

    Response::new(Body::from_stream(ReceiverStream::new(rx)))
}

fn replace_all(mut data: Vec<u8>, needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut searched_from = 0;
    while let Some(pos) = find(&data[searched_from..], needle) {
        let at = searched_from + pos;
        data.splice(at..at + needle.len(), replacement.iter().copied());
        searched_from = at + replacement.len();
    }
    data
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = value.parse() {
        headers.insert(name, value);
    }
}

#[cfg(test)]
#[path = "generate_tests.rs"]
mod tests;
