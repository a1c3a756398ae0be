// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device channel: authenticated handshake on `/ws`, encrypted JSON
//! packets, the raw binary fast path toward terminal/desktop wrappers, and
//! the oversize HTTP fallback on the same path.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{info, warn};

use crate::crypto;
use crate::packet::{Act, Packet};
use crate::session::{
    next_message, DeviceSession, CLOSE_INVALID_DEVICE, CLOSE_INVALID_REQUEST, MAX_MESSAGE_SIZE,
};
use crate::state::HubState;
use crate::transport::{desktop, terminal};

/// Ceiling for the non-websocket fallback body.
const MAX_FALLBACK_BODY: usize = 2 << 18;

/// `ANY /ws` — device websocket handshake, or the HTTP fallback for messages
/// exceeding the websocket frame limit.
pub async fn device_channel(
    State(state): State<Arc<HubState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    body: Bytes,
) -> Response {
    let Some(ws) = ws.ok() else {
        return fallback_ingress(&state, &headers, body).await;
    };

    // Handshake: Key must be the bootstrap-sealed UUID.
    let client_uuid = decode_hex_header(&headers, "UUID", 16);
    let client_key = decode_hex_header(&headers, "Key", 32);
    let (Some(client_uuid), Some(client_key)) = (client_uuid, client_key) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match crypto::dec_aes(&client_key, &state.salt) {
        Ok(plain) if plain == client_uuid => {}
        _ => return StatusCode::UNAUTHORIZED.into_response(),
    }

    let mut secret = Vec::with_capacity(32);
    secret.extend_from_slice(&crypto::new_id());
    secret.extend_from_slice(&crypto::new_id());
    let secret_hex = hex::encode(&secret);

    let addr = real_ip(&headers, peer);
    let mut response = ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            let (session, mut stream) = state.device_hub.adopt(socket, secret, addr);
            ping_device(&state, &session);

            while let Some(msg) = next_message(&session, &mut stream).await {
                match msg {
                    // The device channel is binary-only.
                    Message::Text(_) => {
                        session.close();
                        break;
                    }
                    Message::Binary(data) => {
                        device_ingress(&state, &session, data.to_vec());
                        if session.is_closed() {
                            break;
                        }
                    }
                    _ => {}
                }
            }

            on_disconnect(&state, &session);
        });
    if let Ok(value) = secret_hex.parse() {
        response.headers_mut().insert("Secret", value);
    }
    response
}

/// Oversize-message fallback: POST the raw encrypted body with a `Secret`
/// header matching a live session.
async fn fallback_ingress(state: &Arc<HubState>, headers: &HeaderMap, body: Bytes) -> Response {
    if body.len() > MAX_FALLBACK_BODY {
        return (StatusCode::PAYLOAD_TOO_LARGE, Json(Packet::fail(1, "payload too large")))
            .into_response();
    }
    let Some(secret) = decode_hex_header(headers, "Secret", 32) else {
        return (StatusCode::UNAUTHORIZED, Json(Packet::fail(1, "unauthorized"))).into_response();
    };
    let Some(session) = find_session_by_secret(state, &secret) else {
        return (StatusCode::UNAUTHORIZED, Json(Packet::fail(1, "unauthorized"))).into_response();
    };

    device_ingress(state, &session, body.to_vec());
    Json(Packet::ok()).into_response()
}

/// Locate the device session whose stored secret matches.
fn find_session_by_secret(state: &HubState, secret: &[u8]) -> Option<Arc<DeviceSession>> {
    let mut found = None;
    state.device_hub.iter_cb(|_, session| {
        if session.secret == secret {
            found = Some(Arc::clone(session));
            return false;
        }
        true
    });
    found
}

/// Single ingress point for device-origin bytes, from the socket or the
/// fallback path.
pub fn device_ingress(state: &Arc<HubState>, session: &Arc<DeviceSession>, mut data: Vec<u8>) {
    // Raw fast path: spliced straight to the sub-session wrapper keyed by the
    // embedded event id. Desktop carries ops 0..=3, terminal 0..=1.
    if data.len() > 24 {
        if let Some((service, op)) = crypto::check_binary_frame(&data) {
            let routable = matches!(
                (service, op),
                (crypto::SERVICE_DESKTOP, 0..=3) | (crypto::SERVICE_TERMINAL, 0..=1)
            );
            if routable {
                let trigger = hex::encode(&data[6..22]);
                // Splice the event id out: the wrapper sees magic+service+op,
                // then the length and body.
                data.copy_within(22.., 6);
                data.truncate(data.len() - 16);
                let pack = Packet::act(Act::RawDataArrive).with_event(&trigger);
                state.events.call_event_raw(&pack, &data, Some(session));
            }
            return;
        }
    }

    let pack = crypto::decrypt(&data, &session.secret)
        .ok()
        .and_then(|plain| Packet::from_json(&plain).ok());
    let Some(pack) = pack else {
        send_pack(&Packet::fail(-1, ""), session);
        session.close_with(CLOSE_INVALID_REQUEST, "invalid request");
        return;
    };

    match pack.act {
        Some(Act::DeviceUp) | Some(Act::DeviceUpdate) => {
            session.touch();
            on_device_pack(state, &pack, session);
        }
        _ => {
            if !state.devices.has(&session.uuid) {
                session.close_with(CLOSE_INVALID_DEVICE, "invalid device id");
                return;
            }
            state.events.call_event(&pack, Some(session));
            session.touch();
        }
    }
}

/// DEVICE_UP / DEVICE_UPDATE: register or refresh the device behind this
/// session, keeping at most one live session per device identity.
fn on_device_pack(state: &Arc<HubState>, pack: &Packet, session: &Arc<DeviceSession>) {
    let mut device = pack.parse_data::<crate::device::Device>().unwrap_or_default();
    device.wan = if session.addr.is_empty() { "Unknown".to_owned() } else { session.addr.clone() };

    if pack.act == Some(Act::DeviceUp) {
        // Evict whichever session currently holds this device id.
        if let Some(existing) = state.devices.find_by_id(&device.id) {
            if let Some(older) = state.device_hub.get(&existing) {
                send_pack(&Packet::act(Act::Offline), &older);
                older.close();
            }
            state.devices.unregister(&existing);
        }
        info!(
            device = %device.id,
            hostname = %device.hostname,
            ip = %device.wan,
            "client online"
        );
        state.devices.register(session.uuid.clone(), device);
    } else {
        state.devices.update_metrics(&session.uuid, &device);
    }
    send_pack(&Packet::ok(), session);
}

fn on_disconnect(state: &Arc<HubState>, session: &Arc<DeviceSession>) {
    if let Some(shared) = state.devices.get(&session.uuid) {
        let (id, hostname, wan) = match shared.read() {
            Ok(d) => (d.id.clone(), d.hostname.clone(), d.wan.clone()),
            Err(_) => Default::default(),
        };
        terminal::close_sessions_by_device(state, &id);
        desktop::close_sessions_by_device(state, &id);
        info!(device = %id, hostname = %hostname, ip = %wan, "client offline");
    } else {
        info!(ip = %session.addr, "client offline");
    }
    state.devices.unregister(&session.uuid);
    state.events.remove_events_for_conn(&session.uuid);
    state.device_hub.unregister(&session.uuid);
    session.close();
}

/// Strong-encrypt a packet with the session secret and enqueue it.
pub fn send_pack(pack: &Packet, session: &Arc<DeviceSession>) -> bool {
    let Ok(json) = pack.to_json() else { return false };
    let Ok(sealed) = crypto::encrypt(&json, &session.secret) else { return false };
    session.write_binary(sealed).is_ok()
}

pub fn send_pack_by_uuid(state: &HubState, pack: &Packet, conn_uuid: &str) -> bool {
    match state.device_hub.get(conn_uuid) {
        Some(session) => send_pack(pack, &session),
        None => false,
    }
}

/// One latency probe: PING with a one-shot trigger, half the round trip.
pub fn ping_device(state: &Arc<HubState>, session: &Arc<DeviceSession>) {
    let trigger = crypto::new_id_hex();
    let started = std::time::Instant::now();
    if !send_pack(&Packet::act(Act::Ping).with_event(&trigger), session) {
        warn!(session = %session.uuid, "ping enqueue failed");
        return;
    }

    let state = Arc::clone(state);
    let conn_uuid = session.uuid.clone();
    tokio::spawn(async move {
        let registry = Arc::clone(&state);
        let target = conn_uuid.clone();
        let cb: crate::events::EventCallback = Arc::new(move |_| {
            let latency = started.elapsed().as_millis() as u64 / 2;
            registry.devices.set_latency(&target, latency);
        });
        state
            .events
            .add_event_once(cb, &conn_uuid, &trigger, std::time::Duration::from_secs(3))
            .await;
    });
}

fn decode_hex_header(headers: &HeaderMap, name: &str, want_len: usize) -> Option<Vec<u8>> {
    let raw = headers.get(name)?.to_str().ok()?;
    let bytes = hex::decode(raw).ok()?;
    (bytes.len() == want_len).then_some(bytes)
}

/// Peer WAN address: proxy headers win when the socket peer is loopback.
pub fn real_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if peer.ip().is_loopback() {
        for name in ["X-Forwarded-For", "X-Real-IP"] {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                if !value.is_empty() {
                    return value.to_owned();
                }
            }
        }
    }
    peer.ip().to_string()
}
