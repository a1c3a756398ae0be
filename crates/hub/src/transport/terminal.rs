// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator terminal sub-sessions.
//!
//! Each operator websocket gets a terminal record bound to one device. Raw
//! keystroke frames (op 0) are event-id-stamped and forwarded verbatim; op 1
//! carries XOR-wrapped JSON control packets that are re-issued to the device
//! under the strong cipher. Device-side traffic comes back through the
//! correlator wrapper registered under the terminal's UUID.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use crate::crypto;
use crate::events::{EventCallback, EventHit};
use crate::packet::{Act, Packet, TerminalInputPayload, TerminalOutputPayload, TerminalRef, TerminalResizePayload};
use crate::session::{next_message, Session, MAX_MESSAGE_SIZE};
use crate::state::HubState;
use crate::transport::ws_device;

pub type TerminalSession = Session<Arc<TerminalRecord>>;

/// A live operator terminal bound to a device. The device session is looked
/// up by connection UUID at send time, never retained.
pub struct TerminalRecord {
    pub uuid: String,
    pub device_id: String,
    pub device_conn: String,
}

/// Query half of the sub-session handshake, shared with the desktop channel.
#[derive(Debug, Deserialize)]
pub struct SubQuery {
    pub secret: String,
    pub device: String,
}

impl SubQuery {
    /// The sub-session secret: exactly 32 hex chars (16 bytes).
    pub fn secret_bytes(&self) -> Option<Vec<u8>> {
        if self.secret.len() != 32 {
            return None;
        }
        hex::decode(&self.secret).ok()
    }
}

/// `ANY /api/device/terminal?device=<id>&secret=<32hex>`
pub async fn init_terminal(
    State(state): State<Arc<HubState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<SubQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(ws) = ws.ok() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(secret) = query.secret_bytes() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.devices.find_by_id(&query.device).is_none() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let addr = ws_device::real_ip(&headers, peer);
    ws.max_message_size(MAX_MESSAGE_SIZE).on_upgrade(move |socket| async move {
        let (session, mut stream) = state.terminal_hub.adopt(socket, secret, addr);

        if on_connect(&state, &session, &query.device).is_some() {
            while let Some(msg) = next_message(&session, &mut stream).await {
                let data = match msg {
                    Message::Binary(b) => b.to_vec(),
                    Message::Text(t) => t.as_bytes().to_vec(),
                    _ => continue,
                };
                on_message(&state, &session, data);
                if session.is_closed() {
                    break;
                }
            }
        }

        on_disconnect(&state, &session);
    })
}

/// Bind a fresh terminal record into the correlator and kick the device.
fn on_connect(
    state: &Arc<HubState>,
    session: &Arc<TerminalSession>,
    device_id: &str,
) -> Option<Arc<TerminalRecord>> {
    let Some(device_conn) = state.devices.find_by_id(device_id) else {
        send_pack(&Packet::act(Act::Warn).with_msg("device not exist"), session);
        session.close();
        return None;
    };
    let Some(device_session) = state.device_hub.get(&device_conn) else {
        send_pack(&Packet::act(Act::Warn).with_msg("device not exist"), session);
        session.close();
        return None;
    };

    let record = Arc::new(TerminalRecord {
        uuid: crypto::new_id_hex(),
        device_id: device_id.to_owned(),
        device_conn: device_conn.clone(),
    });
    session.set_attachment(Some(Arc::clone(&record)));

    state.events.add_event(
        event_wrapper(Arc::clone(state), Arc::clone(session), Arc::clone(&record)),
        &device_conn,
        &record.uuid,
    );
    ws_device::send_pack(
        &Packet::act(Act::TerminalInit)
            .with_data(&TerminalRef { terminal: record.uuid.clone() })
            .with_event(&record.uuid),
        &device_session,
    );
    info!(terminal = %record.uuid, device = %record.device_id, "terminal session opened");
    Some(record)
}

/// Device → operator direction, dispatched by the correlator.
fn event_wrapper(
    state: Arc<HubState>,
    operator: Arc<TerminalSession>,
    record: Arc<TerminalRecord>,
) -> EventCallback {
    Arc::new(move |hit: &EventHit<'_>| {
        let mut pack = hit.packet.clone();

        if pack.act == Some(Act::RawDataArrive) {
            let Some(raw) = hit.raw else { return };
            if raw.len() < 8 {
                return;
            }
            if raw[5] == 0 {
                // Framed terminal output, forwarded byte-for-byte.
                let _ = operator.write_binary(raw.to_vec());
                return;
            }
            if raw[5] != 1 {
                return;
            }
            let mut body = raw[8..].to_vec();
            let Some(device) = hit.session else { return };
            crypto::xor_stream(&mut body, &device.secret);
            match Packet::from_json(&body) {
                Ok(parsed) => pack = parsed,
                Err(_) => return,
            }
        }

        match pack.act {
            Some(Act::TerminalInit) => {
                if pack.code != 0 {
                    let msg = match pack.msg.as_deref() {
                        Some(m) if !m.is_empty() => format!("terminal session failed: {m}"),
                        _ => "terminal session failed: unknown error".to_owned(),
                    };
                    send_pack(&Packet::act(Act::Quit).with_msg(&msg), &operator);
                    state.events.remove_event(&record.uuid, false);
                    operator.close();
                    warn!(terminal = %record.uuid, %msg, "terminal init failed");
                } else {
                    info!(terminal = %record.uuid, "terminal init ok");
                }
            }
            Some(Act::TerminalQuit) => {
                let msg = match pack.msg.as_deref() {
                    Some(m) if !m.is_empty() => m.to_owned(),
                    _ => "terminal session closed".to_owned(),
                };
                send_pack(&Packet::act(Act::Quit).with_msg(&msg), &operator);
                state.events.remove_event(&record.uuid, false);
                operator.close();
                info!(terminal = %record.uuid, %msg, "terminal quit");
            }
            Some(Act::TerminalOutput) => {
                if let Some(payload) = pack.parse_data::<TerminalOutputPayload>() {
                    send_pack(
                        &Packet::act(Act::TerminalOutput).with_data(&payload),
                        &operator,
                    );
                }
            }
            _ => {}
        }
    })
}

/// Operator → device direction.
fn on_message(state: &Arc<HubState>, session: &Arc<TerminalSession>, mut data: Vec<u8>) {
    let Some(record) = session.attachment() else { return };

    let frame = crypto::check_binary_frame(&data);
    let Some((crypto::SERVICE_TERMINAL, op)) = frame else {
        reject(session);
        return;
    };

    if op == 0 {
        session.touch();
        let Some(frame) = stamp_event_id(&data, &record.uuid) else { return };
        if let Some(device) = state.device_hub.get(&record.device_conn) {
            let _ = device.write_binary(frame);
        }
        return;
    }
    if op != 1 || data.len() < 8 {
        reject(session);
        return;
    }

    let mut body = data.split_off(8);
    crypto::xor_stream(&mut body, &session.secret);
    let Ok(pack) = Packet::from_json(&body) else {
        reject(session);
        return;
    };
    session.touch();

    match pack.act {
        Some(Act::TerminalInput) => {
            if let Some(payload) = pack.parse_data::<TerminalInputPayload>() {
                info!(
                    terminal = %record.uuid,
                    bytes = payload.input.len() / 2,
                    "terminal input"
                );
                ws_device::send_pack_by_uuid(
                    state,
                    &Packet::act(Act::TerminalInput)
                        .with_data(&TerminalInputPayload {
                            input: payload.input,
                            terminal: Some(record.uuid.clone()),
                        })
                        .with_event(&record.uuid),
                    &record.device_conn,
                );
            }
        }
        Some(Act::TerminalResize) => {
            if let Some(payload) = pack.parse_data::<TerminalResizePayload>() {
                ws_device::send_pack_by_uuid(
                    state,
                    &Packet::act(Act::TerminalResize)
                        .with_data(&TerminalResizePayload {
                            cols: payload.cols,
                            rows: payload.rows,
                            terminal: Some(record.uuid.clone()),
                        })
                        .with_event(&record.uuid),
                    &record.device_conn,
                );
            }
        }
        Some(Act::TerminalKill) => {
            info!(terminal = %record.uuid, "terminal kill");
            ws_device::send_pack_by_uuid(
                state,
                &Packet::act(Act::TerminalKill)
                    .with_data(&TerminalRef { terminal: record.uuid.clone() })
                    .with_event(&record.uuid),
                &record.device_conn,
            );
        }
        Some(Act::Ping) => {
            ws_device::send_pack_by_uuid(
                state,
                &Packet::act(Act::TerminalPing)
                    .with_data(&TerminalRef { terminal: record.uuid.clone() })
                    .with_event(&record.uuid),
                &record.device_conn,
            );
        }
        _ => session.close(),
    }
}

/// Insert the sub-session's 16-byte event id at bytes 6..22, shifting the
/// original payload right. The device routes the frame by this id.
fn stamp_event_id(data: &[u8], uuid_hex: &str) -> Option<Vec<u8>> {
    if data.len() < 6 {
        return None;
    }
    let raw_event = hex::decode(uuid_hex).ok()?;
    if raw_event.len() != 16 {
        return None;
    }
    let mut frame = Vec::with_capacity(data.len() + 16);
    frame.extend_from_slice(&data[..6]);
    frame.extend_from_slice(&raw_event);
    frame.extend_from_slice(&data[6..]);
    Some(frame)
}

fn reject(session: &Arc<TerminalSession>) {
    send_pack(&Packet::fail(-1, ""), session);
    session.close();
}

fn on_disconnect(state: &Arc<HubState>, session: &Arc<TerminalSession>) {
    info!(session = %session.uuid, "terminal session closed");
    if let Some(record) = session.attachment() {
        ws_device::send_pack_by_uuid(
            state,
            &Packet::act(Act::TerminalKill)
                .with_data(&TerminalRef { terminal: record.uuid.clone() })
                .with_event(&record.uuid),
            &record.device_conn,
        );
        state.events.remove_event(&record.uuid, false);
        session.set_attachment(None);
    }
    state.terminal_hub.unregister(&session.uuid);
    session.close();
}

/// Liveness probe from the shared reaper.
pub(crate) fn send_ping(session: &Arc<TerminalSession>) -> bool {
    send_pack(&Packet::act(Act::Ping), session)
}

/// XOR-wrap a packet with the operator sub-session secret.
fn send_pack(pack: &Packet, session: &Arc<TerminalSession>) -> bool {
    let Ok(mut json) = pack.to_json() else { return false };
    crypto::xor_stream(&mut json, &session.secret);
    session.write_binary(json).is_ok()
}

/// Close every terminal session bound to a device. Invoked from the device
/// hub on disconnect, never the other way around.
pub fn close_sessions_by_device(state: &Arc<HubState>, device_id: &str) {
    let mut doomed = Vec::new();
    state.terminal_hub.iter_cb(|_, session| {
        if let Some(record) = session.attachment() {
            if record.device_id == device_id {
                doomed.push(Arc::clone(session));
            }
        }
        true
    });
    for session in doomed {
        session.close();
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
