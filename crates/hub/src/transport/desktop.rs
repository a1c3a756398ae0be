// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator desktop-streaming sub-sessions.
//!
//! Image traffic never gets inspected: frame slices (op 0/1) and resolution
//! advisories (op 2) are forwarded to the operator byte-for-byte; only op 3
//! JSON control frames are unwrapped. Control packets toward the operator
//! carry the `[34,22,19,17,20,3]` prefix so the browser router can tell them
//! apart from the image stream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::crypto;
use crate::events::{EventCallback, EventHit};
use crate::packet::{Act, DesktopRef, Packet};
use crate::session::{next_message, Session, MAX_MESSAGE_SIZE};
use crate::state::HubState;
use crate::transport::terminal::SubQuery;
use crate::transport::ws_device;

pub type DesktopSession = Session<Arc<DesktopRecord>>;

/// Control-frame prefix toward the operator.
const CONTROL_PREFIX: [u8; 6] = [34, 22, 19, 17, 20, 3];

/// A live desktop stream bound to a device.
pub struct DesktopRecord {
    pub uuid: String,
    pub device_id: String,
    pub device_conn: String,
    /// Last resolution advertised by the device (op 2), if any.
    resolution: Mutex<Option<(u16, u16)>>,
}

impl DesktopRecord {
    pub fn resolution(&self) -> Option<(u16, u16)> {
        self.resolution.lock().ok().and_then(|r| *r)
    }

    fn advertise_resolution(&self, width: u16, height: u16) {
        if let Ok(mut slot) = self.resolution.lock() {
            *slot = Some((width, height));
        }
    }
}

/// `ANY /api/device/desktop?device=<id>&secret=<32hex>`
pub async fn init_desktop(
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
        let (session, mut stream) = state.desktop_hub.adopt(socket, secret, addr);

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

fn on_connect(
    state: &Arc<HubState>,
    session: &Arc<DesktopSession>,
    device_id: &str,
) -> Option<Arc<DesktopRecord>> {
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

    let record = Arc::new(DesktopRecord {
        uuid: crypto::new_id_hex(),
        device_id: device_id.to_owned(),
        device_conn: device_conn.clone(),
        resolution: Mutex::new(None),
    });
    session.set_attachment(Some(Arc::clone(&record)));

    state.events.add_event(
        event_wrapper(Arc::clone(state), Arc::clone(session), Arc::clone(&record)),
        &device_conn,
        &record.uuid,
    );
    ws_device::send_pack(
        &Packet::act(Act::DesktopInit)
            .with_data(&DesktopRef { desktop: record.uuid.clone() })
            .with_event(&record.uuid),
        &device_session,
    );
    info!(desktop = %record.uuid, device = %record.device_id, "desktop session opened");
    Some(record)
}

/// Device → operator direction, dispatched by the correlator.
fn event_wrapper(
    state: Arc<HubState>,
    operator: Arc<DesktopSession>,
    record: Arc<DesktopRecord>,
) -> EventCallback {
    Arc::new(move |hit: &EventHit<'_>| {
        let mut pack = hit.packet.clone();

        if pack.act == Some(Act::RawDataArrive) {
            let Some(raw) = hit.raw else { return };
            if raw.len() < 8 {
                return;
            }
            match raw[5] {
                0 | 1 => {
                    let _ = operator.write_binary(raw.to_vec());
                    return;
                }
                2 => {
                    // Resolution advisory; remember it, then forward
                    // untouched.
                    if let Some((width, height)) = parse_resolution_advisory(raw) {
                        record.advertise_resolution(width, height);
                    }
                    let _ = operator.write_binary(raw.to_vec());
                    return;
                }
                3 => {}
                _ => return,
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
            Some(Act::DesktopInit) => {
                if pack.code != 0 {
                    let msg = match pack.msg.as_deref() {
                        Some(m) if !m.is_empty() => format!("desktop session failed: {m}"),
                        _ => "desktop session failed: unknown error".to_owned(),
                    };
                    send_pack(&Packet::act(Act::Quit).with_msg(&msg), &operator);
                    state.events.remove_event(&record.uuid, false);
                    operator.close();
                    warn!(desktop = %record.uuid, %msg, "desktop init failed");
                } else {
                    info!(desktop = %record.uuid, "desktop init ok");
                }
            }
            Some(Act::DesktopQuit) => {
                let msg = match pack.msg.as_deref() {
                    Some(m) if !m.is_empty() => m.to_owned(),
                    _ => "desktop session closed".to_owned(),
                };
                send_pack(&Packet::act(Act::Quit).with_msg(&msg), &operator);
                state.events.remove_event(&record.uuid, false);
                operator.close();
                info!(desktop = %record.uuid, %msg, "desktop quit");
            }
            _ => {}
        }
    })
}

/// Width/height from a spliced op-2 advisory. The ingress splice has already
/// removed the event id, so the `[4:2][width:2][height:2]` body sits right
/// after the 2-byte length at byte 6.
fn parse_resolution_advisory(raw: &[u8]) -> Option<(u16, u16)> {
    if raw.len() < 12 {
        return None;
    }
    let width = u16::from_be_bytes([raw[8], raw[9]]);
    let height = u16::from_be_bytes([raw[10], raw[11]]);
    Some((width, height))
}

/// Operator → device direction: only op-3 control frames are legal.
fn on_message(state: &Arc<HubState>, session: &Arc<DesktopSession>, mut data: Vec<u8>) {
    let Some(record) = session.attachment() else { return };

    let frame = crypto::check_binary_frame(&data);
    let Some((crypto::SERVICE_DESKTOP, op)) = frame else {
        reject(session);
        return;
    };
    if op != 3 || data.len() < 8 {
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
        Some(Act::DesktopPing) => {
            forward(state, &record, Act::DesktopPing);
        }
        Some(Act::DesktopKill) => {
            info!(desktop = %record.uuid, "desktop kill");
            forward(state, &record, Act::DesktopKill);
        }
        Some(Act::DesktopShot) => {
            forward(state, &record, Act::DesktopShot);
        }
        _ => session.close(),
    }
}

fn forward(state: &Arc<HubState>, record: &Arc<DesktopRecord>, act: Act) {
    ws_device::send_pack_by_uuid(
        state,
        &Packet::act(act)
            .with_data(&DesktopRef { desktop: record.uuid.clone() })
            .with_event(&record.uuid),
        &record.device_conn,
    );
}

fn reject(session: &Arc<DesktopSession>) {
    send_pack(&Packet::fail(-1, ""), session);
    session.close();
}

fn on_disconnect(state: &Arc<HubState>, session: &Arc<DesktopSession>) {
    info!(session = %session.uuid, "desktop session closed");
    if let Some(record) = session.attachment() {
        ws_device::send_pack_by_uuid(
            state,
            &Packet::act(Act::DesktopKill)
                .with_data(&DesktopRef { desktop: record.uuid.clone() })
                .with_event(&record.uuid),
            &record.device_conn,
        );
        state.events.remove_event(&record.uuid, false);
        session.set_attachment(None);
    }
    state.desktop_hub.unregister(&session.uuid);
    session.close();
}

/// Liveness probe from the shared reaper.
pub(crate) fn send_ping(session: &Arc<DesktopSession>) -> bool {
    send_pack(&Packet::act(Act::Ping), session)
}

/// Prefix + XOR-wrap a control packet toward the operator.
fn send_pack(pack: &Packet, session: &Arc<DesktopSession>) -> bool {
    let Ok(mut json) = pack.to_json() else { return false };
    crypto::xor_stream(&mut json, &session.secret);
    let mut framed = Vec::with_capacity(CONTROL_PREFIX.len() + json.len());
    framed.extend_from_slice(&CONTROL_PREFIX);
    framed.extend_from_slice(&json);
    session.write_binary(framed).is_ok()
}

/// Close every desktop session bound to a device, telling each operator why.
pub fn close_sessions_by_device(state: &Arc<HubState>, device_id: &str) {
    let mut doomed = Vec::new();
    state.desktop_hub.iter_cb(|_, session| {
        if let Some(record) = session.attachment() {
            if record.device_id == device_id {
                send_pack(&Packet::act(Act::Quit).with_msg("desktop session closed"), session);
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
#[path = "desktop_tests.rs"]
mod tests;
