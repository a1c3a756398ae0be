// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator command endpoints.
//!
//! Every endpoint follows one shape: resolve the target device (`uuid` or
//! `device` in the form), mint a trigger, send the command packet over the
//! device session, and wait on a one-shot event with session affinity and a
//! 5 s timeout. Streaming commands additionally allocate a bridge and settle
//! the operator response from its hooks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::crypto;
use crate::error::HubError;
use crate::events::EventCallback;
use crate::packet::{
    Act, CommandExecPayload, FilesFetchPayload, FilesListPayload, FilesRemovePayload,
    FilesUploadPayload, FileTextPayload, Packet, ProcessKillPayload,
};
use crate::state::HubState;
use crate::transport::bridge::{dst_end, ResponseHead, SrcEnd};
use crate::transport::ws_device;

/// Reply window for a dispatched device command.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// -- Form plumbing ------------------------------------------------------------

/// Accepts JSON bodies, urlencoded bodies, or bare query strings — operator
/// clients use all three.
pub struct AnyForm<T>(pub T);

impl<S, T> FromRequest<S> for AnyForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + 'static,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        if content_type.starts_with("application/json") {
            return Json::<T>::from_request(req, state)
                .await
                .map(|Json(v)| AnyForm(v))
                .map_err(|_| HubError::BadRequest.response());
        }
        if content_type.starts_with("application/x-www-form-urlencoded") {
            return Form::<T>::from_request(req, state)
                .await
                .map(|Form(v)| AnyForm(v))
                .map_err(|_| HubError::BadRequest.response());
        }
        Query::<T>::try_from_uri(req.uri())
            .map(|Query(v)| AnyForm(v))
            .map_err(|_| HubError::BadRequest.response())
    }
}

/// The target half every form carries: connection UUID or device id.
#[derive(Debug, Default, Deserialize)]
pub struct TargetForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
}

/// Resolve the connection UUID for a request, or fail 400/502.
fn resolve_target(state: &HubState, uuid: &str, device: &str) -> Result<String, Response> {
    if uuid.is_empty() && device.is_empty() {
        return Err(HubError::BadRequest.response());
    }
    state
        .devices
        .check_device(device, uuid)
        .ok_or_else(|| HubError::UnknownDevice.response())
}

// -- One-shot dispatch --------------------------------------------------------

enum Outcome {
    Reply(Packet),
    Timeout,
}

/// Send a command and wait for the correlated reply.
async fn dispatch(state: &Arc<HubState>, target: &str, pack: Packet) -> Outcome {
    let trigger = crypto::new_id_hex();
    ws_device::send_pack_by_uuid(state, &pack.with_event(&trigger), target);

    let slot: Arc<Mutex<Option<Packet>>> = Arc::new(Mutex::new(None));
    let cb: EventCallback = {
        let slot = Arc::clone(&slot);
        Arc::new(move |hit| {
            if let Ok(mut guard) = slot.lock() {
                *guard = Some(hit.packet.clone());
            }
        })
    };
    let ok = state.events.add_event_once(cb, target, &trigger, REPLY_TIMEOUT).await;
    let reply = slot.lock().ok().and_then(|mut guard| guard.take());
    match (ok, reply) {
        (true, Some(reply)) => Outcome::Reply(reply),
        _ => Outcome::Timeout,
    }
}

/// Collapse an outcome into the standard envelope: 200 on code 0 (forwarding
/// `data` when present), 500 with the device's message, 504 on silence.
fn respond(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Reply(reply) if reply.code == 0 => {
            let mut out = Packet::ok();
            out.data = reply.data;
            Json(out).into_response()
        }
        Outcome::Reply(reply) => {
            HubError::DeviceFailure.response_msg(reply.msg.unwrap_or_default())
        }
        Outcome::Timeout => HubError::DeviceTimeout.response(),
    }
}

// -- Plain command endpoints --------------------------------------------------

/// `POST /api/device/list`
pub async fn list_devices(State(state): State<Arc<HubState>>) -> Response {
    let mut pack = Packet::ok();
    pack.data = Some(state.devices.snapshot());
    Json(pack).into_response()
}

/// `POST /api/device/{act}` — lock/logoff/hibernate/suspend/restart/shutdown
/// and the explicit offline kick.
pub async fn call_device(
    State(state): State<Arc<HubState>>,
    Path(act): Path<String>,
    AnyForm(form): AnyForm<TargetForm>,
) -> Response {
    let act = act.to_uppercase();
    let allowed =
        ["LOCK", "LOGOFF", "HIBERNATE", "SUSPEND", "RESTART", "SHUTDOWN", "OFFLINE"];
    if !allowed.contains(&act.as_str()) {
        warn!(%act, "unsupported device action");
        return (StatusCode::BAD_REQUEST, Json(Packet::fail(1, "operation not supported")))
            .into_response();
    }
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match dispatch(&state, &target, Packet::act(Act::from(act.as_str()))).await {
        Outcome::Reply(reply) if reply.code != 0 => {
            warn!(%act, msg = reply.msg.as_deref().unwrap_or(""), "device action failed");
            HubError::DeviceFailure.response_msg(reply.msg.unwrap_or_default())
        }
        Outcome::Reply(_) => {
            info!(%act, device = %target, "device action ok");
            Json(Packet::ok()).into_response()
        }
        // An unreachable device cannot veto a power action; report success.
        Outcome::Timeout => {
            info!(%act, device = %target, "device action assumed (offline)");
            Json(Packet::ok()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub args: String,
}

/// `POST /api/device/exec`
pub async fn exec_command(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<ExecForm>,
) -> Response {
    if form.cmd.is_empty() {
        return HubError::BadRequest.response();
    }
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let pack = Packet::act(Act::CommandExec)
        .with_data(&CommandExecPayload { cmd: form.cmd.clone(), args: form.args.clone() });
    let outcome = dispatch(&state, &target, pack).await;
    if matches!(outcome, Outcome::Timeout) {
        warn!(cmd = %form.cmd, "command timed out");
    }
    respond(outcome)
}

/// `POST /api/device/process/list`
pub async fn list_processes(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<TargetForm>,
) -> Response {
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    respond(dispatch(&state, &target, Packet::act(Act::ProcessesList)).await)
}

#[derive(Debug, Deserialize)]
pub struct ProcessKillForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    pub pid: i64,
}

/// `POST /api/device/process/kill`
pub async fn kill_process(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<ProcessKillForm>,
) -> Response {
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let pack = Packet::act(Act::ProcessKill).with_data(&ProcessKillPayload { pid: form.pid });
    respond(dispatch(&state, &target, pack).await)
}

#[derive(Debug, Deserialize)]
pub struct FilesListForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    pub path: String,
}

/// `POST /api/device/file/list`
pub async fn list_files(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<FilesListForm>,
) -> Response {
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let pack = Packet::act(Act::FilesList).with_data(&FilesListPayload { path: form.path });
    respond(dispatch(&state, &target, pack).await)
}

#[derive(Debug, Deserialize)]
pub struct FilesRemoveForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// `POST /api/device/file/remove`
pub async fn remove_files(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<FilesRemoveForm>,
) -> Response {
    if form.files.is_empty() {
        return HubError::BadRequest.response();
    }
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let pack =
        Packet::act(Act::FilesRemove).with_data(&FilesRemovePayload { files: form.files });
    respond(dispatch(&state, &target, pack).await)
}

// -- Bridge-backed endpoints --------------------------------------------------

/// Run a bridged download: send the command, then settle the operator
/// response from whichever comes first — the device's error reply, the
/// device attaching to the bridge, or the timeout.
async fn bridged_download(
    state: &Arc<HubState>,
    target: &str,
    pack: Packet,
    trigger: String,
    bridge_id: String,
    on_push: impl FnOnce(&HeaderMap) -> ResponseHead + Send + 'static,
) -> Response {
    let (dst, head_rx, body_rx) = dst_end();
    let bridge = state.bridges.add_with_dst(&bridge_id, dst);
    bridge.on_push(Box::new(on_push));

    // The device answers the trigger only on failure; success is the push.
    let (err_tx, mut err_rx) = mpsc::channel::<Packet>(1);
    let cb: EventCallback = Arc::new(move |hit| {
        let _ = err_tx.try_send(hit.packet.clone());
    });
    state.events.add_event(cb, target, &trigger);

    ws_device::send_pack_by_uuid(state, &pack.with_event(&trigger), target);

    tokio::select! {
        head = head_rx => {
            state.events.remove_event(&trigger, false);
            match head {
                Ok(head) => {
                    let mut response =
                        Response::new(Body::from_stream(ReceiverStream::new(body_rx)));
                    *response.status_mut() = head.status;
                    *response.headers_mut() = head.headers;
                    response
                }
                Err(_) => {
                    state.bridges.remove_bridge(&bridge_id);
                    HubError::DeviceTimeout.response()
                }
            }
        }
        reply = err_rx.recv() => {
            state.bridges.remove_bridge(&bridge_id);
            state.events.remove_event(&trigger, false);
            let msg = reply.and_then(|p| p.msg).unwrap_or_default();
            warn!(%msg, "bridged transfer refused by device");
            HubError::DeviceFailure.response_msg(msg)
        }
        _ = tokio::time::sleep(REPLY_TIMEOUT) => {
            state.bridges.remove_bridge(&bridge_id);
            state.events.remove_event(&trigger, false);
            HubError::DeviceTimeout.response()
        }
    }
}

/// `POST /api/device/screenshot/get`
pub async fn get_screenshot(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<TargetForm>,
) -> Response {
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let bridge_id = crypto::new_id_hex();
    let trigger = crypto::new_id_hex();
    let pack = Packet::act(Act::Screenshot)
        .with_data(&crate::packet::BridgeRef { bridge: bridge_id.clone() });

    bridged_download(&state, &target, pack, trigger, bridge_id, |_| {
        let mut head = ResponseHead::default();
        if let Ok(value) = "image/png".parse() {
            head.headers.insert(CONTENT_TYPE, value);
        }
        head
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct FilesGetForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub preview: bool,
}

/// `POST /api/device/file/get` — ranged file download through a bridge.
pub async fn get_files(
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    AnyForm(form): AnyForm<FilesGetForm>,
) -> Response {
    if form.files.is_empty() {
        return HubError::BadRequest.response();
    }
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let range = match parse_range(&headers) {
        Ok(range) => range,
        Err(()) => return HubError::RangeNotSatisfiable.response(),
    };

    let bridge_id = crypto::new_id_hex();
    let trigger = crypto::new_id_hex();
    let pack = Packet::act(Act::FilesUpload).with_data(&FilesUploadPayload {
        files: form.files.clone(),
        bridge: bridge_id.clone(),
        start: range.map(|(start, _)| start),
        end: range.and_then(|(_, end)| end),
    });

    let files = form.files;
    let preview = form.preview;
    bridged_download(&state, &target, pack, trigger, bridge_id, move |src| {
        download_head(src, &files, preview, range)
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct FileTextForm {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    pub file: String,
}

/// `POST /api/device/file/text`
pub async fn get_text_file(
    State(state): State<Arc<HubState>>,
    AnyForm(form): AnyForm<FileTextForm>,
) -> Response {
    if form.file.is_empty() {
        return HubError::BadRequest.response();
    }
    let target = match resolve_target(&state, &form.uuid, &form.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let bridge_id = crypto::new_id_hex();
    let trigger = crypto::new_id_hex();
    let pack = Packet::act(Act::FileUploadText)
        .with_data(&FileTextPayload { file: form.file.clone(), bridge: bridge_id.clone() });

    let file = form.file;
    bridged_download(&state, &target, pack, trigger, bridge_id, move |src| {
        let mut head = ResponseHead::default();
        copy_file_headers(src, &mut head.headers);
        set_header(&mut head.headers, "Accept-Ranges", "none");
        set_header(&mut head.headers, "Content-Transfer-Encoding", "binary");
        set_header(&mut head.headers, "Content-Type", "application/octet-stream");
        let filename = header_str(src, "FileName")
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| basename(&file));
        set_header(&mut head.headers, "Content-Disposition", &attachment(&filename));
        head
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device: String,
    pub path: String,
    pub file: String,
}

/// `POST /api/device/file/upload` — the operator body is parked on a bridge
/// and the device is told to pull it.
pub async fn upload_file(
    State(state): State<Arc<HubState>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if query.path.is_empty() || query.file.is_empty() {
        return HubError::BadRequest.response();
    }
    let target = match resolve_target(&state, &query.uuid, &query.device) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let bridge_id = crypto::new_id_hex();
    let trigger = crypto::new_id_hex();
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    let bridge = state.bridges.add_with_src(
        &bridge_id,
        SrcEnd { headers: headers.clone(), content_length, body: body.into_data_stream() },
    );

    // Device-facing headers for the pull response.
    let file = query.file.clone();
    bridge.on_pull(Box::new(move || {
        let mut head = ResponseHead::default();
        if let Some(len) = content_length.filter(|len| *len > 0) {
            set_header(&mut head.headers, "Content-Length", &len.to_string());
        }
        set_header(&mut head.headers, "Accept-Ranges", "none");
        set_header(&mut head.headers, "Content-Transfer-Encoding", "binary");
        set_header(&mut head.headers, "Content-Type", "application/octet-stream");
        set_header(&mut head.headers, "Content-Disposition", &attachment(&file));
        head
    }));

    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
    bridge.on_finish(Box::new(move || {
        let _ = done_tx.try_send(());
    }));

    let (err_tx, mut err_rx) = mpsc::channel::<Packet>(1);
    let cb: EventCallback = Arc::new(move |hit| {
        let _ = err_tx.try_send(hit.packet.clone());
    });
    state.events.add_event(cb, &target, &trigger);

    let pack = Packet::act(Act::FilesFetch)
        .with_data(&FilesFetchPayload {
            path: query.path.clone(),
            file: query.file.clone(),
            bridge: bridge_id.clone(),
        })
        .with_event(&trigger);
    ws_device::send_pack_by_uuid(&state, &pack, &target);

    tokio::select! {
        _ = done_rx.recv() => {
            state.events.remove_event(&trigger, false);
            info!(dest = %format!("{}/{}", query.path, query.file), "upload complete");
            Json(Packet::ok()).into_response()
        }
        reply = err_rx.recv() => {
            state.bridges.remove_bridge(&bridge_id);
            state.events.remove_event(&trigger, false);
            let msg = reply.and_then(|p| p.msg).unwrap_or_default();
            warn!(%msg, "upload refused by device");
            HubError::DeviceFailure.response_msg(msg)
        }
        _ = tokio::time::sleep(REPLY_TIMEOUT) => {
            let engaged = state
                .bridges
                .check_bridge(&bridge_id)
                .map(|bridge| bridge.in_use())
                .unwrap_or(false);
            if engaged {
                // The device is mid-pull; see the transfer through.
                tokio::select! {
                    _ = done_rx.recv() => {
                        state.events.remove_event(&trigger, false);
                        Json(Packet::ok()).into_response()
                    }
                    reply = err_rx.recv() => {
                        state.events.remove_event(&trigger, false);
                        let msg = reply.and_then(|p| p.msg).unwrap_or_default();
                        HubError::DeviceFailure.response_msg(msg)
                    }
                }
            } else {
                state.bridges.remove_bridge(&bridge_id);
                state.events.remove_event(&trigger, false);
                warn!("upload timed out");
                HubError::DeviceTimeout.response()
            }
        }
    }
}

// -- Header helpers -----------------------------------------------------------

/// Parse a single `bytes=start-end` range. `Ok(None)` when absent.
fn parse_range(headers: &HeaderMap) -> Result<Option<(i64, Option<i64>)>, ()> {
    let Some(raw) = headers.get("range").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    if raw.len() <= 6 {
        return Ok(None);
    }
    let Some(spec) = raw.strip_prefix("bytes=") else { return Err(()) };
    let spec = spec.trim();
    if spec.contains(',') {
        return Err(());
    }
    let Some((start, end)) = spec.split_once('-') else { return Err(()) };
    let start: i64 = start.parse().map_err(|_| ())?;
    let end = if end.is_empty() {
        None
    } else {
        let end: i64 = end.parse().map_err(|_| ())?;
        if end < start {
            return Err(());
        }
        Some(end)
    };
    Ok(Some((start, end)))
}

/// Response head for a bridged file download.
fn download_head(
    src: &HeaderMap,
    files: &[String],
    preview: bool,
    range: Option<(i64, Option<i64>)>,
) -> ResponseHead {
    let mut head = ResponseHead::default();
    copy_file_headers(src, &mut head.headers);

    if !preview {
        if files.len() == 1 {
            set_header(&mut head.headers, "Accept-Ranges", "bytes");
            if let Some(len) = header_str(src, "content-length") {
                set_header(&mut head.headers, "Content-Length", len);
            }
        } else {
            set_header(&mut head.headers, "Accept-Ranges", "none");
        }
        set_header(&mut head.headers, "Content-Transfer-Encoding", "binary");
        set_header(&mut head.headers, "Content-Type", "application/octet-stream");
        let filename = header_str(src, "FileName")
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| {
                if files.len() > 1 {
                    "Archive.zip".to_owned()
                } else {
                    basename(&files[0])
                }
            });
        set_header(&mut head.headers, "Content-Disposition", &attachment(&filename));
    }

    if let Some((start, end)) = range {
        let file_size = header_str(src, "FileSize").unwrap_or("").to_owned();
        match end {
            Some(end) => {
                set_header(
                    &mut head.headers,
                    "Content-Range",
                    &format!("bytes {start}-{end}/{file_size}"),
                );
            }
            None => {
                if let Ok(size) = file_size.parse::<i64>() {
                    set_header(
                        &mut head.headers,
                        "Content-Range",
                        &format!("bytes {start}-{}/{size}", size - 1),
                    );
                }
            }
        }
        head.status = StatusCode::PARTIAL_CONTENT;
    }
    head
}

/// Forward every `File*` header the device attached to its push.
fn copy_file_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if name.as_str().starts_with("file") {
            dst.insert(name.clone(), value.clone());
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = value.parse() {
        headers.insert(name, value);
    }
}

fn basename(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized.rsplit('/').next().unwrap_or(&normalized).to_owned()
}

/// `attachment; filename="x"; filename*=UTF-8''x` with percent-escaping.
fn attachment(filename: &str) -> String {
    format!(
        "attachment; filename=\"{filename}\"; filename*=UTF-8''{}",
        percent_escape(filename)
    )
}

fn percent_escape(input: &str) -> String {
    const KEEP: &[u8] = b"-_.~!$&'()*+,;=:@";
    let mut out = String::with_capacity(input.len());
    for b in input.as_bytes() {
        if b.is_ascii_alphanumeric() || KEEP.contains(b) {
            out.push(*b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
