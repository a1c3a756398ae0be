// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UUID-addressed streaming rendezvous.
//!
//! A bridge splices one HTTP body into another: an operator download waits
//! with a pending response (`Dst`) until the device POSTs `/api/bridge/push`;
//! an operator upload parks its request body (`Src`) until the device fetches
//! `/api/bridge/pull`. Bridges are single-shot and reaped when unused.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::cmap::CMap;
use crate::packet::Packet;
use crate::state::{unix_now, HubState};

/// Per-write cap while splicing.
const SPLICE_CHUNK: usize = 32 * 1024;
/// Deadline for a single read from the source body.
const READ_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for a single write toward the destination.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Reaper period and the age at which an unused bridge is collected.
const REAP_PERIOD: Duration = Duration::from_secs(15);
const MAX_IDLE_AGE: i64 = 60;

/// Response status and headers the waiting side settles on once its peer
/// attaches.
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new() }
    }
}

/// Parked operator request body (upload direction).
pub struct SrcEnd {
    pub headers: HeaderMap,
    pub content_length: Option<i64>,
    pub body: BodyDataStream,
}

/// Pending operator response (download direction).
pub struct DstEnd {
    head_tx: oneshot::Sender<ResponseHead>,
    body_tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

/// Build a destination end plus the receivers the operator handler waits on.
pub fn dst_end() -> (
    DstEnd,
    oneshot::Receiver<ResponseHead>,
    mpsc::Receiver<Result<Bytes, std::io::Error>>,
) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(8);
    (DstEnd { head_tx, body_tx }, head_rx, body_rx)
}

type PushHook = Box<dyn FnOnce(&HeaderMap) -> ResponseHead + Send>;
type PullHook = Box<dyn FnOnce() -> ResponseHead + Send>;
type FinishHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct BridgeInner {
    using: bool,
    src: Option<SrcEnd>,
    dst: Option<DstEnd>,
    on_push: Option<PushHook>,
    on_pull: Option<PullHook>,
    on_finish: Option<FinishHook>,
}

pub struct Bridge {
    pub uuid: String,
    creation: i64,
    inner: Mutex<BridgeInner>,
}

impl Bridge {
    fn new(uuid: String) -> Self {
        Self { uuid, creation: unix_now(), inner: Mutex::new(BridgeInner::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Headers set on the operator response when the device pushes.
    pub fn on_push(&self, hook: PushHook) {
        self.lock().on_push = Some(hook);
    }

    /// Headers set on the device response when the device pulls.
    pub fn on_pull(&self, hook: PullHook) {
        self.lock().on_pull = Some(hook);
    }

    /// Runs exactly once after a successful splice.
    pub fn on_finish(&self, hook: FinishHook) {
        self.lock().on_finish = Some(hook);
    }

    pub fn in_use(&self) -> bool {
        self.lock().using
    }
}

pub struct BridgeTable {
    bridges: CMap<String, Arc<Bridge>>,
}

impl BridgeTable {
    pub fn new() -> Self {
        Self { bridges: CMap::new() }
    }

    /// Download direction: the operator parks a pending response.
    pub fn add_with_dst(&self, uuid: &str, dst: DstEnd) -> Arc<Bridge> {
        let bridge = Arc::new(Bridge::new(uuid.to_owned()));
        bridge.lock().dst = Some(dst);
        self.bridges.set(uuid.to_owned(), Arc::clone(&bridge));
        bridge
    }

    /// Upload direction: the operator parks its request body.
    pub fn add_with_src(&self, uuid: &str, src: SrcEnd) -> Arc<Bridge> {
        let bridge = Arc::new(Bridge::new(uuid.to_owned()));
        bridge.lock().src = Some(src);
        self.bridges.set(uuid.to_owned(), Arc::clone(&bridge));
        bridge
    }

    pub fn check_bridge(&self, uuid: &str) -> Option<Arc<Bridge>> {
        self.bridges.get(&uuid.to_owned())
    }

    /// Remove and dispose; a parked source body is dropped (closed) with it.
    pub fn remove_bridge(&self, uuid: &str) {
        if let Some(bridge) = self.bridges.remove(&uuid.to_owned()) {
            let mut inner = bridge.lock();
            inner.src = None;
            inner.dst = None;
        }
    }

    pub fn count(&self) -> usize {
        self.bridges.count()
    }

    fn sweep(&self, now: i64) {
        let mut stale = Vec::new();
        self.bridges.iter_cb(|uuid, bridge| {
            if now - bridge.creation > MAX_IDLE_AGE && !bridge.in_use() {
                stale.push(uuid.clone());
            }
            true
        });
        for uuid in stale {
            debug!(bridge = %uuid, "reaping stale bridge");
            self.remove_bridge(&uuid);
        }
    }
}

impl Default for BridgeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sweep of abandoned bridges.
pub fn spawn_bridge_reaper(state: Arc<HubState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(REAP_PERIOD);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => state.bridges.sweep(unix_now()),
            }
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct BridgeQuery {
    bridge: Option<String>,
}

fn bridge_id(query: &BridgeQuery, body_form: Option<&str>) -> Option<String> {
    if let Some(id) = &query.bridge {
        if !id.is_empty() {
            return Some(id.clone());
        }
    }
    // Tolerate the id arriving as a urlencoded body instead of a query pair.
    let form = body_form?;
    for pair in form.split('&') {
        if let Some(value) = pair.strip_prefix("bridge=") {
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// `ANY /api/bridge/push` — the device delivers a body to a waiting operator
/// response.
pub async fn bridge_push(
    State(state): State<Arc<HubState>>,
    Query(query): Query<BridgeQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(id) = bridge_id(&query, None) else {
        return bad_request("invalid parameter");
    };
    let Some(bridge) = state.bridges.check_bridge(&id) else {
        return bad_request("invalid bridge id");
    };

    let (dst, hook) = {
        let mut inner = bridge.lock();
        if inner.using || (inner.src.is_some() && inner.dst.is_some()) {
            drop(inner);
            return (StatusCode::BAD_REQUEST, Json(Packet::fail(1, "bridge is in use")))
                .into_response();
        }
        inner.using = true;
        (inner.dst.take(), inner.on_push.take())
    };
    let Some(dst) = dst else {
        // No waiting consumer; nothing to splice into.
        state.bridges.remove_bridge(&id);
        return bad_request("invalid bridge id");
    };

    let DstEnd { head_tx, body_tx } = dst;
    let head = hook.map(|h| h(&headers)).unwrap_or_default();
    let _ = head_tx.send(head);

    splice(body.into_data_stream(), &body_tx).await;
    drop(body_tx);

    let finish = bridge.lock().on_finish.take();
    if let Some(finish) = finish {
        finish();
    }
    state.bridges.remove_bridge(&id);
    Json(Packet::ok()).into_response()
}

/// `ANY /api/bridge/pull` — the device consumes a parked operator body.
pub async fn bridge_pull(
    State(state): State<Arc<HubState>>,
    Query(query): Query<BridgeQuery>,
    body: Body,
) -> Response {
    let form = read_small_form(body).await;
    let Some(id) = bridge_id(&query, form.as_deref()) else {
        return bad_request("invalid parameter");
    };
    let Some(bridge) = state.bridges.check_bridge(&id) else {
        return bad_request("invalid bridge id");
    };

    let (src, hook) = {
        let mut inner = bridge.lock();
        if inner.using || (inner.src.is_some() && inner.dst.is_some()) {
            drop(inner);
            return (StatusCode::BAD_REQUEST, Json(Packet::fail(1, "bridge is in use")))
                .into_response();
        }
        inner.using = true;
        (inner.src.take(), inner.on_pull.take())
    };
    let Some(src) = src else {
        state.bridges.remove_bridge(&id);
        return bad_request("invalid bridge id");
    };

    let head = hook.map(|h| h()).unwrap_or_default();

    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    let table_state = Arc::clone(&state);
    tokio::spawn(async move {
        splice(src.body, &body_tx).await;
        drop(body_tx);
        let finish = bridge.lock().on_finish.take();
        if let Some(finish) = finish {
            finish();
        }
        table_state.bridges.remove_bridge(&id);
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(body_rx)));
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers;
    response
}

/// Copy with per-operation deadlines: 5 s per source read, 10 s per
/// destination write, at most 32 KiB per write. Stops on EOF, an empty chunk,
/// or any error.
async fn splice(
    mut src: BodyDataStream,
    dst: &mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    loop {
        let chunk = match tokio::time::timeout(READ_DEADLINE, src.next()).await {
            Err(_) | Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(chunk))) => chunk,
        };
        if chunk.is_empty() {
            break;
        }
        let mut rest = chunk;
        while !rest.is_empty() {
            let take = rest.split_to(rest.len().min(SPLICE_CHUNK));
            match tokio::time::timeout(WRITE_DEADLINE, dst.send(Ok(take))).await {
                Ok(Ok(())) => {}
                _ => return,
            }
        }
    }
}

async fn read_small_form(body: Body) -> Option<String> {
    let bytes = axum::body::to_bytes(body, 4096).await.ok()?;
    if bytes.is_empty() {
        return None;
    }
    String::from_utf8(bytes.to_vec()).ok()
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(Packet::fail(-1, msg))).into_response()
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
