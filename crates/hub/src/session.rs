// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket session plumbing shared by the device channel and the
//! terminal/desktop sub-session hubs.
//!
//! Each connection gets exactly one writer task (the write pump, draining a
//! bounded outbound queue with per-write deadlines and a periodic ping) and
//! one reader loop owned by the transport handler. Senders never block on a
//! slow peer: a full queue drops the envelope and surfaces an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cmap::CMap;
use crate::crypto;
use crate::state::unix_now;

/// Upper bound on a single websocket message.
pub const MAX_MESSAGE_SIZE: usize = (2 << 15) + 1024;
/// Outbound queue depth per session.
const OUTBOUND_QUEUE: usize = 256;
/// Deadline for a single write toward the peer.
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Read deadline; refreshed by any inbound frame, pongs included.
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Transport-level ping cadence from the write pump.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Close code for a packet that failed decryption or parsing.
pub const CLOSE_INVALID_REQUEST: u16 = 1000;
/// Close code for traffic on a session with no device registration.
pub const CLOSE_INVALID_DEVICE: u16 = 1001;

/// A device-channel session. The device hub carries no attachment; the
/// registration lives in the device registry.
pub type DeviceSession = Session<()>;

#[derive(Debug, Clone)]
pub enum Envelope {
    Text(String),
    Binary(Bytes),
    Close(u16, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The session was already closed.
    Closed,
    /// The outbound queue is full; the envelope was dropped.
    QueueFull,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("session is closed"),
            Self::QueueFull => f.write_str("session message buffer is full"),
        }
    }
}

impl std::error::Error for SessionError {}

/// One peer connection. `A` is the hub-specific attachment (a terminal or
/// desktop record; the device hub carries none — its registration lives in
/// the device registry).
pub struct Session<A> {
    pub uuid: String,
    /// Per-session 32-byte secret (16 bytes on operator sub-sessions).
    pub secret: Vec<u8>,
    /// Peer WAN address as observed at upgrade time.
    pub addr: String,
    last_packet: AtomicI64,
    closed: AtomicBool,
    outbound: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    attachment: RwLock<Option<A>>,
}

impl<A: Clone> Session<A> {
    fn new(secret: Vec<u8>, addr: String, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            uuid: crypto::new_id_hex(),
            secret,
            addr,
            last_packet: AtomicI64::new(unix_now()),
            closed: AtomicBool::new(false),
            outbound,
            cancel: CancellationToken::new(),
            attachment: RwLock::new(None),
        }
    }

    /// Refresh `last_packet_time` to now.
    pub fn touch(&self) {
        self.last_packet.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_packet(&self) -> i64 {
        self.last_packet.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_attachment(&self, value: Option<A>) {
        if let Ok(mut slot) = self.attachment.write() {
            *slot = value;
        }
    }

    pub fn attachment(&self) -> Option<A> {
        self.attachment.read().ok().and_then(|slot| slot.clone())
    }

    fn enqueue(&self, env: Envelope) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.outbound.try_send(env).map_err(|_| SessionError::QueueFull)
    }

    pub fn write_text(&self, text: String) -> Result<(), SessionError> {
        self.enqueue(Envelope::Text(text))
    }

    pub fn write_binary(&self, data: impl Into<Bytes>) -> Result<(), SessionError> {
        self.enqueue(Envelope::Binary(data.into()))
    }

    /// Close the session. Idempotent; a concurrent write after close fails
    /// with [`SessionError::Closed`] rather than panicking.
    pub fn close(&self) {
        self.close_with(CLOSE_INVALID_REQUEST, "")
    }

    pub fn close_with(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.try_send(Envelope::Close(code, reason.to_owned()));
        self.cancel.cancel();
    }
}

/// A container of sessions: register/unregister, targeted sends, broadcast,
/// snapshot iteration.
pub struct SessionHub<A> {
    sessions: CMap<String, Arc<Session<A>>>,
}

impl<A: Clone + Send + Sync + 'static> SessionHub<A> {
    pub fn new() -> Self {
        Self { sessions: CMap::new() }
    }

    /// Adopt an upgraded socket: register a session, spawn its write pump,
    /// and hand the read half back to the calling transport handler.
    pub fn adopt(
        &self,
        socket: WebSocket,
        secret: Vec<u8>,
        addr: String,
    ) -> (Arc<Session<A>>, SplitStream<WebSocket>) {
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let session = Arc::new(Session::new(secret, addr, tx));
        self.sessions.set(session.uuid.clone(), Arc::clone(&session));
        tokio::spawn(write_pump(sink, rx, session.cancel.clone()));
        (session, stream)
    }

    /// Drop the session from the hub; the socket itself is torn down by the
    /// pumps.
    pub fn unregister(&self, uuid: &str) {
        self.sessions.remove(&uuid.to_owned());
    }

    pub fn get(&self, uuid: &str) -> Option<Arc<Session<A>>> {
        self.sessions.get(&uuid.to_owned())
    }

    pub fn count(&self) -> usize {
        self.sessions.count()
    }

    pub fn iter_cb<F>(&self, f: F)
    where
        F: FnMut(&String, &Arc<Session<A>>) -> bool,
    {
        self.sessions.iter_cb(f)
    }

    /// Send to every session.
    pub fn broadcast_all(&self, env: Envelope) {
        self.broadcast(env, Option::<fn(&Arc<Session<A>>) -> bool>::None);
    }

    /// Send to every session, optionally filtered by a predicate.
    pub fn broadcast<F>(&self, env: Envelope, filter: Option<F>)
    where
        F: Fn(&Arc<Session<A>>) -> bool,
    {
        self.sessions.iter_cb(|_, session| {
            let wanted = filter.as_ref().map(|f| f(session)).unwrap_or(true);
            if wanted {
                let _ = match env.clone() {
                    Envelope::Text(t) => session.write_text(t),
                    Envelope::Binary(b) => session.write_binary(b),
                    Envelope::Close(code, reason) => {
                        session.close_with(code, &reason);
                        Ok(())
                    }
                };
            }
            true
        });
    }

    /// Send to an explicit list of session UUIDs.
    pub fn send_to_list(&self, env: Envelope, uuids: &[String]) {
        for uuid in uuids {
            if let Some(session) = self.get(uuid) {
                let _ = match env.clone() {
                    Envelope::Text(t) => session.write_text(t),
                    Envelope::Binary(b) => session.write_binary(b),
                    Envelope::Close(code, reason) => {
                        session.close_with(code, &reason);
                        Ok(())
                    }
                };
            }
        }
    }

    /// Close every session and clear the hub. Used at shutdown.
    pub fn close_all(&self, code: u16, reason: &str) {
        let uuids = self.sessions.keys();
        for uuid in &uuids {
            if let Some(session) = self.sessions.get(uuid) {
                session.close_with(code, reason);
            }
        }
        self.sessions.remove_many(uuids);
    }
}

impl<A: Clone + Send + Sync + 'static> Default for SessionHub<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer task: drains the outbound queue with a bounded write deadline and
/// emits a transport ping on a fixed period. Exits on channel close, write
/// failure, cancellation, or after flushing a Close envelope.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            env = rx.recv() => {
                let Some(env) = env else { break };
                let is_close = matches!(env, Envelope::Close(..));
                let msg = match env {
                    Envelope::Text(t) => Message::Text(t.into()),
                    Envelope::Binary(b) => Message::Binary(b),
                    Envelope::Close(code, reason) => Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                };
                match tokio::time::timeout(WRITE_WAIT, sink.send(msg)).await {
                    Ok(Ok(())) if !is_close => {}
                    _ => break,
                }
            }
            _ = ping.tick() => {
                let probe = sink.send(Message::Ping(Bytes::new()));
                if tokio::time::timeout(WRITE_WAIT, probe).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => {
                // Flush a pending close frame if one is queued.
                while let Ok(env) = rx.try_recv() {
                    if let Envelope::Close(code, reason) = env {
                        let frame =
                            Message::Close(Some(CloseFrame { code, reason: reason.into() }));
                        let _ = tokio::time::timeout(WRITE_WAIT, sink.send(frame)).await;
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Next inbound frame, or `None` once the session is done for: cancellation,
/// stream end, a transport error, or the read deadline expiring. The deadline
/// refreshes on every frame; peers answering the pump's pings keep it alive.
pub async fn next_message<A>(
    session: &Session<A>,
    stream: &mut SplitStream<WebSocket>,
) -> Option<Message> {
    loop {
        let msg = tokio::select! {
            _ = session.cancel.cancelled() => return None,
            res = tokio::time::timeout(PONG_WAIT, stream.next()) => match res {
                Err(_) => return None,
                Ok(None) => return None,
                Ok(Some(Err(_))) => return None,
                Ok(Some(Ok(msg))) => msg,
            },
        };
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return None,
            other => return Some(other),
        }
    }
}

#[cfg(test)]
impl<A: Clone> Session<A> {
    /// Bare session wired to an in-memory queue, for unit tests.
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Session::new(vec![0u8; 32], "127.0.0.1".to_owned(), tx), rx)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
