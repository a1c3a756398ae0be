// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event correlator: the trigger-indexed table that matches a device's reply
//! packet back to whatever is waiting on it — an operator HTTP request
//! (one-shot) or a terminal/desktop wrapper (persistent).
//!
//! Triggers are 32-hex identifiers unique across concurrent events. One-shot
//! events resolve exactly once: first of callback fire, explicit remove, or
//! timeout wins, and every path clears the trigger from the table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cmap::CMap;
use crate::packet::Packet;
use crate::session::DeviceSession;

/// What a callback sees when its trigger fires: the correlating packet, the
/// residual binary frame when the hit came off the raw fast path, and the
/// originating device session when there is one.
pub struct EventHit<'a> {
    pub packet: &'a Packet,
    pub raw: Option<&'a [u8]>,
    pub session: Option<&'a Arc<DeviceSession>>,
}

pub type EventCallback = Arc<dyn Fn(&EventHit<'_>) + Send + Sync>;

struct Event {
    /// Connection UUID the reply must originate from (session affinity).
    conn_uuid: String,
    callback: EventCallback,
    fired: AtomicBool,
    /// Present iff one-shot: signals the waiting caller.
    finish: Option<mpsc::Sender<bool>>,
    remove: Option<mpsc::Sender<bool>>,
}

pub struct Correlator {
    events: CMap<String, Arc<Event>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self { events: CMap::new() }
    }

    /// Install a persistent event; it lives until [`remove_event`].
    ///
    /// [`remove_event`]: Self::remove_event
    pub fn add_event(&self, callback: EventCallback, conn_uuid: &str, trigger: &str) {
        self.events.set(
            trigger.to_owned(),
            Arc::new(Event {
                conn_uuid: conn_uuid.to_owned(),
                callback,
                fired: AtomicBool::new(false),
                finish: None,
                remove: None,
            }),
        );
    }

    /// Install a one-shot event and block until it resolves.
    ///
    /// Returns `true` when the callback fired, the remover's status when it
    /// was removed, `false` on timeout. The trigger is cleared on every path.
    pub async fn add_event_once(
        &self,
        callback: EventCallback,
        conn_uuid: &str,
        trigger: &str,
        timeout: Duration,
    ) -> bool {
        let (finish_tx, mut finish_rx) = mpsc::channel(1);
        let (remove_tx, mut remove_rx) = mpsc::channel(1);
        self.events.set(
            trigger.to_owned(),
            Arc::new(Event {
                conn_uuid: conn_uuid.to_owned(),
                callback,
                fired: AtomicBool::new(false),
                finish: Some(finish_tx),
                remove: Some(remove_tx),
            }),
        );

        let ok = tokio::select! {
            v = finish_rx.recv() => v.unwrap_or(false),
            v = remove_rx.recv() => v.unwrap_or(false),
            _ = tokio::time::sleep(timeout) => false,
        };
        self.events.remove(&trigger.to_owned());
        ok
    }

    /// Route a packet to the event named by its trigger.
    ///
    /// When a session is supplied, the event only fires if it was installed
    /// for that connection — a reply from any other session is ignored. A
    /// one-shot event's callback runs at most once even if duplicate packets
    /// race on the same trigger.
    pub fn call_event(&self, pack: &Packet, session: Option<&Arc<DeviceSession>>) {
        self.dispatch(pack, None, session)
    }

    /// Route a raw-fast-path frame to its event, carrying the residual frame
    /// bytes alongside the synthesized packet.
    pub fn call_event_raw(
        &self,
        pack: &Packet,
        raw: &[u8],
        session: Option<&Arc<DeviceSession>>,
    ) {
        self.dispatch(pack, Some(raw), session)
    }

    fn dispatch(&self, pack: &Packet, raw: Option<&[u8]>, session: Option<&Arc<DeviceSession>>) {
        let Some(trigger) = pack.event.as_deref() else { return };
        if trigger.is_empty() {
            return;
        }
        let Some(event) = self.events.get(&trigger.to_owned()) else { return };
        if let Some(session) = session {
            if session.uuid != event.conn_uuid {
                return;
            }
        }
        if event.finish.is_some() && event.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        // A panicking handler must not take the reader task (and with it the
        // whole session) down.
        let hit = EventHit { packet: pack, raw, session };
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (event.callback)(&hit)));
        if outcome.is_err() {
            tracing::warn!(%trigger, "event callback panicked");
        }
        if let Some(finish) = &event.finish {
            let _ = finish.try_send(true);
        }
    }

    /// Remove the event; a one-shot waiter is resolved with `ok`.
    pub fn remove_event(&self, trigger: &str, ok: bool) {
        let Some(event) = self.events.remove(&trigger.to_owned()) else { return };
        if let Some(remove) = &event.remove {
            let _ = remove.try_send(ok);
        }
    }

    pub fn has_event(&self, trigger: &str) -> bool {
        self.events.has(&trigger.to_owned())
    }

    /// Drop every event bound to a connection. Called on session teardown so
    /// pending waiters resolve instead of running out their timers.
    pub fn remove_events_for_conn(&self, conn_uuid: &str) {
        let mut stale = Vec::new();
        self.events.iter_cb(|trigger, event| {
            if event.conn_uuid == conn_uuid {
                stale.push(trigger.clone());
            }
            true
        });
        for trigger in stale {
            self.remove_event(&trigger, false);
        }
    }

    pub fn count(&self) -> usize {
        self.events.count()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
