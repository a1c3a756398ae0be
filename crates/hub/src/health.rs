// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background health tasks.
//!
//! The device hub gets a dynamic ping cadence: every device is pinged on a
//! 3 s tick right after operator activity, and the effective interval grows
//! in 3 s steps up to 60 s while the operator surface stays quiet. Reapers
//! close sessions whose `last_packet_time` goes stale — 150 s on the device
//! hub, 300 s on the sub-session hubs.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::session::{Session, SessionHub};
use crate::state::{unix_now, HubState};
use crate::transport::{desktop, terminal, ws_device};

const PING_TICK: Duration = Duration::from_secs(3);
const MAX_PING_INTERVAL: i64 = 60;
const DEVICE_REAP_PERIOD: Duration = Duration::from_secs(60);
const DEVICE_MAX_IDLE: i64 = 150;
const SUB_REAP_PERIOD: Duration = Duration::from_secs(30);
const SUB_MAX_IDLE: i64 = 300;

/// Ping cadence + idle reaper for the device hub.
pub fn spawn_device_health(state: Arc<HubState>) {
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(PING_TICK);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut tick: i64 = 0;
            let mut ping_interval: i64 = 3;
            loop {
                tokio::select! {
                    _ = state.shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                tick += 3;
                // Recent operator activity resets the cadence to 3 s.
                if tick >= unix_now() - state.last_request() {
                    ping_interval = 3;
                }
                if tick >= 3 && (tick >= ping_interval || tick >= MAX_PING_INTERVAL) {
                    ping_interval = (ping_interval + 3).min(MAX_PING_INTERVAL);
                    tick = 0;
                    state.device_hub.iter_cb(|_, session| {
                        ws_device::ping_device(&state, session);
                        true
                    });
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(DEVICE_REAP_PERIOD);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            reap_idle(&state.device_hub, DEVICE_MAX_IDLE, |_| true);
        }
    });
}

/// Shared reaper for the terminal and desktop hubs: ping first, then close
/// anything idle past the limit.
pub fn spawn_subsession_health(state: Arc<HubState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SUB_REAP_PERIOD);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            reap_idle(&state.terminal_hub, SUB_MAX_IDLE, terminal::send_ping);
            reap_idle(&state.desktop_hub, SUB_MAX_IDLE, desktop::send_ping);
        }
    });
}

/// Close sessions that fail their ping or have been idle too long.
fn reap_idle<A, F>(hub: &SessionHub<A>, max_idle: i64, ping: F)
where
    A: Clone + Send + Sync + 'static,
    F: Fn(&Arc<Session<A>>) -> bool,
{
    let now = unix_now();
    let mut doomed = Vec::new();
    hub.iter_cb(|_, session| {
        if !ping(session) || now - session.last_packet() > max_idle {
            doomed.push(Arc::clone(session));
        }
        true
    });
    for session in doomed {
        debug!(session = %session.uuid, "closing idle session");
        session.close();
    }
}
