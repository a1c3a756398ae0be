// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide hub state, constructed once at startup and threaded through
//! every handler. Tests instantiate isolated cores; nothing in the crate
//! reaches into globals.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, HubConfig};
use crate::device::DeviceRegistry;
use crate::events::Correlator;
use crate::session::SessionHub;
use crate::transport::bridge::BridgeTable;
use crate::transport::desktop::DesktopRecord;
use crate::transport::terminal::TerminalRecord;

pub struct HubState {
    pub config: HubConfig,
    /// Normalized 24-byte bootstrap salt.
    pub salt: [u8; 24],
    pub devices: DeviceRegistry,
    pub events: Correlator,
    pub bridges: BridgeTable,
    pub device_hub: SessionHub<()>,
    pub terminal_hub: SessionHub<Arc<TerminalRecord>>,
    pub desktop_hub: SessionHub<Arc<DesktopRecord>>,
    /// Epoch seconds of the most recent operator request; drives the device
    /// ping cadence.
    last_request: AtomicI64,
    pub shutdown: CancellationToken,
}

impl HubState {
    pub fn new(config: HubConfig, shutdown: CancellationToken) -> Result<Self, ConfigError> {
        let salt = config.salt_bytes()?;
        Ok(Self {
            config,
            salt,
            devices: DeviceRegistry::new(),
            events: Correlator::new(),
            bridges: BridgeTable::new(),
            device_hub: SessionHub::new(),
            terminal_hub: SessionHub::new(),
            desktop_hub: SessionHub::new(),
            last_request: AtomicI64::new(unix_now()),
            shutdown,
        })
    }

    /// Record operator activity; resets the device ping cadence.
    pub fn touch_request(&self) {
        self.last_request.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_request(&self) -> i64 {
        self.last_request.load(Ordering::Relaxed)
    }
}

/// Current epoch seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
