// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device model and the connection-UUID → device registry.
//!
//! The registry is the single owner of the device → session mapping and is
//! what enforces the one-live-session-per-device invariant (the eviction
//! itself happens in the DEVICE_UP handler, which sends OFFLINE to the older
//! session before re-registering).

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::cmap::CMap;

/// A managed endpoint, as reported by DEVICE_UP / DEVICE_UPDATE frames.
/// Field names are the wire names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub lan: String,
    #[serde(default)]
    pub wan: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub cpu: Cpu,
    #[serde(default)]
    pub ram: Usage,
    #[serde(default)]
    pub disk: Usage,
    #[serde(default)]
    pub net: NetIo,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cpu {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: f64,
    #[serde(default)]
    pub cores: Cores,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cores {
    #[serde(default)]
    pub logical: u32,
    #[serde(default)]
    pub physical: u32,
}

/// Total/used pair for RAM and aggregated disks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub usage: f64,
}

/// Network IO delta over the sampling window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetIo {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub recv: u64,
}

type SharedDevice = Arc<RwLock<Device>>;

/// Connection UUID → device table.
pub struct DeviceRegistry {
    devices: CMap<String, SharedDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { devices: CMap::new() }
    }

    pub fn register(&self, conn_uuid: String, device: Device) {
        self.devices.set(conn_uuid, Arc::new(RwLock::new(device)));
    }

    pub fn unregister(&self, conn_uuid: &str) {
        self.devices.remove(&conn_uuid.to_owned());
    }

    pub fn get(&self, conn_uuid: &str) -> Option<SharedDevice> {
        self.devices.get(&conn_uuid.to_owned())
    }

    pub fn has(&self, conn_uuid: &str) -> bool {
        self.devices.has(&conn_uuid.to_owned())
    }

    pub fn count(&self) -> usize {
        self.devices.count()
    }

    /// Resolve the connection UUID that currently owns a device.
    ///
    /// A caller-supplied `conn_uuid` that is unknown in the table is accepted
    /// as-is (the caller is about to register it). Otherwise the table is
    /// scanned for a device whose id matches `device_id`.
    pub fn check_device(&self, device_id: &str, conn_uuid: &str) -> Option<String> {
        if !conn_uuid.is_empty() && !self.devices.has(&conn_uuid.to_owned()) {
            return Some(conn_uuid.to_owned());
        }
        self.find_by_id(device_id)
    }

    /// Connection UUID of the session holding `device_id`, if any.
    pub fn find_by_id(&self, device_id: &str) -> Option<String> {
        if device_id.is_empty() {
            return None;
        }
        let mut found = None;
        self.devices.iter_cb(|uuid, device| {
            let matches =
                device.read().map(|d| d.id == device_id).unwrap_or(false);
            if matches {
                found = Some(uuid.clone());
                return false;
            }
            true
        });
        found
    }

    /// Snapshot of all devices keyed by connection UUID.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        self.devices.iter_cb(|uuid, device| {
            if let Ok(d) = device.read() {
                if let Ok(value) = serde_json::to_value(&*d) {
                    out.insert(uuid.clone(), value);
                }
            }
            true
        });
        out
    }

    /// Refresh the volatile metrics of an already-registered device.
    pub fn update_metrics(&self, conn_uuid: &str, update: &Device) {
        if let Some(shared) = self.get(conn_uuid) {
            if let Ok(mut d) = shared.write() {
                d.cpu = update.cpu.clone();
                d.ram = update.ram.clone();
                d.net = update.net.clone();
                d.disk = update.disk.clone();
                d.uptime = update.uptime;
            }
        }
    }

    pub fn set_latency(&self, conn_uuid: &str, latency: u64) {
        if let Some(shared) = self.get(conn_uuid) {
            if let Ok(mut d) = shared.write() {
                d.latency = latency;
            }
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
