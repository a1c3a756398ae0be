// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn device(id: &str) -> Device {
    Device { id: id.to_owned(), hostname: format!("host-{id}"), ..Device::default() }
}

#[test]
fn register_and_find_by_id() {
    let reg = DeviceRegistry::new();
    reg.register("conn-1".to_owned(), device("X"));

    assert_eq!(reg.find_by_id("X"), Some("conn-1".to_owned()));
    assert_eq!(reg.find_by_id("Y"), None);
    assert_eq!(reg.find_by_id(""), None);
}

#[test]
fn check_device_accepts_unknown_conn_uuid() {
    let reg = DeviceRegistry::new();
    // Caller is about to register this connection.
    assert_eq!(reg.check_device("", "conn-new"), Some("conn-new".to_owned()));
}

#[test]
fn check_device_resolves_registered_device_by_id() {
    let reg = DeviceRegistry::new();
    reg.register("conn-1".to_owned(), device("X"));
    assert_eq!(reg.check_device("X", ""), Some("conn-1".to_owned()));
    assert_eq!(reg.check_device("unknown", ""), None);
}

#[test]
fn at_most_one_connection_per_device_after_eviction() {
    let reg = DeviceRegistry::new();
    reg.register("conn-1".to_owned(), device("X"));

    // The DEVICE_UP handler evicts the old registration before re-adding.
    let old = reg.find_by_id("X").expect("registered");
    reg.unregister(&old);
    reg.register("conn-2".to_owned(), device("X"));

    assert_eq!(reg.count(), 1);
    assert_eq!(reg.find_by_id("X"), Some("conn-2".to_owned()));
}

#[test]
fn update_metrics_leaves_identity_untouched() {
    let reg = DeviceRegistry::new();
    reg.register("conn-1".to_owned(), device("X"));

    let mut update = device("ignored");
    update.uptime = 4242;
    update.cpu.usage = 55.5;
    reg.update_metrics("conn-1", &update);

    let shared = reg.get("conn-1").expect("present");
    let d = shared.read().expect("read");
    assert_eq!(d.id, "X");
    assert_eq!(d.uptime, 4242);
    assert!((d.cpu.usage - 55.5).abs() < f64::EPSILON);
}

#[test]
fn snapshot_serializes_wire_field_names() {
    let reg = DeviceRegistry::new();
    reg.register("conn-1".to_owned(), device("X"));
    let snap = reg.snapshot();
    let entry = snap.get("conn-1").expect("entry");
    assert_eq!(entry["id"], "X");
    assert!(entry.get("cpu").is_some());
    assert!(entry.get("ram").is_some());
}

#[test]
fn set_latency_updates_device() {
    let reg = DeviceRegistry::new();
    reg.register("conn-1".to_owned(), device("X"));
    reg.set_latency("conn-1", 17);
    let shared = reg.get("conn-1").expect("present");
    assert_eq!(shared.read().expect("read").latency, 17);
}
