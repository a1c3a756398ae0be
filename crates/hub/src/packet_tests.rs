// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn act_serializes_as_wire_string() {
    let json = serde_json::to_string(&Act::TerminalInit).expect("serialize");
    assert_eq!(json, "\"TERMINAL_INIT\"");
    let json = serde_json::to_string(&Act::FileUploadText).expect("serialize");
    assert_eq!(json, "\"FILE_UPLOAD_TEXT\"");
}

#[test]
fn unknown_act_roundtrips_verbatim() {
    let act: Act = serde_json::from_str("\"FUTURE_THING\"").expect("deserialize");
    assert_eq!(act, Act::Unknown("FUTURE_THING".to_owned()));
    assert_eq!(serde_json::to_string(&act).expect("serialize"), "\"FUTURE_THING\"");
}

#[test]
fn packet_omits_absent_fields() {
    let json = String::from_utf8(Packet::ok().to_json().expect("json")).expect("utf8");
    assert_eq!(json, "{\"code\":0}");

    let json = Packet::act(Act::Offline).with_event(&"aa".repeat(16)).to_json().expect("json");
    let value: serde_json::Value = serde_json::from_slice(&json).expect("parse");
    assert_eq!(value["act"], "OFFLINE");
    assert_eq!(value["event"], "aa".repeat(16));
    assert!(value.get("msg").is_none());
    assert!(value.get("data").is_none());
}

#[test]
fn packet_data_roundtrips_through_typed_payloads() {
    let pack = Packet::act(Act::TerminalResize).with_data(&TerminalResizePayload {
        cols: 120,
        rows: 40,
        terminal: Some("ab".repeat(16)),
    });
    let bytes = pack.to_json().expect("json");
    let parsed = Packet::from_json(&bytes).expect("parse");
    let payload: TerminalResizePayload = parsed.parse_data().expect("payload");
    assert_eq!(payload.cols, 120);
    assert_eq!(payload.rows, 40);
}

#[test]
fn device_reply_without_act_parses() {
    // Replies carry code/event/data but no act.
    let raw = br#"{"code":0,"event":"00112233445566778899aabbccddeeff","data":{"processes":[]}}"#;
    let pack = Packet::from_json(raw).expect("parse");
    assert_eq!(pack.code, 0);
    assert!(pack.act.is_none());
    assert!(pack.data.is_some());
}

#[test]
fn error_reply_carries_message() {
    let pack = Packet::fail(1, "operation not supported");
    let value: serde_json::Value =
        serde_json::from_slice(&pack.to_json().expect("json")).expect("parse");
    assert_eq!(value["code"], 1);
    assert_eq!(value["msg"], "operation not supported");
}

#[test]
fn files_upload_payload_omits_absent_range() {
    let payload = FilesUploadPayload {
        files: vec!["/etc/hosts".to_owned()],
        bridge: "cd".repeat(16),
        start: None,
        end: None,
    };
    let value = serde_json::to_value(&payload).expect("value");
    assert!(value.get("start").is_none());
    assert!(value.get("end").is_none());
}
