// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn stamp_event_id_inserts_after_the_op_byte() {
    let uuid = "ab".repeat(16);
    // magic + service + op, then two payload bytes.
    let frame = vec![34, 22, 19, 17, 21, 0, 0x61, 0x62];
    let stamped = stamp_event_id(&frame, &uuid).expect("stamped");

    assert_eq!(stamped.len(), frame.len() + 16);
    assert_eq!(&stamped[..6], &frame[..6]);
    assert_eq!(&stamped[6..22], &hex::decode(&uuid).expect("uuid")[..]);
    assert_eq!(&stamped[22..], &[0x61, 0x62]);
}

#[test]
fn stamp_event_id_rejects_short_frames_and_bad_uuids() {
    let uuid = "ab".repeat(16);
    assert!(stamp_event_id(&[34, 22, 19], &uuid).is_none());
    assert!(stamp_event_id(&[34, 22, 19, 17, 21, 0], "not-hex").is_none());
    assert!(stamp_event_id(&[34, 22, 19, 17, 21, 0], "abcd").is_none());
}

#[test]
fn stamped_frame_roundtrips_through_device_ingress_splice() {
    // The device hub splices bytes 6..22 back out; what the wrapper sees must
    // equal the original frame.
    let uuid = "cd".repeat(16);
    let original = vec![34, 22, 19, 17, 21, 0, 0, 2, 0x68, 0x69];
    let mut stamped = stamp_event_id(&original, &uuid).expect("stamped");

    let event = hex::encode(&stamped[6..22]);
    assert_eq!(event, uuid);
    stamped.copy_within(22.., 6);
    stamped.truncate(stamped.len() - 16);
    assert_eq!(stamped, original);
}

#[test]
fn sub_query_decodes_well_formed_secret() {
    let query = SubQuery { secret: "0f".repeat(16), device: "dev-1".to_owned() };
    assert_eq!(query.secret_bytes().expect("bytes"), vec![0x0f; 16]);
}

#[test]
fn sub_query_rejects_wrong_length_or_non_hex() {
    let query = SubQuery { secret: "0f".repeat(15), device: "dev-1".to_owned() };
    assert!(query.secret_bytes().is_none());
    let query = SubQuery { secret: "zz".repeat(16), device: "dev-1".to_owned() };
    assert!(query.secret_bytes().is_none());
}
