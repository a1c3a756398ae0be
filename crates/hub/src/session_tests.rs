// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn write_enqueues_envelopes_in_order() {
    let (session, mut rx) = Session::<()>::detached(8);
    session.write_text("one".to_owned()).expect("text");
    session.write_binary(vec![1u8, 2, 3]).expect("binary");

    match rx.recv().await {
        Some(Envelope::Text(t)) => assert_eq!(t, "one"),
        other => panic!("unexpected envelope: {other:?}"),
    }
    match rx.recv().await {
        Some(Envelope::Binary(b)) => assert_eq!(&b[..], &[1, 2, 3]),
        other => panic!("unexpected envelope: {other:?}"),
    }
}

#[tokio::test]
async fn full_queue_fails_fast_without_blocking() {
    let (session, _rx) = Session::<()>::detached(1);
    session.write_text("fits".to_owned()).expect("first write");
    assert_eq!(
        session.write_text("dropped".to_owned()),
        Err(SessionError::QueueFull)
    );
}

#[tokio::test]
async fn writes_after_close_return_closed() {
    let (session, mut rx) = Session::<()>::detached(8);
    session.close_with(CLOSE_INVALID_DEVICE, "invalid device id");
    assert!(session.is_closed());
    assert_eq!(session.write_text("late".to_owned()), Err(SessionError::Closed));

    match rx.recv().await {
        Some(Envelope::Close(code, reason)) => {
            assert_eq!(code, CLOSE_INVALID_DEVICE);
            assert_eq!(reason, "invalid device id");
        }
        other => panic!("unexpected envelope: {other:?}"),
    }
}

#[tokio::test]
async fn close_is_idempotent() {
    let (session, mut rx) = Session::<()>::detached(8);
    session.close();
    session.close();
    session.close_with(CLOSE_INVALID_DEVICE, "second");

    // Exactly one close envelope is emitted.
    assert!(matches!(rx.recv().await, Some(Envelope::Close(..))));
    assert!(rx.try_recv().is_err());
    assert!(session.cancelled().is_cancelled());
}

#[tokio::test]
async fn attachment_slot_roundtrips() {
    let (session, _rx) = Session::<String>::detached(1);
    assert!(session.attachment().is_none());
    session.set_attachment(Some("terminal-record".to_owned()));
    assert_eq!(session.attachment().as_deref(), Some("terminal-record"));
    session.set_attachment(None);
    assert!(session.attachment().is_none());
}

#[tokio::test]
async fn touch_advances_last_packet() {
    let (session, _rx) = Session::<()>::detached(1);
    let before = session.last_packet();
    session.touch();
    assert!(session.last_packet() >= before);
}
