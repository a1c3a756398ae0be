// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::crypto;

#[tokio::test]
async fn check_bridge_fails_after_removal() {
    let table = BridgeTable::new();
    let id = crypto::new_id_hex();
    let (dst, _head_rx, _body_rx) = dst_end();
    table.add_with_dst(&id, dst);

    assert!(table.check_bridge(&id).is_some());
    table.remove_bridge(&id);
    assert!(table.check_bridge(&id).is_none());
    assert_eq!(table.count(), 0);
}

#[tokio::test]
async fn bridges_are_keyed_independently() {
    let table = BridgeTable::new();
    let (dst_a, _h1, _b1) = dst_end();
    let (dst_b, _h2, _b2) = dst_end();
    table.add_with_dst("bridge-a", dst_a);
    table.add_with_dst("bridge-b", dst_b);

    table.remove_bridge("bridge-a");
    assert!(table.check_bridge("bridge-a").is_none());
    assert!(table.check_bridge("bridge-b").is_some());
}

#[tokio::test]
async fn sweep_removes_only_old_unused_bridges() {
    let table = BridgeTable::new();
    let (dst, _h, _b) = dst_end();
    let bridge = table.add_with_dst("old-idle", dst);

    // Not yet old enough.
    table.sweep(unix_now());
    assert!(table.check_bridge("old-idle").is_some());

    // Old and idle: collected.
    table.sweep(unix_now() + MAX_IDLE_AGE + 1);
    assert!(table.check_bridge("old-idle").is_none());
    drop(bridge);
}

#[tokio::test]
async fn sweep_spares_in_use_bridges() {
    let table = BridgeTable::new();
    let (dst, _h, _b) = dst_end();
    let bridge = table.add_with_dst("busy", dst);
    bridge.lock().using = true;

    table.sweep(unix_now() + MAX_IDLE_AGE + 1);
    assert!(table.check_bridge("busy").is_some());
}

#[tokio::test]
async fn hooks_fire_once_and_head_reaches_the_waiter() {
    let table = BridgeTable::new();
    let id = crypto::new_id_hex();
    let (dst, head_rx, mut body_rx) = dst_end();
    let bridge = table.add_with_dst(&id, dst);

    let finished = Arc::new(AtomicUsize::new(0));
    {
        let finished = Arc::clone(&finished);
        bridge.on_finish(Box::new(move || {
            finished.fetch_add(1, Ordering::SeqCst);
        }));
    }
    bridge.on_push(Box::new(|src_headers| {
        let mut head = ResponseHead::default();
        if let Some(name) = src_headers.get("FileName") {
            head.headers.insert("FileName", name.clone());
        }
        head
    }));

    // Simulate the push side: claim, fire hooks, splice a body, finish.
    let (taken_dst, push_hook) = {
        let mut inner = bridge.lock();
        inner.using = true;
        (inner.dst.take(), inner.on_push.take())
    };
    let DstEnd { head_tx, body_tx } = taken_dst.expect("dst parked");

    let mut src_headers = HeaderMap::new();
    src_headers.insert("FileName", "x".parse().expect("header"));
    let head = push_hook.expect("hook")(&src_headers);
    head_tx.send(head).ok();
    body_tx.send(Ok(Bytes::from_static(b"payload"))).await.expect("body chunk");
    drop(body_tx);

    let finish = bridge.lock().on_finish.take();
    finish.expect("finish hook")();
    table.remove_bridge(&id);

    let head = head_rx.await.expect("head");
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(head.headers.get("FileName").map(|v| v.as_bytes()), Some(&b"x"[..]));
    let chunk = body_rx.recv().await.expect("chunk").expect("ok");
    assert_eq!(&chunk[..], b"payload");
    assert!(body_rx.recv().await.is_none());

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(table.check_bridge(&id).is_none());
}

#[test]
fn bridge_id_prefers_query_then_form_body() {
    let query = BridgeQuery { bridge: Some("from-query".to_owned()) };
    assert_eq!(bridge_id(&query, Some("bridge=from-body")), Some("from-query".to_owned()));

    let query = BridgeQuery { bridge: None };
    assert_eq!(
        bridge_id(&query, Some("other=1&bridge=from-body")),
        Some("from-body".to_owned())
    );
    assert_eq!(bridge_id(&query, None), None);
    assert_eq!(bridge_id(&query, Some("bridge=")), None);
}
