// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::CMap;

#[test]
fn set_get_remove_roundtrip() {
    let map: CMap<String, u32> = CMap::new();
    map.set("a".to_owned(), 1);
    map.set("b".to_owned(), 2);

    assert_eq!(map.get(&"a".to_owned()), Some(1));
    assert!(map.has(&"b".to_owned()));
    assert_eq!(map.count(), 2);

    assert_eq!(map.remove(&"a".to_owned()), Some(1));
    assert_eq!(map.get(&"a".to_owned()), None);
    assert_eq!(map.count(), 1);
}

#[test]
fn set_replaces_existing_value() {
    let map: CMap<String, u32> = CMap::new();
    map.set("k".to_owned(), 1);
    map.set("k".to_owned(), 2);
    assert_eq!(map.get(&"k".to_owned()), Some(2));
    assert_eq!(map.count(), 1);
}

#[test]
fn set_if_absent_only_inserts_once() {
    let map: CMap<String, u32> = CMap::new();
    assert!(map.set_if_absent("k".to_owned(), 1));
    assert!(!map.set_if_absent("k".to_owned(), 2));
    assert_eq!(map.get(&"k".to_owned()), Some(1));
}

#[test]
fn upsert_sees_current_value() {
    let map: CMap<String, u32> = CMap::new();
    map.upsert("n".to_owned(), |cur| cur.copied().unwrap_or(0) + 1);
    map.upsert("n".to_owned(), |cur| cur.copied().unwrap_or(0) + 1);
    assert_eq!(map.get(&"n".to_owned()), Some(2));
}

#[test]
fn iter_cb_visits_all_entries() {
    let map: CMap<String, u32> = CMap::new();
    for i in 0..100u32 {
        map.set(format!("key-{i}"), i);
    }
    let mut seen = 0;
    map.iter_cb(|_, _| {
        seen += 1;
        true
    });
    assert_eq!(seen, 100);
}

#[test]
fn iter_cb_short_circuits() {
    let map: CMap<String, u32> = CMap::new();
    for i in 0..100u32 {
        map.set(format!("key-{i}"), i);
    }
    let mut seen = 0;
    map.iter_cb(|_, _| {
        seen += 1;
        seen < 10
    });
    assert_eq!(seen, 10);
}

#[test]
fn iter_cb_callback_may_reenter_map() {
    let map: Arc<CMap<String, Arc<u32>>> = Arc::new(CMap::new());
    for i in 0..20u32 {
        map.set(format!("key-{i}"), Arc::new(i));
    }
    // Removing while iterating must not deadlock: the callback runs on a
    // snapshot, outside the shard lock.
    let inner = Arc::clone(&map);
    map.iter_cb(|k, _| {
        inner.remove(k);
        true
    });
    assert_eq!(map.count(), 0);
}

#[test]
fn remove_many_clears_listed_keys() {
    let map: CMap<String, u32> = CMap::new();
    map.set("a".to_owned(), 1);
    map.set("b".to_owned(), 2);
    map.set("c".to_owned(), 3);
    map.remove_many(vec!["a".to_owned(), "c".to_owned()]);
    assert_eq!(map.keys(), vec!["b".to_owned()]);
}
