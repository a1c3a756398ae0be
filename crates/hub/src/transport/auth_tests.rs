// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sha2::{Digest, Sha256, Sha512};

use super::*;

#[test]
fn plain_passwords_compare_directly() {
    assert!(verify_password("secret", "secret", "plain"));
    assert!(!verify_password("secret", "other", "plain"));
    // Unknown tags fall back to plain comparison.
    assert!(verify_password("secret", "secret", "unknown"));
}

#[test]
fn sha256_passwords_compare_against_hex_digest() {
    let stored = hex::encode(Sha256::digest(b"secret"));
    assert!(verify_password("secret", &stored, "sha256"));
    assert!(!verify_password("wrong", &stored, "sha256"));
}

#[test]
fn sha512_passwords_compare_against_hex_digest() {
    let stored = hex::encode(Sha512::digest(b"secret"));
    assert!(verify_password("secret", &stored, "sha512"));
    assert!(!verify_password("secret", &stored, "sha256"));
}

#[test]
fn constant_time_eq_rejects_length_mismatch() {
    assert!(!constant_time_eq("abc", "abcd"));
    assert!(constant_time_eq("", ""));
    assert!(constant_time_eq("same", "same"));
}
