// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn test_config() -> HubConfig {
    HubConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        salt: "unit-test-salt".to_owned(),
        auth_user: None,
        auth_pass: None,
        auth_algo: "plain".to_owned(),
        log_level: "info".to_owned(),
        built_path: "./built/{os}_{arch}".to_owned(),
        commit: "".to_owned(),
    }
}

#[test]
fn short_salt_is_padded_to_24_bytes() {
    let mut config = test_config();
    config.salt = "abc".to_owned();
    let salt = config.salt_bytes().expect("salt");
    assert_eq!(&salt[..3], b"abc");
    assert!(salt[3..].iter().all(|b| *b == SALT_PAD));
}

#[test]
fn exact_24_byte_salt_is_unchanged() {
    let mut config = test_config();
    config.salt = "x".repeat(24);
    let salt = config.salt_bytes().expect("salt");
    assert_eq!(salt, [b'x'; 24]);
}

#[test]
fn oversized_salt_is_rejected() {
    let mut config = test_config();
    config.salt = "x".repeat(25);
    assert_eq!(config.salt_bytes(), Err(ConfigError::SaltTooLong(25)));
}

#[test]
fn template_path_substitutes_os_and_arch() {
    let config = test_config();
    assert_eq!(config.template_path("linux", "amd64"), "./built/linux_amd64");
}

#[test]
fn auth_disabled_without_both_credentials() {
    let mut config = test_config();
    assert!(!config.auth_enabled());
    config.auth_user = Some("admin".to_owned());
    assert!(!config.auth_enabled());
    config.auth_pass = Some("secret".to_owned());
    assert!(config.auth_enabled());
}
