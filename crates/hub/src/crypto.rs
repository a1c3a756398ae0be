// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format crypto primitives.
//!
//! Three layers share the session substrate:
//!
//! * the strong cipher for JSON packets on the device channel
//!   (`MD5(plaintext‖nonce)` as the AES-256-CTR initial counter, 64-byte
//!   CSPRNG nonce appended to the plaintext, MD5 doubling as the integrity
//!   check);
//! * the bootstrap cipher for the handshake token and config-blob sealing
//!   (AES-192-CTR, `MD5(plaintext)` as the counter, no nonce);
//! * a cyclic XOR stream for high-rate terminal/desktop frames inside an
//!   already-authenticated session.
//!
//! MD5 here is a wire-format constraint inherited by every peer, not a
//! security parameter.

use std::fmt;

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const HASH_LEN: usize = 16;
const NONCE_LEN: usize = 64;

/// Leading magic of a binary frame.
pub const FRAME_MAGIC: [u8; 4] = [34, 22, 19, 17];
/// Service discriminator for desktop frames.
pub const SERVICE_DESKTOP: u8 = 20;
/// Service discriminator for terminal frames.
pub const SERVICE_TERMINAL: u8 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Input too short to possibly be a valid ciphertext.
    EntityInvalid,
    /// Integrity hash mismatch after decryption.
    VerifyFailed,
    /// Key material of the wrong length.
    BadKey,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityInvalid => f.write_str("entity invalid"),
            Self::VerifyFailed => f.write_str("verification failed"),
            Self::BadKey => f.write_str("bad key length"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Fill and return `n` CSPRNG bytes.
pub fn rand_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// A fresh 16-byte identifier.
pub fn new_id() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}

/// A fresh 16-byte identifier as 32 lowercase hex chars. Used for session
/// UUIDs, event triggers, and bridge ids.
pub fn new_id_hex() -> String {
    uuid::Uuid::new_v4().as_simple().to_string()
}

fn md5_of(data: &[u8]) -> [u8; HASH_LEN] {
    Md5::digest(data).into()
}

/// Strong cipher: `MD5 ‖ AES-256-CTR(plaintext ‖ nonce)`.
pub fn encrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut body = Vec::with_capacity(data.len() + NONCE_LEN);
    body.extend_from_slice(data);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    body.extend_from_slice(&nonce);

    let hash = md5_of(&body);
    let mut cipher =
        Aes256Ctr::new_from_slices(key, &hash).map_err(|_| CryptoError::BadKey)?;
    cipher.apply_keystream(&mut body);

    let mut out = Vec::with_capacity(HASH_LEN + body.len());
    out.extend_from_slice(&hash);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Inverse of [`encrypt`]; verifies the hash and strips the nonce.
pub fn decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() <= HASH_LEN + NONCE_LEN {
        return Err(CryptoError::EntityInvalid);
    }
    let (hash, body) = data.split_at(HASH_LEN);
    let mut plain = body.to_vec();
    let mut cipher =
        Aes256Ctr::new_from_slices(key, hash).map_err(|_| CryptoError::BadKey)?;
    cipher.apply_keystream(&mut plain);

    if md5_of(&plain) != *hash {
        return Err(CryptoError::VerifyFailed);
    }
    plain.truncate(plain.len() - NONCE_LEN);
    Ok(plain)
}

// Keys come in three sizes: the 24-byte server salt, the 16-byte config
// sealing key, and the 32-byte session secret.
fn apply_aes_ctr(data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    match key.len() {
        16 => {
            let mut cipher =
                Aes128Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::BadKey)?;
            cipher.apply_keystream(data);
        }
        24 => {
            let mut cipher =
                Aes192Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::BadKey)?;
            cipher.apply_keystream(data);
        }
        32 => {
            let mut cipher =
                Aes256Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::BadKey)?;
            cipher.apply_keystream(data);
        }
        _ => return Err(CryptoError::BadKey),
    }
    Ok(())
}

/// Bootstrap cipher: `MD5 ‖ AES-CTR(plaintext)`, MD5-of-plaintext as the
/// counter, no nonce. Used only for the handshake token and config sealing.
pub fn enc_aes(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let hash = md5_of(data);
    let mut body = data.to_vec();
    apply_aes_ctr(&mut body, key, &hash)?;

    let mut out = Vec::with_capacity(HASH_LEN + body.len());
    out.extend_from_slice(&hash);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Inverse of [`enc_aes`].
pub fn dec_aes(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() <= HASH_LEN {
        return Err(CryptoError::EntityInvalid);
    }
    let (hash, body) = data.split_at(HASH_LEN);
    let mut plain = body.to_vec();
    apply_aes_ctr(&mut plain, key, hash)?;

    if md5_of(&plain) != *hash {
        return Err(CryptoError::VerifyFailed);
    }
    Ok(plain)
}

/// Cyclic XOR in place. Identity for an empty key. Confidentiality only.
pub fn xor_stream(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i % key.len()];
    }
}

/// Classify a frame as binary: magic at bytes 0..4, a known service byte at
/// byte 4. Returns `(service, op)`. Anything else is an encrypted JSON
/// packet. Safe on truncated input.
pub fn check_binary_frame(data: &[u8]) -> Option<(u8, u8)> {
    if data.len() < 8 {
        return None;
    }
    if data[..4] != FRAME_MAGIC {
        return None;
    }
    if data[4] != SERVICE_DESKTOP && data[4] != SERVICE_TERMINAL {
        return None;
    }
    Some((data[4], data[5]))
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
