// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! HMAC-SHA256 over the exact byte ranges each bundle section covers.
//!
//! Each section has its own function so the coverage of every MAC is defined
//! in one place and shared by the bundler and the verifier.

use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{MAC_KEY_LEN, MAC_LEN};

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8; MAC_KEY_LEN], parts: &[&[u8]]) -> HmacSha256 {
    // Zero-padding to the SHA-256 block is what HMAC does with a short key
    let mut block = Key::<HmacSha256>::default();
    block[..MAC_KEY_LEN].copy_from_slice(key);
    let mut mac = <HmacSha256 as KeyInit>::new(&block);
    for part in parts {
        mac.update(part);
    }
    mac
}

/// Computes HMAC-SHA256 over the concatenation of `parts`.
pub fn compute_mac(key: &[u8; MAC_KEY_LEN], parts: &[&[u8]]) -> [u8; MAC_LEN] {
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&keyed(key, parts).finalize().into_bytes());
    out
}

/// Checks `expected` against HMAC-SHA256 of `parts` in constant time.
pub fn verify_mac(key: &[u8; MAC_KEY_LEN], parts: &[&[u8]], expected: &[u8]) -> bool {
    keyed(key, parts).verify_slice(expected).is_ok()
}

pub fn metadata_mac(key: &[u8; MAC_KEY_LEN], metadata: &[u8]) -> [u8; MAC_LEN] {
    compute_mac(key, &[metadata])
}

pub fn frame_header_mac(key: &[u8; MAC_KEY_LEN], header: &[u8]) -> [u8; MAC_LEN] {
    compute_mac(key, &[header])
}

/// The payload MAC covers the payload followed by the frame header.
pub fn frame_payload_mac(key: &[u8; MAC_KEY_LEN], payload: &[u8], header: &[u8]) -> [u8; MAC_LEN] {
    compute_mac(key, &[payload, header])
}

pub fn firmware_mac(key: &[u8; MAC_KEY_LEN], ciphertext: &[u8]) -> [u8; MAC_LEN] {
    compute_mac(key, &[ciphertext])
}

pub fn message_mac(key: &[u8; MAC_KEY_LEN], message: &[u8]) -> [u8; MAC_LEN] {
    compute_mac(key, &[message])
}

/// The combined MAC covers `ciphertext | metadata | message`.
pub fn combined_mac(
    key: &[u8; MAC_KEY_LEN],
    ciphertext: &[u8],
    metadata: &[u8],
    message: &[u8],
) -> [u8; MAC_LEN] {
    compute_mac(key, &[ciphertext, metadata, message])
}
