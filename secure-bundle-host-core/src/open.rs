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

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Nonce, Tag};

use secure_bundle_format::mac::verify_mac;
use secure_bundle_format::BundleView;

use crate::bundler::cipher;
use crate::keys::KeyMaterial;
use crate::{BundleError, Section};

/// Contents recovered from a bundle whose every check passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedBundle {
    pub version: u16,
    pub message: String,
    pub firmware: Vec<u8>,
}

/// Verifies and decrypts a bundle the way the bootloader does.
///
/// Checks run in the order the bootloader applies them as units arrive:
/// metadata MAC, then for each frame its header MAC, index, version and payload
/// MAC, then the firmware, message and combined MACs, and finally the AES-GCM
/// tag while decrypting.
pub fn open_bundle(bundle: &[u8], keys: &KeyMaterial) -> Result<OpenedBundle, BundleError> {
    let view = BundleView::parse(bundle)?;
    let mac_key = keys.mac.as_bytes();
    let metadata = view.metadata;

    if !verify_mac(mac_key, &[view.metadata_bytes], view.metadata_mac) {
        return Err(BundleError::Integrity(Section::Metadata));
    }

    let mut ciphertext = Vec::with_capacity(metadata.firmware_size as usize);
    for (position, frame) in view.frames().enumerate() {
        let expected = position as u16;
        if !frame.header_mac_matches(mac_key) {
            return Err(BundleError::Integrity(Section::FrameHeader(expected)));
        }
        if frame.header.index != expected {
            return Err(BundleError::FrameOrder {
                expected,
                found: frame.header.index,
            });
        }
        if frame.header.version != metadata.version {
            return Err(BundleError::VersionMismatch {
                index: expected,
                expected: metadata.version,
                found: frame.header.version,
            });
        }
        if !frame.payload_mac_matches(mac_key) {
            return Err(BundleError::Integrity(Section::FramePayload(expected)));
        }
        ciphertext.extend_from_slice(frame.payload);
    }

    if !verify_mac(mac_key, &[&ciphertext], view.firmware_mac) {
        return Err(BundleError::Integrity(Section::Firmware));
    }
    if !verify_mac(mac_key, &[view.message], view.message_mac) {
        return Err(BundleError::Integrity(Section::ReleaseMessage));
    }
    if !verify_mac(
        mac_key,
        &[&ciphertext, view.metadata_bytes, view.message],
        view.combined_mac,
    ) {
        return Err(BundleError::Integrity(Section::Combined));
    }

    // The view guarantees IV and tag lengths
    cipher(&keys.encryption)
        .decrypt_in_place_detached(
            Nonce::from_slice(view.iv),
            b"",
            &mut ciphertext,
            Tag::from_slice(view.tag),
        )
        .map_err(|_| BundleError::Decryption)?;

    let message = std::str::from_utf8(view.message)
        .map_err(|_| BundleError::MessageEncoding)?
        .to_owned();

    log::debug!(
        "Opened bundle version {} with {} bytes of firmware",
        metadata.version,
        ciphertext.len()
    );

    Ok(OpenedBundle {
        version: metadata.version,
        message,
        firmware: ciphertext,
    })
}
