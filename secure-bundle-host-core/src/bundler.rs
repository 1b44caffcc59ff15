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

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::{AesGcm, Key};
use rand::rngs::OsRng;
use rand::RngCore;

use secure_bundle_format::mac::{combined_mac, firmware_mac, message_mac, metadata_mac};
use secure_bundle_format::{
    encode_frame, encoded_frame_len, BundleView, FormatError, Metadata, IV_LEN, MAC_LEN,
    MAX_FRAME_PAYLOAD, MAX_SECTION_LEN, METADATA_LEN, TAG_LEN,
};

use crate::keys::{EncryptionKey, KeyMaterial};
use crate::BundleError;

/// AES-128-GCM with the 16-byte nonce the bootloader expects
pub(crate) type Aes128Gcm16 = AesGcm<Aes128, U16>;

pub(crate) fn cipher(key: &EncryptionKey) -> Aes128Gcm16 {
    Aes128Gcm16::new(Key::<Aes128Gcm16>::from_slice(key.as_bytes()))
}

/// A serialized bundle, ready to be stored or delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    bytes: Vec<u8>,
}

impl Bundle {
    /// Wraps bytes read back from a bundle file. The layout is not checked.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn view(&self) -> Result<BundleView<'_>, FormatError> {
        BundleView::parse(&self.bytes)
    }
}

impl AsRef<[u8]> for Bundle {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Encrypts firmware and wraps it, with its version and release message, in a bundle.
pub struct Bundler {
    keys: KeyMaterial,
}

impl Bundler {
    pub fn new(keys: KeyMaterial) -> Self {
        Self { keys }
    }

    /// Builds a bundle under a fresh random IV.
    ///
    /// # Errors
    ///
    /// - `SizeExceeded`: if the firmware or the release message is longer than 65535 bytes
    pub fn build(&self, firmware: &[u8], version: u16, message: &str) -> Result<Bundle, BundleError> {
        check_section_len("firmware", firmware.len())?;
        check_section_len("release message", message.len())?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        self.build_with_iv(firmware, version, message, iv)
    }

    /// Builds a bundle under the given IV. Never reuse an IV with the same keys.
    pub fn build_with_iv(
        &self,
        firmware: &[u8],
        version: u16,
        message: &str,
        iv: [u8; IV_LEN],
    ) -> Result<Bundle, BundleError> {
        check_section_len("firmware", firmware.len())?;
        check_section_len("release message", message.len())?;

        let mac_key = self.keys.mac.as_bytes();
        let message = message.as_bytes();
        let metadata = Metadata::for_sections(version, firmware.len(), message.len())?;
        let metadata_bytes = metadata.encode();

        let mut ciphertext = firmware.to_vec();
        let tag = cipher(&self.keys.encryption)
            .encrypt_in_place_detached(&iv.into(), b"", &mut ciphertext)
            .map_err(|_| BundleError::Encryption)?;

        let mut bytes = Vec::with_capacity(bundle_len(&metadata));
        bytes.extend_from_slice(&metadata_bytes);
        bytes.extend_from_slice(&metadata_mac(mac_key, &metadata_bytes));

        let mut frame_buffer = [0u8; encoded_frame_len(MAX_FRAME_PAYLOAD)];
        for (index, payload) in ciphertext.chunks(MAX_FRAME_PAYLOAD).enumerate() {
            let written = encode_frame(mac_key, index as u16, payload, version, &mut frame_buffer)?;
            bytes.extend_from_slice(&frame_buffer[..written]);
        }

        bytes.extend_from_slice(&firmware_mac(mac_key, &ciphertext));
        bytes.extend_from_slice(message);
        bytes.extend_from_slice(&message_mac(mac_key, message));
        bytes.extend_from_slice(&combined_mac(mac_key, &ciphertext, &metadata_bytes, message));
        bytes.extend_from_slice(&iv);
        bytes.extend_from_slice(&tag);

        log::debug!(
            "Built bundle for version {}: {} bytes of firmware in {} frames, {} byte message, {} bytes total",
            version,
            firmware.len(),
            metadata.frame_count(),
            message.len(),
            bytes.len()
        );

        Ok(Bundle { bytes })
    }
}

fn check_section_len(section: &'static str, len: usize) -> Result<(), BundleError> {
    if len > MAX_SECTION_LEN {
        return Err(BundleError::SizeExceeded {
            section,
            len,
            max: MAX_SECTION_LEN,
        });
    }
    Ok(())
}

/// Serialized length of a bundle described by `metadata`
pub(crate) fn bundle_len(metadata: &Metadata) -> usize {
    let frames = metadata.frame_count();
    METADATA_LEN
        + MAC_LEN
        + metadata.firmware_size as usize
        + frames * encoded_frame_len(0)
        + MAC_LEN
        + metadata.message_size as usize
        + MAC_LEN
        + MAC_LEN
        + IV_LEN
        + TAG_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundler() -> Bundler {
        Bundler::new(KeyMaterial::new([0x01; 16], [0x02; 32]))
    }

    #[test]
    fn predicted_length_matches_output() {
        let bundle = bundler()
            .build_with_iv(&[0xAA; 3000], 3, "notes", [0x07; IV_LEN])
            .unwrap();
        let metadata = Metadata::new(3, 3000, 5);
        assert_eq!(bundle.len(), bundle_len(&metadata));
    }

    #[test]
    fn oversized_message_is_rejected_before_encryption() {
        let message = "x".repeat(MAX_SECTION_LEN + 1);
        let err = bundler().build(&[0u8; 10], 1, &message).unwrap_err();
        assert!(matches!(
            err,
            BundleError::SizeExceeded {
                section: "release message",
                len,
                ..
            } if len == MAX_SECTION_LEN + 1
        ));
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let firmware = [0u8; 64];
        let bundle = bundler().build_with_iv(&firmware, 1, "", [0x09; IV_LEN]).unwrap();
        let view = bundle.view().unwrap();
        let frame = view.frames().next().unwrap();
        assert_eq!(frame.payload.len(), 64);
        assert_ne!(frame.payload, &firmware[..]);
    }
}
