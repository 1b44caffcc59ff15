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

use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use secure_bundle_format::{ENCRYPTION_KEY_LEN, MAC_KEY_LEN};

use crate::BundleError;

/// AES-128 key used to encrypt the firmware
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; ENCRYPTION_KEY_LEN]);

impl EncryptionKey {
    pub fn new(bytes: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// HMAC-SHA256 key shared by every MAC in the bundle
#[derive(Clone, PartialEq, Eq)]
pub struct MacKey([u8; MAC_KEY_LEN]);

impl MacKey {
    pub fn new(bytes: [u8; MAC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MAC_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// The pair of secrets produced by key provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub encryption: EncryptionKey,
    pub mac: MacKey,
}

impl KeyMaterial {
    pub fn new(encryption: [u8; ENCRYPTION_KEY_LEN], mac: [u8; MAC_KEY_LEN]) -> Self {
        Self {
            encryption: EncryptionKey::new(encryption),
            mac: MacKey::new(mac),
        }
    }

    /// Draws a fresh pair of keys from the OS random source
    pub fn generate() -> Self {
        let mut encryption = [0u8; ENCRYPTION_KEY_LEN];
        let mut mac = [0u8; MAC_KEY_LEN];
        OsRng.fill_bytes(&mut encryption);
        OsRng.fill_bytes(&mut mac);
        Self::new(encryption, mac)
    }

    /// Secrets file contents, the inverse of [`KeyMaterial::from_secrets`]
    pub fn to_secrets(&self) -> String {
        format!(
            "{}\n{}\n",
            hex::encode(self.encryption.as_bytes()),
            hex::encode(self.mac.as_bytes())
        )
    }

    /// C header declaring both keys, for building them into the bootloader
    pub fn to_c_header(&self) -> String {
        let mut header = String::from("#ifndef SECRETS_H\n#define SECRETS_H\n\n");
        write_c_array(&mut header, "aes_key", self.encryption.as_bytes());
        write_c_array(&mut header, "hmac_key", self.mac.as_bytes());
        header.push_str("#endif // SECRETS_H\n");
        header
    }

    /// Parses the secrets file written at provisioning time: the AES key on
    /// the first line and the MAC key on the second, both hex encoded.
    pub fn from_secrets(text: &str) -> Result<Self, BundleError> {
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

        let encryption_line = lines
            .next()
            .ok_or_else(|| BundleError::InvalidKeys("missing encryption key line".to_string()))?;
        let mac_line = lines
            .next()
            .ok_or_else(|| BundleError::InvalidKeys("missing MAC key line".to_string()))?;
        if lines.next().is_some() {
            return Err(BundleError::InvalidKeys(
                "expected exactly two key lines".to_string(),
            ));
        }

        Ok(Self::new(
            decode_key("encryption key", encryption_line)?,
            decode_key("MAC key", mac_line)?,
        ))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BundleError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded key material from {}", path.display());
        Self::from_secrets(&text)
    }
}

fn write_c_array(out: &mut String, name: &str, bytes: &[u8]) {
    let values: Vec<String> = bytes.iter().map(|byte| format!("0x{byte:02x}")).collect();
    // Writing to a String cannot fail
    let _ = writeln!(
        out,
        "const unsigned char {name}[{}] = {{{}}};\n",
        bytes.len(),
        values.join(", ")
    );
}

fn decode_key<const N: usize>(name: &str, line: &str) -> Result<[u8; N], BundleError> {
    let mut key = [0u8; N];
    hex::decode_to_slice(line, &mut key).map_err(|e| {
        BundleError::InvalidKeys(format!("{name} must be {N} hex-encoded bytes: {e}"))
    })?;
    Ok(key)
}
