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

use crate::{ensure_len, read_u16_le, FormatError, MAX_FRAME_PAYLOAD, MAX_SECTION_LEN, METADATA_LEN};

/// Leading section of every bundle: `version | firmware_size | message_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub version: u16,
    pub firmware_size: u16,
    pub message_size: u16,
}

impl Metadata {
    pub fn new(version: u16, firmware_size: u16, message_size: u16) -> Self {
        Self {
            version,
            firmware_size,
            message_size,
        }
    }

    /// Builds metadata from the real section lengths.
    ///
    /// # Errors
    ///
    /// - `LengthOverflow`: if either length is above 65535
    pub fn for_sections(
        version: u16,
        firmware_len: usize,
        message_len: usize,
    ) -> Result<Self, FormatError> {
        Ok(Self::new(
            version,
            section_len(firmware_len)?,
            section_len(message_len)?,
        ))
    }

    pub fn encode(&self) -> [u8; METADATA_LEN] {
        let mut bytes = [0u8; METADATA_LEN];
        bytes[0..2].copy_from_slice(&self.version.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.firmware_size.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.message_size.to_le_bytes());
        bytes
    }

    /// Decodes the first [`METADATA_LEN`] bytes, ignoring anything after them.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        ensure_len(bytes, METADATA_LEN)?;
        Ok(Self {
            version: read_u16_le(bytes, 0),
            firmware_size: read_u16_le(bytes, 2),
            message_size: read_u16_le(bytes, 4),
        })
    }

    /// Number of frames the firmware is split into
    pub fn frame_count(&self) -> usize {
        (self.firmware_size as usize).div_ceil(MAX_FRAME_PAYLOAD)
    }

    /// Payload length of frame `index`, or `None` past the last frame
    pub fn frame_payload_len(&self, index: usize) -> Option<usize> {
        let offset = index.checked_mul(MAX_FRAME_PAYLOAD)?;
        let firmware_size = self.firmware_size as usize;
        if offset >= firmware_size {
            return None;
        }
        Some((firmware_size - offset).min(MAX_FRAME_PAYLOAD))
    }
}

fn section_len(len: usize) -> Result<u16, FormatError> {
    if len > MAX_SECTION_LEN {
        return Err(FormatError::LengthOverflow(len));
    }
    Ok(len as u16)
}
