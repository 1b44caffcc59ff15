#![cfg_attr(not(test), no_std)]
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

//! Byte layout of a secure firmware bundle.
//!
//! A bundle is a flat byte sequence made of, in order: metadata, metadata MAC,
//! the encrypted firmware split into frames, firmware MAC, release message,
//! message MAC, combined MAC, AES-GCM IV and AES-GCM tag. All integers are
//! little-endian `u16`. Nothing here does I/O or encryption; it only lays bytes
//! out and reads them back.

pub mod frame;
pub mod mac;
pub mod metadata;
pub mod view;

pub use frame::{decode_frame, encode_frame, encoded_frame_len, Frame, FrameHeader};
pub use metadata::Metadata;
pub use view::BundleView;

use core::fmt;

/// Length of the encoded bundle metadata
pub const METADATA_LEN: usize = 6;
/// Length of the encoded per-frame header
pub const FRAME_HEADER_LEN: usize = 6;
/// Length of every HMAC-SHA256 in the bundle
pub const MAC_LEN: usize = 32;
/// Maximum ciphertext bytes carried by one frame
pub const MAX_FRAME_PAYLOAD: usize = 1024;
/// Bytes a frame adds on top of its payload
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + 2 * MAC_LEN;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const ENCRYPTION_KEY_LEN: usize = 16;
pub const MAC_KEY_LEN: usize = 32;
/// Largest firmware image or release message a 16-bit length field can describe
pub const MAX_SECTION_LEN: usize = u16::MAX as usize;

/// Sent by the host and echoed by the bootloader before any bundle data
pub const HANDSHAKE_BYTE: u8 = b'U';
/// Acknowledgment byte for a unit the bootloader accepted
pub const ACK_OK: u8 = 0x00;
/// Acknowledgment byte the reference bootloader uses for a rejected unit
pub const ACK_ERROR: u8 = 0x01;
/// Zero-length marker telling the bootloader to commit the image
pub const FINALIZE_MARKER: [u8; 2] = [0x00, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Input ended early. `needed` bytes were required at that point, `available` remained
    Truncated { needed: usize, available: usize },
    /// The output buffer is too small, value is the expected length
    BufferTooSmall(usize),
    /// A frame payload is larger than [`MAX_FRAME_PAYLOAD`]
    PayloadTooLarge(usize),
    /// A length does not fit in a 16-bit field
    LengthOverflow(usize),
    /// A declared size disagrees with the layout derived from the metadata
    SizeMismatch { expected: usize, actual: usize },
    /// Bytes remain after the AES-GCM tag
    TrailingBytes(usize),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Truncated { needed, available } => {
                write!(f, "truncated input: needed {needed} bytes, {available} available")
            }
            FormatError::BufferTooSmall(expected) => {
                write!(f, "output buffer too small, {expected} bytes required")
            }
            FormatError::PayloadTooLarge(len) => {
                write!(f, "frame payload of {len} bytes exceeds {MAX_FRAME_PAYLOAD}")
            }
            FormatError::LengthOverflow(len) => {
                write!(f, "length {len} does not fit in a 16-bit field")
            }
            FormatError::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected}, found {actual}")
            }
            FormatError::TrailingBytes(count) => {
                write!(f, "{count} unexpected bytes after the bundle tag")
            }
        }
    }
}

impl core::error::Error for FormatError {}

/// Reads a little-endian `u16` at `offset`. Callers check the length first.
pub(crate) fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Fails with [`FormatError::Truncated`] unless `bytes` holds at least `needed` bytes.
pub(crate) fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), FormatError> {
    if bytes.len() < needed {
        return Err(FormatError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}
