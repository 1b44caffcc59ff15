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

use crate::frame::{decode_frame, Frame, FrameHeader};
use crate::{ensure_len, FormatError, Metadata, IV_LEN, MAC_LEN, METADATA_LEN, TAG_LEN};

/// Zero-copy split of a serialized bundle into its sections.
///
/// Parsing checks structure only: every declared size must account for
/// exactly the bytes present and each frame must carry the payload length its
/// position implies. MACs, frame indices and frame versions are left to the
/// caller.
#[derive(Debug, Clone, Copy)]
pub struct BundleView<'a> {
    pub metadata: Metadata,
    pub metadata_bytes: &'a [u8],
    pub metadata_mac: &'a [u8],
    frames: &'a [u8],
    pub firmware_mac: &'a [u8],
    pub message: &'a [u8],
    pub message_mac: &'a [u8],
    pub combined_mac: &'a [u8],
    pub iv: &'a [u8],
    pub tag: &'a [u8],
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let rest = &self.bytes[self.position..];
        ensure_len(rest, len)?;
        self.position += len;
        Ok(&rest[..len])
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.position..]
    }
}

impl<'a> BundleView<'a> {
    pub fn parse(bundle: &'a [u8]) -> Result<Self, FormatError> {
        let mut reader = Reader {
            bytes: bundle,
            position: 0,
        };

        let metadata_bytes = reader.take(METADATA_LEN)?;
        let metadata = Metadata::decode(metadata_bytes)?;
        let metadata_mac = reader.take(MAC_LEN)?;

        let frames_start = reader.position;
        for position in 0..metadata.frame_count() {
            let header = FrameHeader::decode(reader.remaining())?;
            let expected = metadata.frame_payload_len(position).unwrap_or_default();
            if header.size as usize != expected {
                return Err(FormatError::SizeMismatch {
                    expected,
                    actual: header.size as usize,
                });
            }
            reader.take(header.frame_len())?;
        }
        let frames = &bundle[frames_start..reader.position];

        let firmware_mac = reader.take(MAC_LEN)?;
        let message = reader.take(metadata.message_size as usize)?;
        let message_mac = reader.take(MAC_LEN)?;
        let combined_mac = reader.take(MAC_LEN)?;
        let iv = reader.take(IV_LEN)?;
        let tag = reader.take(TAG_LEN)?;

        let trailing = reader.remaining().len();
        if trailing > 0 {
            return Err(FormatError::TrailingBytes(trailing));
        }

        Ok(Self {
            metadata,
            metadata_bytes,
            metadata_mac,
            frames,
            firmware_mac,
            message,
            message_mac,
            combined_mac,
            iv,
            tag,
        })
    }

    /// Frames in wire order
    pub fn frames(&self) -> Frames<'a> {
        Frames {
            remaining: self.frames,
        }
    }

    /// Raw bytes of all frames, headers and MACs included
    pub fn frame_section(&self) -> &'a [u8] {
        self.frames
    }
}

/// Iterator over the frames of a parsed [`BundleView`].
pub struct Frames<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        // The frame section was fully decoded by `BundleView::parse`
        let (consumed, frame) = decode_frame(self.remaining).ok()?;
        self.remaining = &self.remaining[consumed..];
        Some(frame)
    }
}
