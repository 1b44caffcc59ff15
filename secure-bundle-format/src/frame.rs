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

use crate::mac::{frame_header_mac, frame_payload_mac, verify_mac};
use crate::{
    ensure_len, read_u16_le, FormatError, FRAME_HEADER_LEN, FRAME_OVERHEAD, MAC_KEY_LEN, MAC_LEN,
    MAX_FRAME_PAYLOAD,
};

/// `index | size | version`, each a little-endian `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub index: u16,
    pub size: u16,
    pub version: u16,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut bytes = [0u8; FRAME_HEADER_LEN];
        bytes[0..2].copy_from_slice(&self.index.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.size.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        ensure_len(bytes, FRAME_HEADER_LEN)?;
        Ok(Self {
            index: read_u16_le(bytes, 0),
            size: read_u16_le(bytes, 2),
            version: read_u16_le(bytes, 4),
        })
    }

    /// Length of the whole encoded frame this header introduces
    pub fn frame_len(&self) -> usize {
        encoded_frame_len(self.size as usize)
    }
}

/// Total encoded length of a frame carrying `payload_len` bytes
pub const fn encoded_frame_len(payload_len: usize) -> usize {
    payload_len + FRAME_OVERHEAD
}

/// A frame borrowed from an encoded bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// The six header bytes exactly as they appear on the wire
    pub header_bytes: &'a [u8],
    pub header_mac: &'a [u8],
    pub payload: &'a [u8],
    pub payload_mac: &'a [u8],
}

impl Frame<'_> {
    pub fn header_mac_matches(&self, key: &[u8; MAC_KEY_LEN]) -> bool {
        verify_mac(key, &[self.header_bytes], self.header_mac)
    }

    pub fn payload_mac_matches(&self, key: &[u8; MAC_KEY_LEN]) -> bool {
        verify_mac(key, &[self.payload, self.header_bytes], self.payload_mac)
    }
}

/// Encodes one frame into `buffer`, computing both of its MACs.
///
/// Returns the number of bytes written on success.
///
/// # Errors
///
/// - `PayloadTooLarge`: if `payload` is longer than [`MAX_FRAME_PAYLOAD`]
/// - `BufferTooSmall`: if `buffer` cannot hold the encoded frame
pub fn encode_frame(
    mac_key: &[u8; MAC_KEY_LEN],
    index: u16,
    payload: &[u8],
    version: u16,
    buffer: &mut [u8],
) -> Result<usize, FormatError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FormatError::PayloadTooLarge(payload.len()));
    }

    let total_len = encoded_frame_len(payload.len());
    if buffer.len() < total_len {
        return Err(FormatError::BufferTooSmall(total_len));
    }

    let size = u16::try_from(payload.len())
        .map_err(|_| FormatError::LengthOverflow(payload.len()))?;
    let header = FrameHeader {
        index,
        size,
        version,
    }
    .encode();

    let payload_start = FRAME_HEADER_LEN + MAC_LEN;
    let payload_end = payload_start + payload.len();

    buffer[..FRAME_HEADER_LEN].copy_from_slice(&header);
    buffer[FRAME_HEADER_LEN..payload_start].copy_from_slice(&frame_header_mac(mac_key, &header));
    buffer[payload_start..payload_end].copy_from_slice(payload);
    buffer[payload_end..total_len].copy_from_slice(&frame_payload_mac(mac_key, payload, &header));

    Ok(total_len)
}

/// Decodes the frame at the start of `buffer`.
///
/// Returns the number of bytes the frame occupies and the frame itself. MACs
/// are not checked here.
pub fn decode_frame(buffer: &[u8]) -> Result<(usize, Frame<'_>), FormatError> {
    let header = FrameHeader::decode(buffer)?;
    let payload_len = header.size as usize;
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(FormatError::PayloadTooLarge(payload_len));
    }

    let total_len = header.frame_len();
    ensure_len(buffer, total_len)?;

    let payload_start = FRAME_HEADER_LEN + MAC_LEN;
    let payload_end = payload_start + payload_len;

    let frame = Frame {
        header,
        header_bytes: &buffer[..FRAME_HEADER_LEN],
        header_mac: &buffer[FRAME_HEADER_LEN..payload_start],
        payload: &buffer[payload_start..payload_end],
        payload_mac: &buffer[payload_end..total_len],
    };
    Ok((total_len, frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; MAC_KEY_LEN] = [0x5A; MAC_KEY_LEN];

    #[test]
    fn encode_then_decode_keeps_fields_and_macs() {
        let payload = [0xC3u8; 452];
        let mut buffer = [0u8; 2048];
        let written = encode_frame(&KEY, 2, &payload, 7, &mut buffer).unwrap();
        assert_eq!(written, 452 + FRAME_OVERHEAD);

        let (consumed, frame) = decode_frame(&buffer[..written]).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(
            frame.header,
            FrameHeader {
                index: 2,
                size: 452,
                version: 7
            }
        );
        assert_eq!(frame.payload, &payload[..]);
        assert!(frame.header_mac_matches(&KEY));
        assert!(frame.payload_mac_matches(&KEY));
        assert!(!frame.header_mac_matches(&[0u8; MAC_KEY_LEN]));
    }

    #[test]
    fn header_bytes_are_little_endian() {
        let mut buffer = [0u8; 128];
        encode_frame(&KEY, 0x0102, &[1, 2, 3], 0x0007, &mut buffer).unwrap();
        assert_eq!(&buffer[..6], &[0x02, 0x01, 0x03, 0x00, 0x07, 0x00]);
        assert_eq!(&buffer[38..41], &[1, 2, 3]);
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = [0u8; MAX_FRAME_PAYLOAD + 1];
        let mut buffer = [0u8; 2048];
        assert_eq!(
            encode_frame(&KEY, 0, &payload, 1, &mut buffer),
            Err(FormatError::PayloadTooLarge(MAX_FRAME_PAYLOAD + 1))
        );
    }

    #[test]
    fn reports_required_buffer_size() {
        let mut buffer = [0u8; 80];
        assert_eq!(
            encode_frame(&KEY, 0, &[0u8; 16], 1, &mut buffer),
            Err(FormatError::BufferTooSmall(16 + FRAME_OVERHEAD))
        );
    }

    #[test]
    fn decode_header_rejects_truncated_input() {
        assert_eq!(
            FrameHeader::decode(&[0x00, 0x00, 0x10]),
            Err(FormatError::Truncated {
                needed: 6,
                available: 3
            })
        );
    }

    #[test]
    fn decode_frame_rejects_missing_payload_mac() {
        let mut buffer = [0u8; 128];
        let written = encode_frame(&KEY, 0, &[9u8; 8], 1, &mut buffer).unwrap();
        assert_eq!(
            decode_frame(&buffer[..written - 1]),
            Err(FormatError::Truncated {
                needed: written,
                available: written - 1
            })
        );
    }

    #[test]
    fn size_field_holds_full_payload() {
        let payload = [0x7Eu8; MAX_FRAME_PAYLOAD];
        let mut buffer = [0u8; encoded_frame_len(MAX_FRAME_PAYLOAD)];
        let written = encode_frame(&KEY, 5, &payload, 3, &mut buffer).unwrap();
        assert_eq!(written, buffer.len());

        let header = FrameHeader::decode(&buffer).unwrap();
        assert_eq!(header.size as usize, MAX_FRAME_PAYLOAD);
        assert_eq!(&buffer[2..4], &[0x00, 0x04]);
    }

    #[test]
    fn decode_frame_rejects_declared_size_above_limit() {
        let header = FrameHeader {
            index: 0,
            size: 2000,
            version: 1,
        }
        .encode();
        assert_eq!(
            decode_frame(&header),
            Err(FormatError::PayloadTooLarge(2000))
        );
    }

    #[test]
    fn payload_mac_covers_the_header() {
        let mut buffer = [0u8; 128];
        let written = encode_frame(&KEY, 0, &[9u8; 8], 1, &mut buffer).unwrap();
        // Change the version only; the header MAC and the payload MAC both cover it
        buffer[4] = 2;
        let (_, frame) = decode_frame(&buffer[..written]).unwrap();
        assert!(!frame.header_mac_matches(&KEY));
        assert!(!frame.payload_mac_matches(&KEY));
    }
}
