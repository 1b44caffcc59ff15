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

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use secure_bundle_format::mac::{metadata_mac, verify_mac};
use secure_bundle_format::{
    decode_frame, Metadata, ACK_ERROR, ACK_OK, FINALIZE_MARKER, HANDSHAKE_BYTE, IV_LEN, MAC_LEN,
    METADATA_LEN, TAG_LEN,
};
use secure_bundle_host_core::{open_bundle, Bundler, KeyMaterial, OpenedBundle};

pub const ENCRYPTION_KEY: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

pub const MAC_KEY: [u8; 32] = [
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
];

pub const FIXED_IV: [u8; IV_LEN] = [
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f,
];

pub fn keys() -> KeyMaterial {
    KeyMaterial::new(ENCRYPTION_KEY, MAC_KEY)
}

pub fn bundler() -> Bundler {
    Bundler::new(keys())
}

/// Offset of frame `index` in a bundle whose frames before it are all full
pub fn full_frame_offset(index: usize) -> usize {
    METADATA_LEN + MAC_LEN + index * (1024 + 70)
}

/// Channel that records every write and answers reads from a fixed script.
///
/// Reading past the end of the script fails with `TimedOut`, like a serial
/// port whose device stopped answering.
pub struct ScriptedDevice {
    stalls: VecDeque<Option<io::ErrorKind>>,
    replies: VecDeque<u8>,
    pub writes: Vec<Vec<u8>>,
}

impl ScriptedDevice {
    pub fn new(replies: impl IntoIterator<Item = u8>) -> Self {
        Self {
            stalls: VecDeque::new(),
            replies: replies.into_iter().collect(),
            writes: Vec::new(),
        }
    }

    /// Reads that come back empty-handed before the script starts: `None` is a
    /// zero-length read, `Some(kind)` an error of that kind
    pub fn with_stalls(mut self, stalls: impl IntoIterator<Item = Option<io::ErrorKind>>) -> Self {
        self.stalls = stalls.into_iter().collect();
        self
    }

    /// Echoes the handshake then acknowledges `units` units
    pub fn accepting(units: usize) -> Self {
        Self::new(std::iter::once(HANDSHAKE_BYTE).chain(std::iter::repeat_n(ACK_OK, units)))
    }

    pub fn unread_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Read for ScriptedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(stall) = self.stalls.pop_front() {
            return match stall {
                Some(kind) => Err(io::Error::new(kind, "device still booting")),
                None => Ok(0),
            };
        }
        match self.replies.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no reply scripted")),
        }
    }
}

impl Write for ScriptedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootloaderState {
    Idle,
    Metadata,
    Frame(u16),
    FirmwareMac,
    ReleaseMessage,
    CombinedMac,
    IvAndTag,
    Commit,
    Installed,
    Failed,
}

/// In-memory stand-in for the receiving bootloader.
///
/// Each write is treated as one unit and checked as it arrives, the way the
/// device checks them, answering `0x00` or `0x01`. The terminator installs the
/// image once every unit has passed.
pub struct SimulatedBootloader {
    keys: KeyMaterial,
    state: BootloaderState,
    banner: Vec<u8>,
    metadata: Metadata,
    ciphertext: Vec<u8>,
    received: Vec<u8>,
    replies: VecDeque<u8>,
    pub sent_replies: Vec<u8>,
    installed: Option<OpenedBundle>,
}

impl SimulatedBootloader {
    pub fn new(keys: KeyMaterial) -> Self {
        Self {
            keys,
            state: BootloaderState::Idle,
            banner: Vec::new(),
            metadata: Metadata::default(),
            ciphertext: Vec::new(),
            received: Vec::new(),
            replies: VecDeque::new(),
            sent_replies: Vec::new(),
            installed: None,
        }
    }

    /// Bytes sent ahead of the handshake echo
    pub fn with_banner(mut self, banner: &[u8]) -> Self {
        self.banner = banner.to_vec();
        self
    }

    pub fn installed(&self) -> Option<&OpenedBundle> {
        self.installed.as_ref()
    }

    pub fn failed(&self) -> bool {
        self.state == BootloaderState::Failed
    }

    fn reply(&mut self, byte: u8) {
        self.replies.push_back(byte);
        self.sent_replies.push(byte);
    }

    fn check(&mut self, passed: bool, next: BootloaderState) {
        if passed {
            self.state = next;
            self.reply(ACK_OK);
        } else {
            self.state = BootloaderState::Failed;
            self.reply(ACK_ERROR);
        }
    }

    fn after_frames(&self) -> BootloaderState {
        if self.metadata.frame_count() == 0 {
            BootloaderState::FirmwareMac
        } else {
            BootloaderState::Frame(0)
        }
    }

    fn receive(&mut self, unit: &[u8]) {
        let mac_key = *self.keys.mac.as_bytes();
        match self.state {
            BootloaderState::Idle => {
                if unit == [HANDSHAKE_BYTE] {
                    let banner = std::mem::take(&mut self.banner);
                    for byte in banner {
                        self.replies.push_back(byte);
                    }
                    self.replies.push_back(HANDSHAKE_BYTE);
                    self.state = BootloaderState::Metadata;
                }
            }
            BootloaderState::Metadata => {
                let passed = unit.len() == METADATA_LEN + MAC_LEN
                    && metadata_mac(&mac_key, &unit[..METADATA_LEN]) == unit[METADATA_LEN..];
                if passed {
                    self.metadata = Metadata::decode(unit).unwrap_or_default();
                    self.received.extend_from_slice(unit);
                }
                let next = self.after_frames();
                self.check(passed, next);
            }
            BootloaderState::Frame(expected) => {
                let passed = match decode_frame(unit) {
                    Ok((consumed, frame)) => {
                        consumed == unit.len()
                            && frame.header_mac_matches(&mac_key)
                            && frame.header.index == expected
                            && frame.header.version == self.metadata.version
                            && frame.payload_mac_matches(&mac_key)
                    }
                    Err(_) => false,
                };
                if passed {
                    let (_, frame) = decode_frame(unit).expect("checked above");
                    self.ciphertext.extend_from_slice(frame.payload);
                    self.received.extend_from_slice(unit);
                }
                let next = if (expected as usize) + 1 < self.metadata.frame_count() {
                    BootloaderState::Frame(expected + 1)
                } else {
                    BootloaderState::FirmwareMac
                };
                self.check(passed, next);
            }
            BootloaderState::FirmwareMac => {
                let passed = self.ciphertext.len() == self.metadata.firmware_size as usize
                    && verify_mac(&mac_key, &[&self.ciphertext], unit);
                self.received.extend_from_slice(unit);
                self.check(passed, BootloaderState::ReleaseMessage);
            }
            BootloaderState::ReleaseMessage => {
                let message_len = self.metadata.message_size as usize;
                let passed = unit.len() == message_len + MAC_LEN
                    && verify_mac(&mac_key, &[&unit[..message_len]], &unit[message_len..]);
                self.received.extend_from_slice(unit);
                self.check(passed, BootloaderState::CombinedMac);
            }
            BootloaderState::CombinedMac => {
                self.received.extend_from_slice(unit);
                self.check(unit.len() == MAC_LEN, BootloaderState::IvAndTag);
            }
            BootloaderState::IvAndTag => {
                self.received.extend_from_slice(unit);
                let passed = unit.len() == IV_LEN + TAG_LEN
                    && open_bundle(&self.received, &self.keys).is_ok();
                self.check(passed, BootloaderState::Commit);
            }
            BootloaderState::Commit => {
                if unit == FINALIZE_MARKER {
                    self.installed = open_bundle(&self.received, &self.keys).ok();
                    self.state = BootloaderState::Installed;
                }
            }
            BootloaderState::Installed | BootloaderState::Failed => {}
        }
    }
}

impl Read for SimulatedBootloader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.replies.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "bootloader is silent")),
        }
    }
}

impl Write for SimulatedBootloader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
