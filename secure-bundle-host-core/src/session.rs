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

use secure_bundle_format::{
    BundleView, FormatError, FrameHeader, Metadata, ACK_OK, FINALIZE_MARKER, HANDSHAKE_BYTE, IV_LEN, MAC_LEN,
    METADATA_LEN, TAG_LEN,
};

use crate::DeliveryError;

const HANDSHAKE: [u8; 1] = [HANDSHAKE_BYTE];

/// Trailer sections, in the order they follow the frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailerSection {
    FirmwareMac,
    ReleaseMessage,
    CombinedMac,
    IvAndTag,
}

impl TrailerSection {
    fn next(self) -> Option<Self> {
        match self {
            TrailerSection::FirmwareMac => Some(TrailerSection::ReleaseMessage),
            TrailerSection::ReleaseMessage => Some(TrailerSection::CombinedMac),
            TrailerSection::CombinedMac => Some(TrailerSection::IvAndTag),
            TrailerSection::IvAndTag => None,
        }
    }
}

impl fmt::Display for TrailerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailerSection::FirmwareMac => write!(f, "firmware MAC"),
            TrailerSection::ReleaseMessage => write!(f, "release message"),
            TrailerSection::CombinedMac => write!(f, "combined MAC"),
            TrailerSection::IvAndTag => write!(f, "IV and tag"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Handshaking,
    SendingHeader,
    SendingFrame(u16),
    SendingTrailer(TrailerSection),
    Finalizing,
    Done,
    Aborted,
}

/// One write on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Handshake,
    Header,
    Frame(u16),
    Trailer(TrailerSection),
    Terminator,
}

impl Unit {
    /// Every unit but the terminator is answered with a single byte
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Unit::Terminator)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Handshake => write!(f, "handshake"),
            Unit::Header => write!(f, "header"),
            Unit::Frame(index) => write!(f, "frame {index}"),
            Unit::Trailer(section) => write!(f, "{section}"),
            Unit::Terminator => write!(f, "terminator"),
        }
    }
}

/// Bytes to write for one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outgoing<'a> {
    pub unit: Unit,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The unit in flight was accepted, the next one may be sent
    Accepted,
    /// Still waiting for the handshake echo, keep reading
    Waiting,
}

/// Sender side of the delivery protocol, without any I/O.
///
/// Callers alternate between [`DeliverySession::next_unit`], writing the
/// returned bytes, and feeding every byte read back into
/// [`DeliverySession::handle_reply`] until it reports
/// [`ReplyOutcome::Accepted`]. Units without a reply (the terminator) are
/// complete as soon as they are written.
#[derive(Debug)]
pub struct DeliverySession<'a> {
    bundle: &'a [u8],
    metadata: Metadata,
    cursor: usize,
    state: DeliveryState,
    in_flight: Option<(Unit, usize)>,
}

impl<'a> DeliverySession<'a> {
    /// Starts a session for `bundle`, whose structure is checked up front so
    /// a truncated bundle never gets as far as the handshake.
    pub fn new(bundle: &'a [u8]) -> Result<Self, DeliveryError> {
        let view = BundleView::parse(bundle)?;
        log::debug!(
            "Session for bundle version {}: {} frames, {} byte message",
            view.metadata.version,
            view.metadata.frame_count(),
            view.metadata.message_size
        );

        Ok(Self {
            bundle,
            metadata: view.metadata,
            cursor: 0,
            state: DeliveryState::Handshaking,
            in_flight: None,
        })
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata
    }

    pub fn frame_count(&self) -> usize {
        self.metadata.frame_count()
    }

    /// Bundle bytes acknowledged by the device so far
    pub fn bytes_acknowledged(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.state == DeliveryState::Done
    }

    /// Returns the next unit to write, or `None` once the terminator has been handed out.
    ///
    /// # Errors
    ///
    /// - `OutOfOrder`: if the next frame's index is not its position; nothing of that frame is returned
    /// - `SessionMisuse`: if the previous unit has not been answered yet
    /// - `SessionAborted`: if an earlier error ended the session
    pub fn next_unit(&mut self) -> Result<Option<Outgoing<'a>>, DeliveryError> {
        if self.in_flight.is_some() {
            return Err(DeliveryError::SessionMisuse(
                "previous unit has not been acknowledged",
            ));
        }

        let outgoing = match self.state {
            DeliveryState::Handshaking => Outgoing {
                unit: Unit::Handshake,
                bytes: &HANDSHAKE,
            },
            DeliveryState::SendingHeader => self.section(Unit::Header, METADATA_LEN + MAC_LEN)?,
            DeliveryState::SendingFrame(expected) => {
                let header = FrameHeader::decode(&self.bundle[self.cursor..])?;
                if header.index != expected {
                    log::error!(
                        "Frame index incorrect at {}, bundle says {}",
                        expected,
                        header.index
                    );
                    self.state = DeliveryState::Aborted;
                    return Err(DeliveryError::OutOfOrder {
                        expected,
                        found: header.index,
                    });
                }
                self.section(Unit::Frame(expected), header.frame_len())?
            }
            DeliveryState::SendingTrailer(section) => {
                let len = match section {
                    TrailerSection::FirmwareMac | TrailerSection::CombinedMac => MAC_LEN,
                    TrailerSection::ReleaseMessage => self.metadata.message_size as usize + MAC_LEN,
                    TrailerSection::IvAndTag => IV_LEN + TAG_LEN,
                };
                self.section(Unit::Trailer(section), len)?
            }
            DeliveryState::Finalizing => {
                self.state = DeliveryState::Done;
                return Ok(Some(Outgoing {
                    unit: Unit::Terminator,
                    bytes: &FINALIZE_MARKER,
                }));
            }
            DeliveryState::Done => return Ok(None),
            DeliveryState::Aborted => return Err(DeliveryError::SessionAborted),
        };

        self.in_flight = Some((outgoing.unit, outgoing.bytes.len()));
        Ok(Some(outgoing))
    }

    /// Feeds one byte read from the device after the unit in flight.
    ///
    /// # Errors
    ///
    /// - `Rejected`: if the device answered a unit with anything but `0x00`
    /// - `SessionMisuse`: if no unit is waiting for a reply
    pub fn handle_reply(&mut self, byte: u8) -> Result<ReplyOutcome, DeliveryError> {
        let Some((unit, len)) = self.in_flight else {
            return Err(DeliveryError::SessionMisuse("no unit is waiting for a reply"));
        };

        if unit == Unit::Handshake {
            if byte != HANDSHAKE_BYTE {
                log::trace!("Ignoring 0x{:02x} while waiting for handshake echo", byte);
                return Ok(ReplyOutcome::Waiting);
            }
            log::debug!("Device ready for update");
            self.in_flight = None;
            self.state = DeliveryState::SendingHeader;
            return Ok(ReplyOutcome::Accepted);
        }

        self.in_flight = None;
        if byte != ACK_OK {
            log::error!("Device responded to {} with 0x{:02x}", unit, byte);
            self.state = DeliveryState::Aborted;
            return Err(DeliveryError::Rejected { unit, byte });
        }

        log::trace!("{} acknowledged", unit);
        self.cursor += len;
        self.state = self.after(unit);
        Ok(ReplyOutcome::Accepted)
    }

    fn section(&self, unit: Unit, len: usize) -> Result<Outgoing<'a>, DeliveryError> {
        let bundle: &'a [u8] = self.bundle;
        let end = self.cursor + len;
        let bytes = bundle.get(self.cursor..end).ok_or(FormatError::Truncated {
            needed: len,
            available: bundle.len() - self.cursor,
        })?;
        Ok(Outgoing { unit, bytes })
    }

    fn after(&self, unit: Unit) -> DeliveryState {
        let frame_count = self.metadata.frame_count();
        match unit {
            Unit::Header if frame_count == 0 => {
                DeliveryState::SendingTrailer(TrailerSection::FirmwareMac)
            }
            Unit::Header => DeliveryState::SendingFrame(0),
            Unit::Frame(index) if (index as usize) + 1 < frame_count => {
                DeliveryState::SendingFrame(index + 1)
            }
            Unit::Frame(_) => DeliveryState::SendingTrailer(TrailerSection::FirmwareMac),
            Unit::Trailer(section) => match section.next() {
                Some(next) => DeliveryState::SendingTrailer(next),
                None => DeliveryState::Finalizing,
            },
            Unit::Handshake => DeliveryState::SendingHeader,
            Unit::Terminator => DeliveryState::Done,
        }
    }
}
