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

use std::io::{ErrorKind, Read, Result as IoResult, Write};

use crate::session::{DeliverySession, ReplyOutcome, Unit};
use crate::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySummary {
    pub frames: usize,
    pub units: usize,
    pub bytes_written: usize,
}

/// Delivers `bundle` over `channel`, one acknowledged unit at a time.
///
/// The channel is borrowed exclusively for the whole delivery. The handshake
/// waits for the device as long as it takes, so read timeouts while waiting
/// for the echo are retried. After that the channel's read timeouts surface as
/// [`DeliveryError::Channel`]. On any error the device is left with a partial
/// update and the whole bundle has to be delivered again.
pub fn deliver<C>(channel: &mut C, bundle: &[u8]) -> Result<DeliverySummary, DeliveryError>
where
    C: Read + Write + ?Sized,
{
    let mut session = DeliverySession::new(bundle)?;
    let mut summary = DeliverySummary {
        frames: session.frame_count(),
        units: 0,
        bytes_written: 0,
    };

    log::info!(
        "Delivering {} byte bundle in {} frames",
        bundle.len(),
        summary.frames
    );

    while let Some(outgoing) = session.next_unit()? {
        log::debug!("Sending {} ({} bytes)", outgoing.unit, outgoing.bytes.len());
        channel.write_all(outgoing.bytes)?;
        channel.flush()?;
        summary.units += 1;
        summary.bytes_written += outgoing.bytes.len();

        if outgoing.unit == Unit::Handshake {
            await_handshake(channel, &mut session)?;
        } else if outgoing.unit.expects_reply() {
            session.handle_reply(read_byte(channel)?)?;
        }
    }

    log::info!(
        "Delivery complete: {} units, {} bytes written",
        summary.units,
        summary.bytes_written
    );
    Ok(summary)
}

/// Reads until the device echoes the handshake, skipping timeouts, empty
/// reads and any other bytes it sends first.
fn await_handshake<C>(channel: &mut C, session: &mut DeliverySession<'_>) -> Result<(), DeliveryError>
where
    C: Read + ?Sized,
{
    let mut byte = [0u8; 1];
    loop {
        match channel.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) => {
                if session.handle_reply(byte[0])? == ReplyOutcome::Accepted {
                    return Ok(());
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                log::trace!("Still waiting for the device to enter its bootloader");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_byte<C: Read + ?Sized>(channel: &mut C) -> IoResult<u8> {
    let mut byte = [0u8; 1];
    channel.read_exact(&mut byte)?;
    log::trace!("Read 0x{:02x}", byte[0]);
    Ok(byte[0])
}
