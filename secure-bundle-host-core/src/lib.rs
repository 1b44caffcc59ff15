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

mod bundler;
mod keys;
mod open;
mod session;
mod transport;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub use bundler::{Bundle, Bundler};
pub use keys::{EncryptionKey, KeyMaterial, MacKey};
pub use open::{open_bundle, OpenedBundle};
pub use session::{DeliverySession, DeliveryState, Outgoing, ReplyOutcome, TrailerSection, Unit};
pub use transport::{deliver, DeliverySummary};

pub use secure_bundle_format::FormatError;

use secure_bundle_format::ACK_ERROR;

/// A bundle section protected by its own MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Metadata,
    FrameHeader(u16),
    FramePayload(u16),
    Firmware,
    ReleaseMessage,
    Combined,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Metadata => write!(f, "metadata"),
            Section::FrameHeader(index) => write!(f, "frame {index} header"),
            Section::FramePayload(index) => write!(f, "frame {index} payload"),
            Section::Firmware => write!(f, "firmware"),
            Section::ReleaseMessage => write!(f, "release message"),
            Section::Combined => write!(f, "combined"),
        }
    }
}

/// Errors raised while building, loading keys for, or opening a bundle
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("{section} is {len} bytes, at most {max} bytes fit in the bundle")]
    SizeExceeded {
        section: &'static str,
        len: usize,
        max: usize,
    },

    #[error("malformed bundle: {0}")]
    Malformed(#[from] FormatError),

    #[error("firmware encryption failed")]
    Encryption,

    #[error("{0} MAC does not match")]
    Integrity(Section),

    #[error("frame {found} found where frame {expected} was expected")]
    FrameOrder { expected: u16, found: u16 },

    #[error("frame {index} carries version {found}, metadata declares {expected}")]
    VersionMismatch { index: u16, expected: u16, found: u16 },

    #[error("firmware failed AES-GCM authentication")]
    Decryption,

    #[error("release message is not valid UTF-8")]
    MessageEncoding,

    #[error("invalid key material: {0}")]
    InvalidKeys(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that abort a delivery
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("malformed bundle: {0}")]
    Malformed(#[from] FormatError),

    #[error("frame index {found} found where {expected} was expected")]
    OutOfOrder { expected: u16, found: u16 },

    #[error("device rejected {unit} with {}", describe_reply(*byte))]
    Rejected { unit: Unit, byte: u8 },

    #[error("channel error: {0}")]
    Channel(#[from] std::io::Error),

    #[error("delivery session used out of turn: {0}")]
    SessionMisuse(&'static str),

    #[error("delivery session already aborted")]
    SessionAborted,
}

fn describe_reply(byte: u8) -> String {
    if byte == ACK_ERROR {
        format!("error code 0x{byte:02x}")
    } else {
        format!("unexpected reply 0x{byte:02x}")
    }
}
