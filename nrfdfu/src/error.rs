//! Error types for nrfdfu.

use std::io;
use thiserror::Error;

/// Result type for nrfdfu operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for nrfdfu operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the serial channel (read/write failure).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error (open/configure failure).
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An escape byte was followed by something other than 0xDC or 0xDD,
    /// or ended the frame.
    #[error("malformed SLIP escape: 0xDB followed by {}", .found.map_or_else(|| "end of frame".to_string(), |b| format!("{b:#04x}")))]
    MalformedEscape {
        /// The byte that followed the escape byte, if any.
        found: Option<u8>,
    },

    /// Frame too short for the packet header, or for its declared payload.
    #[error("truncated packet: {len} bytes")]
    TruncatedPacket {
        /// Unescaped frame length in bytes.
        len: usize,
    },

    /// Packet CRC16 disagrees with the received trailer.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC recomputed over header+payload.
        expected: u16,
        /// CRC carried in the packet trailer.
        actual: u16,
    },

    /// Packet header checksum byte does not close the header sum.
    #[error("header checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    HeaderChecksum {
        /// Checksum that would close the header.
        expected: u8,
        /// Checksum byte actually received.
        actual: u8,
    },

    /// No acknowledgement frame within the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A packet was not acknowledged after the maximum number of attempts.
    #[error("packet not acknowledged after {attempts} attempts")]
    RetryExhausted {
        /// Total send attempts made for the packet.
        attempts: u32,
    },
}

impl Error {
    /// Whether this error means a single received frame failed validation.
    ///
    /// Frame errors are handled by the reliable link as a missed
    /// acknowledgement (the frame is discarded and the packet resent);
    /// everything else aborts the transfer.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedEscape { .. }
                | Self::TruncatedPacket { .. }
                | Self::CrcMismatch { .. }
                | Self::HeaderChecksum { .. }
        )
    }
}
