//! Device Firmware Update protocol over the reliable serial link.
//!
//! The DFU flow is a fixed sequence of control packets:
//!
//! ```text
//! START (mode + image size breakdown)
//!   -> wait for the bootloader to erase
//! INIT  (image metadata: device type/revision, hash)
//! DATA  (512-byte chunks, paced against flash write throughput)
//! STOP  (no payload; the bootloader finalizes and validates)
//! ```
//!
//! Each control kind is a u32 opcode at the start of the packet payload;
//! the values are fixed by the device bootloader.

pub mod timing;
pub mod transport;

use std::ops::BitOr;

/// DFU control packet opcodes (first four payload bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DfuRequest {
    /// Init packet carrying image metadata (0x01).
    Init = 1,
    /// Start packet carrying the update mode and size breakdown (0x03).
    Start = 3,
    /// Firmware data chunk (0x04).
    Data = 4,
    /// End of firmware data (0x05).
    StopData = 5,
}

impl DfuRequest {
    /// Little-endian wire encoding of the opcode.
    pub fn to_le_bytes(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }
}

/// Which firmware components a transfer updates; components combine with
/// `|`. The encoding matches the bootloader's mode bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateMode(u32);

impl UpdateMode {
    /// No component (invalid on the wire; useful as a fold seed).
    pub const NONE: Self = Self(0);
    /// Softdevice update.
    pub const SOFTDEVICE: Self = Self(1);
    /// Bootloader update.
    pub const BOOTLOADER: Self = Self(2);
    /// Application update.
    pub const APPLICATION: Self = Self(4);

    /// Raw bitmask value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every component of `other` is selected in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UpdateMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub use timing::FlashTiming;
pub use transport::{DfuConfig, DfuTransport, DFU_PACKET_MAX_SIZE};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_opcodes_match_bootloader() {
        assert_eq!(DfuRequest::Init.to_le_bytes(), [1, 0, 0, 0]);
        assert_eq!(DfuRequest::Start.to_le_bytes(), [3, 0, 0, 0]);
        assert_eq!(DfuRequest::Data.to_le_bytes(), [4, 0, 0, 0]);
        assert_eq!(DfuRequest::StopData.to_le_bytes(), [5, 0, 0, 0]);
    }

    #[test]
    fn test_update_mode_combines() {
        let mode = UpdateMode::SOFTDEVICE | UpdateMode::BOOTLOADER;
        assert_eq!(mode.bits(), 3);
        assert!(mode.contains(UpdateMode::SOFTDEVICE));
        assert!(mode.contains(UpdateMode::BOOTLOADER));
        assert!(!mode.contains(UpdateMode::APPLICATION));
        assert_eq!(UpdateMode::APPLICATION.bits(), 4);
    }
}
