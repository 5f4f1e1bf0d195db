//! # nrfdfu
//!
//! A library for updating nRF5x firmware over the serial DFU protocol.
//!
//! This crate provides the core functionality for talking to the nRF5x
//! serial DFU bootloader, including:
//!
//! - SLIP framing and escaping of the UART byte stream
//! - HCI packet encoding with CRC16-CCITT integrity checks
//! - Stop-and-wait reliable delivery with acknowledgement tracking
//! - The DFU control flow (START/INIT/DATA/STOP) with flash-aware pacing
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//!
//! ## Example
//!
//! ```rust,no_run
//! use nrfdfu::{DfuConfig, DfuTransport, UpdateMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = DfuConfig::default();
//!     config.serial.port_name = "/dev/ttyUSB0".to_string();
//!
//!     let application = std::fs::read("firmware.bin")?;
//!     let init_packet = std::fs::read("firmware.dat")?;
//!
//!     let mut dfu = DfuTransport::open(config)?;
//!     dfu.set_event_listener(|event| println!("{event:?}"));
//!
//!     dfu.send_start_dfu(UpdateMode::APPLICATION, 0, 0, application.len() as u32)?;
//!     dfu.send_init_packet(&init_packet)?;
//!     dfu.send_firmware(&application)?;
//!     dfu.send_validate_firmware()?;
//!     dfu.send_activate_firmware()?;
//!     dfu.close()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dfu;
pub mod error;
pub mod event;
pub mod port;
pub mod protocol;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, list_ports};
pub use {
    dfu::{DFU_PACKET_MAX_SIZE, DfuConfig, DfuRequest, DfuTransport, FlashTiming, UpdateMode},
    error::{Error, Result},
    event::DfuEvent,
    port::{Port, PortInfo, SerialConfig},
    protocol::{HciPacket, LinkConfig, PacketHeader, SequenceCounter, SlipDecoder},
};
