//! Duplex channel abstraction over the physical serial link.
//!
//! The protocol layers only need a byte-level duplex channel with blocking
//! reads bounded by a timeout; everything serial-specific (baud rates, flow
//! control, DTR reset pulses) lives behind the [`Port`] trait. This keeps
//! the packet and transfer code I/O-agnostic and testable against in-memory
//! channels.
//!
//! ```text
//! +--------------------+
//! |  DFU transfer      |
//! |  (dfu::transport)  |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |  NativePort        |
//! |  (serialport)      |
//! +--------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial channel configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate for the transfer.
    pub baud_rate: u32,
    /// Hardware (RTS/CTS) flow control.
    pub flow_control: bool,
    /// Blocking read timeout.
    pub timeout: Duration,
    /// Baud rate for the "touch" reset pulse: when set, the port is briefly
    /// opened at this rate and closed again to reboot the device into DFU
    /// mode before the real connection is made.
    pub touch_baud: Option<u32>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            flow_control: false,
            timeout: Duration::from_secs(1),
            touch_baud: None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable hardware flow control.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: bool) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Set the touch reset baud rate.
    #[must_use]
    pub fn with_touch_baud(mut self, touch_baud: Option<u32>) -> Self {
        self.touch_baud = touch_baud;
        self
    }
}

/// Byte-level duplex channel used by the DFU transport.
///
/// Reads block until at least one byte arrives or the configured timeout
/// elapses; a timeout surfaces as [`std::io::ErrorKind::TimedOut`] (or an
/// empty read), never as success with stale data.
pub trait Port: Read + Write + Send {
    /// Set the blocking read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Get the configured baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard any bytes pending in the input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Close the port and release the underlying handle.
    ///
    /// After calling this method, reads and writes fail; a transfer aborts
    /// at its next channel operation.
    fn close(&mut self) -> Result<()>;
}

/// Serial port information, as reported by the enumerator.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::{NativePort, list_ports};
