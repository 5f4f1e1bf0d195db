//! DFU transport: sequences the control packets of one firmware transfer.
//!
//! Owns the serial channel and the per-transfer session state for the
//! lifetime of one update. Everything is synchronous and single-threaded:
//! each send blocks until the device acknowledges (or the link gives up),
//! and the pacing sleeps dominate transfer time anyway.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nrfdfu::dfu::{DfuConfig, DfuTransport, UpdateMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = DfuConfig::default();
//!     config.serial.port_name = "/dev/ttyUSB0".to_string();
//!
//!     let app = std::fs::read("app.bin")?;
//!     let init = std::fs::read("app.dat")?;
//!
//!     let mut dfu = DfuTransport::open(config)?;
//!     dfu.send_start_dfu(UpdateMode::APPLICATION, 0, 0, app.len() as u32)?;
//!     dfu.send_init_packet(&init)?;
//!     dfu.send_firmware(&app)?;
//!     dfu.send_validate_firmware()?;
//!     dfu.send_activate_firmware()?;
//!     dfu.close()?;
//!     Ok(())
//! }
//! ```

use std::thread;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};

use crate::dfu::timing::{FLASH_PAGE_SIZE, FlashTiming};
use crate::dfu::{DfuRequest, UpdateMode};
use crate::error::Result;
use crate::event::{DfuEvent, EventListener};
use crate::port::{Port, SerialConfig};
use crate::protocol::link::{LinkConfig, ReliableLink, SequenceCounter};

/// Maximum firmware bytes carried by one DATA packet.
pub const DFU_PACKET_MAX_SIZE: usize = 512;

/// DATA packets that fill one flash page.
const PACKETS_PER_PAGE: usize = FLASH_PAGE_SIZE / DFU_PACKET_MAX_SIZE;

/// Settle delay after opening the serial port, before any traffic.
const SERIAL_PORT_OPEN_WAIT_TIME: Duration = Duration::from_millis(100);

/// Wait for the device to reboot into DFU mode and re-enumerate after the
/// touch pulse.
const TOUCH_RESET_WAIT_TIME: Duration = Duration::from_millis(1500);

/// How long DTR is held low for the reset pulse.
const DTR_PULSE_TIME: Duration = Duration::from_millis(50);

/// Boot delay after releasing DTR.
const DTR_RESET_WAIT_TIME: Duration = Duration::from_millis(100);

/// Default total image size assumed before a START packet announces the
/// real one (the maximum application size).
const DEFAULT_TOTAL_SIZE: usize = 167_936;

/// DFU transport configuration.
#[derive(Debug, Clone, Default)]
pub struct DfuConfig {
    /// Serial connection settings (used by [`DfuTransport::open`]).
    pub serial: SerialConfig,
    /// The device runs a single-bank bootloader; enables the activation
    /// fast path for packages without a softdevice.
    pub single_bank: bool,
    /// Reliable link tuning.
    pub link: LinkConfig,
    /// Flash timing model for the pacing delays.
    pub timing: FlashTiming,
}

/// Per-transfer mutable state.
///
/// Created when the channel is opened, discarded when it is closed; nothing
/// survives across transfers, so concurrent sessions on different ports
/// cannot interfere.
#[derive(Debug)]
struct Session {
    seq: SequenceCounter,
    total_size: usize,
    sd_size: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            seq: SequenceCounter::default(),
            total_size: DEFAULT_TOTAL_SIZE,
            sd_size: 0,
        }
    }
}

/// DFU transfer over a duplex byte channel.
///
/// Generic over the port type `P` so the protocol can run against anything
/// that implements [`Port`]; [`DfuTransport::open`] is the serial-port
/// entry point.
pub struct DfuTransport<P: Port> {
    port: P,
    config: DfuConfig,
    session: Session,
    listener: Option<EventListener>,
}

impl<P: Port> DfuTransport<P> {
    /// Create a transport over an already-open channel.
    pub fn new(port: P, config: DfuConfig) -> Self {
        Self {
            port,
            config,
            session: Session::default(),
            listener: None,
        }
    }

    /// Register the observer for progress and timeout events.
    pub fn set_event_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&DfuEvent) + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Close the channel, releasing the underlying handle.
    ///
    /// Ends the transfer session; a fresh transfer must restart from the
    /// START packet on a newly opened transport.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    /// Send one payload through the reliable link.
    fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let Self {
            port,
            config,
            session,
            listener,
        } = self;

        let mut link = ReliableLink::new(port, &mut session.seq, config.link.clone());
        link.send(payload, |event| {
            if let Some(cb) = listener.as_mut() {
                cb(event);
            }
        })
    }

    fn emit(&mut self, event: &DfuEvent) {
        if let Some(cb) = self.listener.as_mut() {
            cb(event);
        }
    }

    /// Send the init packet carrying the image metadata.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn send_init_packet(&mut self, init_packet: &[u8]) -> Result<()> {
        debug!("Sending init packet ({} bytes)", init_packet.len());

        let mut payload = Vec::with_capacity(4 + init_packet.len() + 2);
        payload.extend_from_slice(&DfuRequest::Init.to_le_bytes());
        payload.extend_from_slice(init_packet);
        // The bootloader expects two bytes of zero padding after the metadata
        payload.write_u16::<LittleEndian>(0x0000).unwrap();

        self.send_packet(&payload)
    }

    /// Send the START packet announcing the update mode and component
    /// sizes, then block while the bootloader erases room for the image.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn send_start_dfu(
        &mut self,
        mode: UpdateMode,
        softdevice_size: u32,
        bootloader_size: u32,
        app_size: u32,
    ) -> Result<()> {
        debug!(
            "Starting DFU, mode {:#x}: sd {softdevice_size}, bl {bootloader_size}, app {app_size}",
            mode.bits()
        );

        let mut payload = Vec::with_capacity(4 + 4 + 12);
        payload.extend_from_slice(&DfuRequest::Start.to_le_bytes());
        payload.write_u32::<LittleEndian>(mode.bits()).unwrap();
        payload.write_u32::<LittleEndian>(softdevice_size).unwrap();
        payload.write_u32::<LittleEndian>(bootloader_size).unwrap();
        payload.write_u32::<LittleEndian>(app_size).unwrap();

        self.send_packet(&payload)?;

        self.session.sd_size = softdevice_size as usize;
        self.session.total_size = (softdevice_size + bootloader_size + app_size) as usize;

        let wait = self.erase_wait_time();
        debug!("Waiting {} ms for flash erase", wait.as_millis());
        thread::sleep(wait);

        Ok(())
    }

    /// Send the firmware image as DATA packets followed by a STOP packet.
    ///
    /// Chunks of at most [`DFU_PACKET_MAX_SIZE`] bytes go out one at a
    /// time; after each page worth of packets the sender pauses for a page
    /// write, since the device CPU is blocked while flash is programmed.
    /// A progress event follows every packet.
    #[allow(clippy::cast_possible_truncation)] // percentage is <= 100
    pub fn send_firmware(&mut self, firmware: &[u8]) -> Result<()> {
        info!("Sending firmware ({} bytes)", firmware.len());
        self.emit(&DfuEvent::Progress {
            percent: 0,
            done: false,
            message: String::new(),
        });

        let count = firmware.len().div_ceil(DFU_PACKET_MAX_SIZE);
        let page_write = self.config.timing.page_write_time();

        for (i, chunk) in firmware.chunks(DFU_PACKET_MAX_SIZE).enumerate() {
            let mut payload = Vec::with_capacity(4 + chunk.len());
            payload.extend_from_slice(&DfuRequest::Data.to_le_bytes());
            payload.extend_from_slice(chunk);
            self.send_packet(&payload)?;

            self.emit(&DfuEvent::Progress {
                percent: ((i + 1) * 100 / count) as u8,
                done: false,
                message: String::new(),
            });

            // After a page worth of packets the device erases and writes
            // flash; its CPU ignores the UART until that finishes.
            if i % PACKETS_PER_PAGE == 0 {
                thread::sleep(page_write);
            }
        }

        // Let the last page finish writing before the stop packet
        thread::sleep(page_write);

        self.send_packet(&DfuRequest::StopData.to_le_bytes())?;

        self.emit(&DfuEvent::Progress {
            percent: 100,
            done: true,
            message: String::new(),
        });

        Ok(())
    }

    /// Ask the device to validate the received image.
    ///
    /// The serial bootloader validates as part of handling STOP, so there
    /// is no packet to send; this exists for parity with transports that
    /// need one.
    pub fn send_validate_firmware(&mut self) -> Result<()> {
        Ok(())
    }

    /// Activate the new firmware.
    ///
    /// Blocks for the worst-case activation time: a dual-bank bootloader
    /// erases bank 0 and copies the staged image across, and reopening the
    /// port during that window would pin-reset the device mid-write.
    pub fn send_activate_firmware(&mut self) -> Result<()> {
        info!("Activating new firmware");
        thread::sleep(self.activate_wait_time());
        Ok(())
    }

    /// Erase wait derived from the session's total image size.
    pub fn erase_wait_time(&self) -> Duration {
        self.config.timing.erase_wait_time(self.session.total_size)
    }

    /// Activation wait derived from the session's image layout.
    ///
    /// The bank-to-bank copy is skipped only for a single-bank bootloader
    /// updating no softdevice; the bootloader settings page is still
    /// rewritten.
    pub fn activate_wait_time(&self) -> Duration {
        let skip_bank_copy = self.config.single_bank && self.session.sd_size == 0;
        self.config
            .timing
            .activate_wait_time(self.session.total_size, skip_bank_copy)
    }
}

// Native-specific entry points
#[cfg(feature = "native")]
mod native_impl {
    use std::thread;

    use log::info;

    use super::{
        DTR_PULSE_TIME, DTR_RESET_WAIT_TIME, DfuConfig, DfuTransport,
        SERIAL_PORT_OPEN_WAIT_TIME, TOUCH_RESET_WAIT_TIME,
    };
    use crate::error::Result;
    use crate::port::{NativePort, Port};

    impl DfuTransport<NativePort> {
        /// Open the configured serial port and reset the device into DFU
        /// mode.
        ///
        /// With a touch baud rate configured, the port is pulsed open at
        /// that rate and closed again, and the device is given time to
        /// reboot into DFU mode before the real connection is made.
        /// Without one, the board is reset by toggling DTR after opening.
        pub fn open(config: DfuConfig) -> Result<Self> {
            if let Some(touch_baud) = config.serial.touch_baud {
                let mut touch_port = NativePort::open_at(&config.serial, touch_baud)?;
                thread::sleep(SERIAL_PORT_OPEN_WAIT_TIME);
                touch_port.close()?;
                info!("Touched serial port {}", config.serial.port_name);
                thread::sleep(TOUCH_RESET_WAIT_TIME);
            }

            let mut port = NativePort::open(&config.serial)?;
            info!("Opened serial port {}", config.serial.port_name);
            thread::sleep(SERIAL_PORT_OPEN_WAIT_TIME);

            if config.serial.touch_baud.is_none() {
                // Pulse DTR to reset the board into DFU mode
                port.set_dtr(false)?;
                thread::sleep(DTR_PULSE_TIME);
                port.set_dtr(true)?;
                thread::sleep(DTR_RESET_WAIT_TIME);
            }

            Ok(Self::new(port, config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::hci::{HciPacket, PacketHeader};
    use crate::protocol::slip::SlipDecoder;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Opt into log output for failing runs via `RUST_LOG`.
    fn init_test_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Device acknowledgement frame for a packet with sequence `seq`.
    fn ack_for(seq: u8) -> Vec<u8> {
        let header = PacketHeader {
            seq: 0,
            ack: (seq + 1) % 8,
            integrity_check: false,
            reliable: false,
            packet_type: 0,
            payload_len: 0,
        };
        let mut frame = vec![0xC0];
        frame.extend_from_slice(&header.pack());
        frame.push(0xC0);
        frame
    }

    /// Acknowledgements for packets 1..=n of a fresh session.
    fn acks(n: u8) -> Vec<u8> {
        (1..=n).flat_map(ack_for).collect()
    }

    /// Config with zeroed pacing so tests do not sleep between packets.
    fn fast_config() -> DfuConfig {
        DfuConfig {
            timing: FlashTiming {
                word_write_time: Duration::ZERO,
                ..FlashTiming::default()
            },
            link: LinkConfig {
                ack_timeout: Duration::from_millis(20),
                ..LinkConfig::default()
            },
            ..DfuConfig::default()
        }
    }

    /// Decode every packet the transport wrote.
    fn written_packets(written: &[u8]) -> Vec<HciPacket> {
        let mut decoder = SlipDecoder::new();
        decoder.extend(written);
        decoder
            .decode()
            .iter()
            .map(|frame| HciPacket::decode(frame).expect("valid written frame"))
            .collect()
    }

    #[test]
    fn test_init_packet_wire_shape() {
        let port = MockPort::new(&acks(1));
        let mut dfu = DfuTransport::new(port, fast_config());

        dfu.send_init_packet(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let packets = written_packets(&dfu.port().written);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header().seq, 1);
        // INIT opcode, metadata, two bytes of zero padding
        assert_eq!(
            packets[0].payload(),
            &[0x01, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00]
        );
    }

    #[test]
    fn test_start_dfu_wire_shape_and_session() {
        let port = MockPort::new(&acks(1));
        let mut dfu = DfuTransport::new(port, fast_config());

        dfu.send_start_dfu(UpdateMode::APPLICATION, 0, 0, 0x0400)
            .unwrap();

        let packets = written_packets(&dfu.port().written);
        assert_eq!(packets.len(), 1);
        let mut expected = vec![0x03, 0x00, 0x00, 0x00]; // START opcode
        expected.extend_from_slice(&[0x04, 0x00, 0x00, 0x00]); // mode: application
        expected.extend_from_slice(&[0x00; 4]); // softdevice size
        expected.extend_from_slice(&[0x00; 4]); // bootloader size
        expected.extend_from_slice(&[0x00, 0x04, 0x00, 0x00]); // app size
        assert_eq!(packets[0].payload(), expected.as_slice());

        // The session now paces against the announced size, not the default
        assert_eq!(dfu.erase_wait_time(), Duration::from_millis(500));
    }

    #[test]
    fn test_firmware_chunking_sequence_and_stop() {
        init_test_logging();
        // 1100 bytes -> chunks of 512, 512, 76, then STOP
        let firmware: Vec<u8> = (0..1100u32).map(|i| (i % 256) as u8).collect();
        let port = MockPort::new(&acks(4));
        let mut dfu = DfuTransport::new(port, fast_config());

        dfu.send_firmware(&firmware).unwrap();

        let packets = written_packets(&dfu.port().written);
        assert_eq!(packets.len(), 4);

        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(usize::from(packet.header().seq), i + 1);
        }

        assert_eq!(&packets[0].payload()[..4], &[0x04, 0x00, 0x00, 0x00]);
        assert_eq!(packets[0].payload().len(), 4 + 512);
        assert_eq!(&packets[0].payload()[4..], &firmware[..512]);
        assert_eq!(packets[1].payload().len(), 4 + 512);
        assert_eq!(packets[2].payload().len(), 4 + 76);
        assert_eq!(&packets[2].payload()[4..], &firmware[1024..]);
        // STOP carries the opcode alone
        assert_eq!(packets[3].payload(), &[0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_firmware_progress_percentages() {
        let firmware = vec![0xA5u8; 3 * DFU_PACKET_MAX_SIZE];
        let port = MockPort::new(&acks(4));
        let mut dfu = DfuTransport::new(port, fast_config());

        let events: Rc<RefCell<Vec<DfuEvent>>> = Rc::default();
        let sink = Rc::clone(&events);
        dfu.set_event_listener(move |event| sink.borrow_mut().push(event.clone()));

        dfu.send_firmware(&firmware).unwrap();

        let events = events.borrow();
        let percents: Vec<(u8, bool)> = events
            .iter()
            .map(|event| match event {
                DfuEvent::Progress { percent, done, .. } => (*percent, *done),
                DfuEvent::Timeout { .. } => panic!("unexpected timeout"),
            })
            .collect();
        assert_eq!(
            percents,
            vec![(0, false), (33, false), (66, false), (100, false), (100, true)]
        );
    }

    #[test]
    fn test_timeouts_reach_listener_and_abort() {
        init_test_logging();
        let port = MockPort::silent();
        let mut dfu = DfuTransport::new(port, fast_config());

        let timeouts = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&timeouts);
        dfu.set_event_listener(move |event| {
            if matches!(event, DfuEvent::Timeout { .. }) {
                *sink.borrow_mut() += 1;
            }
        });

        let err = dfu.send_init_packet(&[0x00]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::RetryExhausted { attempts: 4 }
        ));
        assert_eq!(*timeouts.borrow(), 4);
    }

    #[test]
    fn test_activate_wait_single_bank_fast_path() {
        let mut config = fast_config();
        config.single_bank = true;
        let dfu = DfuTransport::new(MockPort::silent(), config);

        // No softdevice in the (default) session: only the settings page,
        // and the page write is zeroed by the test timing model
        assert_eq!(
            dfu.activate_wait_time(),
            crate::dfu::timing::FLASH_PAGE_ERASE_TIME
        );
    }

    #[test]
    fn test_activate_wait_dual_bank_includes_copy() {
        let dfu = DfuTransport::new(MockPort::silent(), fast_config());
        // Default session assumes the maximum application size
        let timing = FlashTiming {
            word_write_time: Duration::ZERO,
            ..FlashTiming::default()
        };
        assert_eq!(
            dfu.activate_wait_time(),
            timing.activate_wait_time(167_936, false)
        );
    }

    #[test]
    fn test_close_releases_port() {
        let mut dfu = DfuTransport::new(MockPort::new(&acks(1)), fast_config());
        dfu.close().unwrap();
        // The mock drops its scripted response on close; a send now times out
        let err = dfu.send_init_packet(&[0x00]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::RetryExhausted { .. }
        ));
    }
}
