//! Stop-and-wait reliable delivery over the SLIP/HCI framing.
//!
//! Exactly one packet is in flight at a time: a packet is written, the link
//! blocks reading the channel until a complete frame arrives or the
//! acknowledgement timeout elapses, and the packet is resent until the
//! device accepts it or the attempt budget runs out. The window of one
//! guarantees the device never sees data out of order while its CPU stalls
//! on flash writes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::event::DfuEvent;
use crate::port::Port;
use crate::protocol::hci::{HciPacket, PACKET_TYPE_VENDOR_SPECIFIC};
use crate::protocol::slip::SlipDecoder;

/// Default acknowledgement timeout.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum send attempts for one packet (first try plus three retries).
pub const MAX_SEND_ATTEMPTS: u32 = 4;

/// Read chunk size while waiting for an acknowledgement frame.
const READ_CHUNK: usize = 64;

/// Reliable link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long to wait for an acknowledgement frame before a retry.
    pub ack_timeout: Duration,
    /// Send attempts per packet before giving up.
    pub max_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: ACK_TIMEOUT,
            max_attempts: MAX_SEND_ATTEMPTS,
        }
    }
}

/// Outgoing 3-bit sequence counter, scoped to one transfer session.
///
/// Packets are numbered by pre-increment, so the first packet of a session
/// carries sequence number 1. The counter rewinds to 0 when an
/// acknowledgement wait times out, since the device is assumed to have lost
/// synchronization.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    /// Advance and return the sequence number for the next packet.
    pub fn next(&mut self) -> u8 {
        self.0 = (self.0 + 1) % 8;
        self.0
    }

    /// Rewind to 0.
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// The sequence number most recently handed out.
    pub fn current(&self) -> u8 {
        self.0
    }
}

/// Stop-and-wait sender borrowing the channel and the session's sequence
/// counter for a series of packets.
pub struct ReliableLink<'a, P: Port> {
    port: &'a mut P,
    seq: &'a mut SequenceCounter,
    config: LinkConfig,
    decoder: SlipDecoder,
    pending: VecDeque<Vec<u8>>,
}

impl<'a, P: Port> ReliableLink<'a, P> {
    /// Create a link over an open port.
    pub fn new(port: &'a mut P, seq: &'a mut SequenceCounter, config: LinkConfig) -> Self {
        Self {
            port,
            seq,
            config,
            decoder: SlipDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// Send one payload reliably.
    ///
    /// Assigns the next sequence number, writes the framed packet, and
    /// blocks until the device acknowledges it with the following sequence
    /// number. Invalid frames and mismatched acknowledgements trigger a
    /// resend; a timed-out wait additionally rewinds the sequence counter
    /// and reports a [`DfuEvent::Timeout`] to `events`. Fails with
    /// [`Error::RetryExhausted`] once `max_attempts` sends have gone
    /// unacknowledged, and with the underlying error on channel failure.
    pub fn send<F>(&mut self, payload: &[u8], mut events: F) -> Result<()>
    where
        F: FnMut(&DfuEvent),
    {
        let seq = self.seq.next();
        let packet = HciPacket::build(PACKET_TYPE_VENDOR_SPECIFIC, payload, seq);
        let wire = packet.to_wire();
        let expected = (seq + 1) % 8;

        for attempt in 1..=self.config.max_attempts {
            trace!(
                "PC -> target: seq {seq}, {} bytes (attempt {attempt})",
                wire.len()
            );
            self.port.write_all(&wire)?;
            self.port.flush()?;

            match self.wait_for_ack() {
                Ok(ack) if ack == expected => {
                    trace!("packet seq {seq} acknowledged");
                    return Ok(());
                },
                Ok(ack) => {
                    debug!("ack mismatch: got {ack}, expected {expected}; resending");
                },
                Err(Error::Timeout(message)) => {
                    // The device is assumed to have lost sync; restart
                    // numbering from 0 for whatever is sent next.
                    self.seq.reset();
                    warn!("{message}");
                    events(&DfuEvent::Timeout { message });
                },
                Err(e) if e.is_frame_error() => {
                    debug!("discarding invalid frame: {e}; resending");
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetryExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// Block until a complete frame arrives and return its acknowledgement
    /// number.
    ///
    /// The first frame observed is taken as the response; the serial DFU
    /// bootloader sends nothing unsolicited while a packet is outstanding.
    fn wait_for_ack(&mut self) -> Result<u8> {
        let deadline = Instant::now() + self.config.ack_timeout;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            self.pending.extend(self.decoder.decode());
            if let Some(frame) = self.pending.pop_front() {
                let packet = HciPacket::decode(&frame)?;
                trace!("PC <- target: ack {}", packet.ack());
                return Ok(packet.ack());
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout(
                    "Timed out waiting for acknowledgement from device.".to_string(),
                ));
            }

            match self.port.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::hci::PacketHeader;

    fn test_config() -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(20),
            max_attempts: MAX_SEND_ATTEMPTS,
        }
    }

    /// Device acknowledgement: bare header frame carrying `ack`.
    fn ack_frame(ack: u8) -> Vec<u8> {
        let header = PacketHeader {
            seq: 0,
            ack,
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

    #[test]
    fn test_ack_accepts_and_leaves_counter() {
        // First packet carries seq 1, so the device acks with 2
        let mut port = MockPort::new(&ack_frame(2));
        let mut seq = SequenceCounter::default();

        let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
        link.send(&[0x01, 0x02], |_| {}).expect("acknowledged");

        assert_eq!(seq.current(), 1);
        assert!(!port.written.is_empty());
    }

    #[test]
    fn test_sequence_advances_across_packets() {
        let mut responses = Vec::new();
        responses.extend_from_slice(&ack_frame(2));
        responses.extend_from_slice(&ack_frame(3));
        let mut port = MockPort::new(&responses);
        let mut seq = SequenceCounter::default();

        let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
        link.send(&[0x01], |_| {}).expect("first acknowledged");
        link.send(&[0x02], |_| {}).expect("second acknowledged");

        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn test_ack_mismatch_resends_until_accepted() {
        let mut responses = Vec::new();
        responses.extend_from_slice(&ack_frame(5)); // wrong
        responses.extend_from_slice(&ack_frame(2)); // accepts seq 1
        let mut port = MockPort::new(&responses);
        let mut seq = SequenceCounter::default();

        let packet_wire_len;
        {
            let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
            link.send(&[0xAB], |_| {}).expect("accepted on second attempt");
            packet_wire_len = HciPacket::build(PACKET_TYPE_VENDOR_SPECIFIC, &[0xAB], 1)
                .to_wire()
                .len();
        }

        // The same wire bytes were written twice
        assert_eq!(port.written.len(), 2 * packet_wire_len);
        assert_eq!(
            &port.written[..packet_wire_len],
            &port.written[packet_wire_len..]
        );
    }

    #[test]
    fn test_corrupt_frame_treated_as_missed_ack() {
        let mut responses = Vec::new();
        // A frame with a broken escape sequence, then a valid acknowledgement
        responses.extend_from_slice(&[0xC0, 0xDB, 0x42, 0xC0]);
        responses.extend_from_slice(&ack_frame(2));
        let mut port = MockPort::new(&responses);
        let mut seq = SequenceCounter::default();

        let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
        link.send(&[0x01], |_| {}).expect("recovers from bad frame");
    }

    #[test]
    fn test_silent_device_exhausts_exactly_four_attempts() {
        let mut port = MockPort::silent();
        let mut seq = SequenceCounter::default();
        let mut timeouts = 0;

        let err = {
            let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
            link.send(&[0x55; 8], |event| {
                assert!(matches!(event, DfuEvent::Timeout { .. }));
                timeouts += 1;
            })
            .unwrap_err()
        };

        assert!(matches!(err, Error::RetryExhausted { attempts: 4 }));
        assert_eq!(timeouts, 4);

        let wire_len = HciPacket::build(PACKET_TYPE_VENDOR_SPECIFIC, &[0x55; 8], 1)
            .to_wire()
            .len();
        assert_eq!(port.written.len(), 4 * wire_len);
    }

    #[test]
    fn test_timeout_rewinds_sequence_counter() {
        let mut port = MockPort::silent();
        let mut seq = SequenceCounter::default();
        // Pretend a few packets already went out this session
        seq.next();
        seq.next();
        seq.next();

        let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
        let _ = link.send(&[0x01], |_| {});

        assert_eq!(seq.current(), 0);
    }

    #[test]
    fn test_io_error_is_fatal_not_retried() {
        struct BrokenPort(MockPort);

        impl std::io::Read for BrokenPort {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                ))
            }
        }
        impl std::io::Write for BrokenPort {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                self.0.flush()
            }
        }
        impl Port for BrokenPort {
            fn set_timeout(&mut self, t: Duration) -> Result<()> {
                self.0.set_timeout(t)
            }
            fn timeout(&self) -> Duration {
                self.0.timeout()
            }
            fn baud_rate(&self) -> u32 {
                self.0.baud_rate()
            }
            fn clear_buffers(&mut self) -> Result<()> {
                self.0.clear_buffers()
            }
            fn name(&self) -> &str {
                self.0.name()
            }
            fn set_dtr(&mut self, level: bool) -> Result<()> {
                self.0.set_dtr(level)
            }
            fn close(&mut self) -> Result<()> {
                self.0.close()
            }
        }

        let mut port = BrokenPort(MockPort::silent());
        let mut seq = SequenceCounter::default();

        let mut link = ReliableLink::new(&mut port, &mut seq, test_config());
        let err = link.send(&[0x01], |_| {}).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // A single write happened; the I/O failure was not retried
        assert_eq!(
            port.0.written.len(),
            HciPacket::build(PACKET_TYPE_VENDOR_SPECIFIC, &[0x01], 1)
                .to_wire()
                .len()
        );
    }
}
