//! HCI packet codec for the serial DFU protocol.
//!
//! Every SLIP frame carries one three-wire HCI packet:
//!
//! ```text
//! Packet format (before escaping):
//! +--------+---------------+--------+
//! | Header |    Payload    | CRC16  |
//! +--------+---------------+--------+
//! |   4    |    0..4095    |   2    |
//! +--------+---------------+--------+
//! ```
//!
//! Header bit layout, resolved against traffic captured from a live device:
//!
//! ```text
//! byte 0: bits 0-2  sequence number
//!         bits 3-5  acknowledgement number (peer's next expected sequence)
//!         bit  6    data-integrity-check-present flag
//!         bit  7    reliable-packet flag
//! byte 1: bits 0-3  packet type
//!         bits 4-7  payload length, low nibble
//! byte 2:           payload length, bits 4-11
//! byte 3:           checksum closing the header: two's complement of the
//!                   sum of bytes 0-2, so all four bytes sum to 0 mod 256
//! ```
//!
//! The CRC16 trailer (initial value 0xFFFF, little-endian on the wire) covers
//! the unescaped header+payload and is present whenever the integrity flag is
//! set; device acknowledgements are bare 4-byte headers without it.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::protocol::crc::{CRC_INIT, crc16_ccitt};
use crate::protocol::slip::{self, control};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 4;

/// CRC trailer size in bytes.
pub const CRC_LEN: usize = 2;

/// Maximum payload length representable in the 12-bit length field.
pub const MAX_PAYLOAD_LEN: usize = 0x0FFF;

/// Three-wire packet type used for every DFU packet (vendor specific).
///
/// The DFU control kinds (INIT/START/DATA/STOP) are u32 opcodes at the start
/// of the payload, not values of this field; see [`crate::dfu::DfuRequest`].
pub const PACKET_TYPE_VENDOR_SPECIFIC: u8 = 14;

/// Fixed 4-byte packet header with explicit fields for each bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sequence number, 0-7.
    pub seq: u8,
    /// Acknowledgement number, 0-7. In a response this is the sender's next
    /// expected sequence number; `ack == (seq + 1) % 8` accepts `seq`.
    pub ack: u8,
    /// Whether a CRC16 trailer follows the payload.
    pub integrity_check: bool,
    /// Whether the packet takes part in the acknowledgement scheme.
    pub reliable: bool,
    /// Packet type, 0-15.
    pub packet_type: u8,
    /// Payload length in bytes, 0-4095.
    pub payload_len: u16,
}

impl PacketHeader {
    /// Pack the header into its 4-byte wire form, computing the checksum.
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let b0 = (self.seq & 0x07)
            | ((self.ack & 0x07) << 3)
            | (u8::from(self.integrity_check) << 6)
            | (u8::from(self.reliable) << 7);
        #[allow(clippy::cast_possible_truncation)] // masked to nibble / byte
        let b1 = (self.packet_type & 0x0F) | (((self.payload_len & 0x000F) as u8) << 4);
        #[allow(clippy::cast_possible_truncation)]
        let b2 = ((self.payload_len >> 4) & 0x00FF) as u8;
        [b0, b1, b2, Self::checksum(b0, b1, b2)]
    }

    /// Parse and validate a 4-byte wire header.
    pub fn unpack(bytes: [u8; HEADER_LEN]) -> Result<Self> {
        let [b0, b1, b2, b3] = bytes;
        let expected = Self::checksum(b0, b1, b2);
        if b3 != expected {
            return Err(Error::HeaderChecksum {
                expected,
                actual: b3,
            });
        }

        Ok(Self {
            seq: b0 & 0x07,
            ack: (b0 >> 3) & 0x07,
            integrity_check: (b0 >> 6) & 0x01 == 1,
            reliable: (b0 >> 7) & 0x01 == 1,
            packet_type: b1 & 0x0F,
            payload_len: u16::from(b1 >> 4) | (u16::from(b2) << 4),
        })
    }

    /// Checksum byte: two's complement of the sum of the first three bytes.
    fn checksum(b0: u8, b1: u8, b2: u8) -> u8 {
        b0.wrapping_add(b1).wrapping_add(b2).wrapping_neg()
    }
}

/// A single HCI packet, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciPacket {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl HciPacket {
    /// Build an outbound packet carrying `payload` with sequence number
    /// `seq`.
    ///
    /// Outbound packets always request reliable delivery with an integrity
    /// check, and advertise `(seq + 1) % 8` as the next expected sequence
    /// number from the peer.
    pub fn build(packet_type: u8, payload: &[u8], seq: u8) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        let seq = seq % 8;
        #[allow(clippy::cast_possible_truncation)] // <= MAX_PAYLOAD_LEN
        let header = PacketHeader {
            seq,
            ack: (seq + 1) % 8,
            integrity_check: true,
            reliable: true,
            packet_type: packet_type & 0x0F,
            payload_len: payload.len() as u16,
        };
        Self {
            header,
            payload: payload.to_vec(),
        }
    }

    /// The packet header.
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// The unescaped payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledgement number carried by this packet.
    pub fn ack(&self) -> u8 {
        self.header.ack
    }

    /// Serialize to the delimited, escaped wire form.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_wire(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + self.payload.len() + CRC_LEN);
        body.extend_from_slice(&self.header.pack());
        body.extend_from_slice(&self.payload);

        let crc = crc16_ccitt(&body, CRC_INIT);
        body.write_u16::<LittleEndian>(crc).unwrap();

        let mut wire = Vec::with_capacity(body.len() + 2);
        wire.push(control::END);
        wire.extend_from_slice(&slip::encode(&body));
        wire.push(control::END);
        wire
    }

    /// Decode a received frame into a packet.
    ///
    /// Accepts either a bare frame body (as produced by
    /// [`slip::SlipDecoder::decode`]) or a fully delimited frame; surrounding
    /// END markers are stripped before unescaping.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut frame = frame;
        if frame.first() == Some(&control::END) {
            frame = &frame[1..];
        }
        if frame.last() == Some(&control::END) {
            frame = &frame[..frame.len() - 1];
        }

        let data = slip::decode_escapes(frame)?;
        if data.len() < HEADER_LEN {
            return Err(Error::TruncatedPacket { len: data.len() });
        }

        let header = PacketHeader::unpack([data[0], data[1], data[2], data[3]])?;
        let payload_end = HEADER_LEN + header.payload_len as usize;
        let expected_len = payload_end + if header.integrity_check { CRC_LEN } else { 0 };
        if data.len() != expected_len {
            return Err(Error::TruncatedPacket { len: data.len() });
        }

        if header.integrity_check {
            let expected = crc16_ccitt(&data[..payload_end], CRC_INIT);
            let actual = LittleEndian::read_u16(&data[payload_end..]);
            if expected != actual {
                return Err(Error::CrcMismatch { expected, actual });
            }
        }

        Ok(Self {
            header,
            payload: data[HEADER_LEN..payload_end].to_vec(),
        })
    }
}
