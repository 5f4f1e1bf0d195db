//! Packet transport: SLIP framing, HCI packet codec, reliable link.

pub mod crc;
pub mod hci;
pub mod link;
pub mod slip;

// Re-export common types
pub use hci::{HciPacket, PacketHeader};
pub use link::{LinkConfig, ReliableLink, SequenceCounter};
pub use slip::SlipDecoder;
