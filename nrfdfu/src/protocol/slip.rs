//! SLIP framing for the serial DFU byte stream.
//!
//! The device multiplexes discrete packets over the raw UART byte stream by
//! delimiting each packet with a marker byte and escaping any occurrence of
//! the marker (or of the escape byte itself) inside packet contents:
//!
//! ```text
//! Wire layout:
//! +------+--------------------------------+------+
//! | 0xC0 |  escaped(header+payload+crc)   | 0xC0 |
//! +------+--------------------------------+------+
//!
//! Escaping: 0xC0 -> 0xDB 0xDC
//!           0xDB -> 0xDB 0xDD
//! ```
//!
//! [`encode`]/[`decode_escapes`] handle the byte substitution only; the
//! delimiters are added by the packet builder and stripped by
//! [`SlipDecoder`], which turns an incrementally fed byte stream back into
//! discrete frame bodies.

use crate::error::{Error, Result};

/// SLIP control bytes.
pub mod control {
    /// Frame delimiter.
    pub const END: u8 = 0xC0;
    /// Escape introducer.
    pub const ESC: u8 = 0xDB;
    /// Escaped substitute for an in-frame END byte.
    pub const ESC_END: u8 = 0xDC;
    /// Escaped substitute for an in-frame ESC byte.
    pub const ESC_ESC: u8 = 0xDD;
}

/// Escape all END and ESC bytes in `data`.
///
/// Does not add the frame delimiters; callers wrap the result in
/// [`control::END`] markers themselves.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        match byte {
            control::END => out.extend_from_slice(&[control::ESC, control::ESC_END]),
            control::ESC => out.extend_from_slice(&[control::ESC, control::ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out
}

/// Reverse the escaping applied by [`encode`].
///
/// Fails with [`Error::MalformedEscape`] if an ESC byte is followed by
/// anything other than `ESC_END`/`ESC_ESC`, or ends the buffer.
pub fn decode_escapes(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(byte) = iter.next() {
        if byte != control::ESC {
            out.push(byte);
            continue;
        }
        match iter.next() {
            Some(control::ESC_END) => out.push(control::END),
            Some(control::ESC_ESC) => out.push(control::ESC),
            found => return Err(Error::MalformedEscape { found }),
        }
    }
    Ok(out)
}

/// Incremental frame extractor for the receive direction.
///
/// Raw channel bytes are appended at the tail with [`extend`]; complete
/// marker-delimited frames are removed from the head by [`decode`]. Bytes of
/// a frame that has begun but not yet seen its terminating marker stay
/// buffered for the next call.
///
/// [`extend`]: SlipDecoder::extend
/// [`decode`]: SlipDecoder::decode
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buf: Vec<u8>,
}

impl SlipDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the channel.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract every complete frame currently in the buffer, in arrival
    /// order, removing their bytes.
    ///
    /// Returned frame bodies have the delimiters stripped but are still
    /// escaped; [`decode_escapes`] (or the packet codec, which calls it)
    /// resolves the substitutions. That keeps one corrupt frame from
    /// poisoning the rest of the batch.
    ///
    /// Line noise ahead of the first delimiter is discarded. Empty frames
    /// (back-to-back delimiters, as the device emits between packets) are
    /// skipped.
    pub fn decode(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        // A frame begins only after a delimiter; anything earlier is noise.
        match self.buf.iter().position(|&b| b == control::END) {
            Some(start) if start > 0 => {
                self.buf.drain(..start);
            },
            Some(_) => {},
            None => {
                self.buf.clear();
                return frames;
            },
        }

        // buf[0] is now a delimiter. The terminating delimiter of one frame
        // doubles as the opener of the next, so only the body is drained.
        while let Some(end) = self.buf[1..].iter().position(|&b| b == control::END) {
            let frame: Vec<u8> = self.buf[1..=end].to_vec();
            self.buf.drain(..=end);
            if !frame.is_empty() {
                frames.push(frame);
            }
        }

        frames
    }
}
