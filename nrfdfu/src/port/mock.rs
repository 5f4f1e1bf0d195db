//! In-memory port for protocol tests.
//!
//! Keeps reads and writes independent: reads drain a pre-scripted response
//! queue, writes accumulate for inspection. An empty response queue behaves
//! like a silent device (reads time out).

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::slip::control::END;

pub(crate) struct MockPort {
    read_buf: VecDeque<u8>,
    pub(crate) written: Vec<u8>,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            written: Vec::new(),
            timeout: Duration::from_millis(10),
        }
    }

    pub(crate) fn silent() -> Self {
        Self::new(&[])
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        // Model a reactive serial device: surface at most one complete
        // SLIP frame per read, so a caller waiting on a single ack never
        // reads ahead and swallows acks meant for later packets.
        let mut n = 0;
        let mut seen_content = false;
        while n < buf.len() {
            let Some(byte) = self.read_buf.pop_front() else {
                break;
            };
            buf[n] = byte;
            n += 1;
            if byte == END {
                if seen_content {
                    break;
                }
            } else {
                seen_content = true;
            }
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.read_buf.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.read_buf.clear();
        Ok(())
    }
}
