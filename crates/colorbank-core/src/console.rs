//! Byte-stream console port
//!
//! The control loop reads operator input one byte at a time and writes
//! protocol lines back. Formatted output goes through `core::fmt::Write`;
//! raw echo of input bytes goes through [`Console::write_bytes`] since the
//! accepted input range is not restricted to valid UTF-8.

use core::fmt;

use embedded_io::{Read, ReadReady, Write, WriteReady};

pub trait Console: fmt::Write {
    /// Next pending input byte, if any. Never blocks.
    fn read_byte(&mut self) -> Option<u8>;

    fn write_bytes(&mut self, bytes: &[u8]) -> fmt::Result;

    /// Bytes that can currently be written without blocking.
    fn write_headroom(&mut self) -> usize;
}

/// [`Console`] over any `embedded-io` serial port (UART, USB-serial).
///
/// `embedded-io` only tells whether a write would block, so headroom is
/// reported as the port's transmit buffer size while it is ready and zero
/// otherwise.
pub struct SerialConsole<P> {
    port: P,
    tx_capacity: usize,
}

impl<P> SerialConsole<P>
where
    P: Read + ReadReady + Write + WriteReady,
{
    pub const fn new(port: P, tx_capacity: usize) -> Self {
        Self { port, tx_capacity }
    }

    pub fn release(self) -> P {
        self.port
    }
}

impl<P> fmt::Write for SerialConsole<P>
where
    P: Read + ReadReady + Write + WriteReady,
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes())
    }
}

impl<P> Console for SerialConsole<P>
where
    P: Read + ReadReady + Write + WriteReady,
{
    fn read_byte(&mut self) -> Option<u8> {
        if !self.port.read_ready().ok()? {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> fmt::Result {
        self.port.write_all(bytes).map_err(|_| fmt::Error)
    }

    fn write_headroom(&mut self) -> usize {
        match self.port.write_ready() {
            Ok(true) => self.tx_capacity,
            _ => 0,
        }
    }
}
