//! `embedded-io` view of the blocking UART

use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write, WriteReady};
use esp_hal::Blocking;
use esp_hal::uart::Uart;

/// Size of the UART transmit FIFO; reported as console headroom while the
/// FIFO has space.
pub const TX_FIFO_LEN: usize = 128;

pub struct UartPort {
    uart: Uart<'static, Blocking>,
}

impl UartPort {
    pub const fn new(uart: Uart<'static, Blocking>) -> Self {
        Self { uart }
    }
}

impl ErrorType for UartPort {
    type Error = ErrorKind;
}

impl Read for UartPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.uart.read(buf).map_err(|_| ErrorKind::Other)
    }
}

impl ReadReady for UartPort {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.uart.read_ready())
    }
}

impl Write for UartPort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.uart.write(buf).map_err(|_| ErrorKind::Other)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart.flush().map_err(|_| ErrorKind::Other)
    }
}

impl WriteReady for UartPort {
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.uart.write_ready())
    }
}
