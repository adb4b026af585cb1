//! Generic register access with bounded retry
//!
//! Both sensor families address their registers the same way: a control byte
//! selecting the base register is written first, followed either by payload
//! bytes (register write) or by a separate read of N bytes (register read,
//! auto-incrementing). This module owns that discipline, including the
//! retry policy, so the drivers cannot drift apart in error behavior.

use log::debug;
use thiserror_no_std::Error;

use crate::bus::{BusError, Transport};

/// Attempts per register operation (one try plus two retries).
pub const MAX_ATTEMPTS: u8 = 3;

/// Largest payload a single register write may carry.
pub const MAX_WRITE_PAYLOAD: usize = 9;

/// How a register number becomes the first byte of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlByte {
    /// Bits always set in the control byte (command / auto-increment bits).
    pub prefix: u8,
    /// Bits of the register number carried in the control byte.
    pub mask: u8,
}

impl ControlByte {
    pub const fn encode(self, register: u8) -> u8 {
        self.prefix | (register & self.mask)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    #[error("bus failure: {0}")]
    Bus(BusError),
    #[error("payload of {len} bytes exceeds the write buffer")]
    PayloadTooLong { len: usize },
}

impl From<BusError> for RegisterError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

/// Outcome of one attempt.
enum Attempt {
    /// Give up immediately (device absent).
    Fatal(BusError),
    /// Worth trying again.
    Retry(BusError),
}

/// Run `attempt` up to [`MAX_ATTEMPTS`] times.
fn with_retry<R>(
    address: u8,
    mut attempt: impl FnMut() -> Result<R, Attempt>,
) -> Result<R, BusError> {
    let mut tries = 1;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(err)) => return Err(err),
            Err(Attempt::Retry(err)) if tries < MAX_ATTEMPTS => {
                debug!(
                    "i2c 0x{:02x}: attempt {} failed ({}), retrying",
                    address, tries, err
                );
                tries += 1;
            }
            Err(Attempt::Retry(err)) => return Err(err),
        }
    }
}

/// Classify the result of the control-byte write that opens every operation.
///
/// A NACK on the address phase means nobody is listening at that address;
/// retrying would only slow down the poll cycle.
fn opening_write(result: Result<(), BusError>) -> Result<(), Attempt> {
    match result {
        Ok(()) => Ok(()),
        Err(BusError::AddressNack) => Err(Attempt::Fatal(BusError::AddressNack)),
        Err(err) => Err(Attempt::Retry(err)),
    }
}

/// A device at a fixed address on one transport.
pub struct RegisterDevice<T> {
    bus: T,
    address: u8,
    control: ControlByte,
}

impl<T: Transport> RegisterDevice<T> {
    pub const fn new(bus: T, address: u8, control: ControlByte) -> Self {
        Self {
            bus,
            address,
            control,
        }
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Give the transport back.
    pub fn release(self) -> T {
        self.bus
    }

    pub fn bus_mut(&mut self) -> &mut T {
        &mut self.bus
    }

    /// Read `buf.len()` consecutive registers starting at `register`.
    pub fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let address = self.address;
        let control = [self.control.encode(register)];
        let bus = &mut self.bus;

        with_retry(address, || {
            opening_write(bus.transfer(address, &control))?;
            bus.receive(address, buf).map_err(Attempt::Retry)
        })
    }

    /// Write `values` to consecutive registers starting at `register` in a
    /// single transaction.
    pub fn write_registers(&mut self, register: u8, values: &[u8]) -> Result<(), RegisterError> {
        if values.len() > MAX_WRITE_PAYLOAD {
            return Err(RegisterError::PayloadTooLong { len: values.len() });
        }

        let mut frame = [0u8; MAX_WRITE_PAYLOAD + 1];
        frame[0] = self.control.encode(register);
        frame[1..=values.len()].copy_from_slice(values);
        let frame = &frame[..=values.len()];

        self.send(frame)?;
        Ok(())
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), RegisterError> {
        self.write_registers(register, &[value])
    }

    /// Send a bare command byte with no payload (special-function commands
    /// such as clearing a pending interrupt).
    pub fn send_command(&mut self, command: u8) -> Result<(), BusError> {
        self.send(&[command])
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), BusError> {
        let address = self.address;
        let bus = &mut self.bus;
        with_retry(address, || opening_write(bus.transfer(address, frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::TCS3472;
    use crate::sim::SimulatedSensor;

    const TCS_CONTROL: ControlByte = ControlByte {
        prefix: 0xa0,
        mask: 0x1f,
    };

    fn device(sim: SimulatedSensor) -> RegisterDevice<SimulatedSensor> {
        RegisterDevice::new(sim, 0x29, TCS_CONTROL)
    }

    #[test]
    fn test_control_byte_encoding() {
        assert_eq!(TCS_CONTROL.encode(0x12), 0xb2);
        assert_eq!(TCS_CONTROL.encode(0xff), 0xbf);
        let direct = ControlByte {
            prefix: 0x00,
            mask: 0xff,
        };
        assert_eq!(direct.encode(0x92), 0x92);
    }

    #[test]
    fn test_read_retries_transient_failures() {
        let mut sim = SimulatedSensor::new(&TCS3472);
        sim.fail_next(2);
        let mut dev = device(sim);

        let mut id = [0u8; 1];
        dev.read_registers(0x12, &mut id).unwrap();
        assert_eq!(id[0], 0x44);
    }

    #[test]
    fn test_read_gives_up_after_three_attempts() {
        let mut sim = SimulatedSensor::new(&TCS3472);
        sim.fail_next(3);
        let mut dev = device(sim);

        let mut id = [0u8; 1];
        assert_eq!(dev.read_registers(0x12, &mut id), Err(BusError::Bus));
        assert_eq!(dev.release().transaction_count(), 3);
    }

    #[test]
    fn test_address_nack_is_not_retried() {
        let mut dev = device(SimulatedSensor::absent(&TCS3472));

        let mut id = [0u8; 1];
        assert_eq!(dev.read_registers(0x12, &mut id), Err(BusError::AddressNack));
        assert_eq!(dev.release().transaction_count(), 1);
    }

    #[test]
    fn test_write_registers_auto_increments() {
        let mut dev = device(SimulatedSensor::new(&TCS3472));
        dev.write_registers(0x04, &[0xff, 0xff, 0x00, 0x00]).unwrap();

        let sim = dev.release();
        assert_eq!(sim.register(0x04), 0xff);
        assert_eq!(sim.register(0x05), 0xff);
        assert_eq!(sim.register(0x06), 0x00);
        assert_eq!(sim.register(0x07), 0x00);
    }

    #[test]
    fn test_oversized_payload_rejected_without_bus_traffic() {
        let mut dev = device(SimulatedSensor::new(&TCS3472));
        let payload = [0u8; MAX_WRITE_PAYLOAD + 1];

        assert_eq!(
            dev.write_registers(0x00, &payload),
            Err(RegisterError::PayloadTooLong {
                len: MAX_WRITE_PAYLOAD + 1
            })
        );
        assert_eq!(dev.release().transaction_count(), 0);
    }

    #[test]
    fn test_send_command_retries() {
        let mut sim = SimulatedSensor::new(&TCS3472);
        sim.fail_next(1);
        let mut dev = device(sim);
        assert!(dev.send_command(0xe6).is_ok());
        assert_eq!(dev.release().transaction_count(), 2);
    }
}
