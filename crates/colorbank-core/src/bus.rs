//! Bus backends
//!
//! Every sensor slot talks to its device through a [`Transport`]: "write N
//! bytes to an address" and "read N bytes from an address", failing with a
//! [`BusError`]. No retry happens at this layer; that is the job of
//! [`crate::register::RegisterDevice`].
//!
//! Two interchangeable implementations exist, both expressed as
//! `embedded_hal::i2c::I2c`:
//!
//! - the shared hardware controller, handed out per slot via
//!   [`crate::shared_bus::CriticalSectionDevice`]
//! - one bit-banged [`crate::soft_i2c::SoftI2c`] channel per device that is
//!   not on the hardware bus
//!
//! [`BusChannel`] erases the difference so that a bank of slots has a single
//! concrete type.

use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use thiserror_no_std::Error;

/// Transport-level failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("address not acknowledged")]
    AddressNack,
    #[error("data not acknowledged")]
    DataNack,
    #[error("arbitration lost")]
    ArbitrationLoss,
    #[error("bus error (misplaced start/stop)")]
    Bus,
    #[error("transfer overrun")]
    Overrun,
    #[error("transfer failed")]
    Other,
}

impl From<ErrorKind> for BusError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => Self::AddressNack,
            ErrorKind::NoAcknowledge(_) => Self::DataNack,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLoss,
            ErrorKind::Bus => Self::Bus,
            ErrorKind::Overrun => Self::Overrun,
            _ => Self::Other,
        }
    }
}

impl i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Self::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            Self::Bus => ErrorKind::Bus,
            Self::Overrun => ErrorKind::Overrun,
            Self::Other => ErrorKind::Other,
        }
    }
}

/// Byte-oriented addressed transfers with a pass/fail result.
pub trait Transport {
    /// Write all of `bytes` to the device at `address` in one transaction.
    fn transfer(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// Read exactly `buf.len()` bytes from the device at `address`.
    fn receive(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError>;
}

impl<T: I2c> Transport for T {
    fn transfer(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        self.write(address, bytes)
            .map_err(|e| BusError::from(i2c::Error::kind(&e)))
    }

    fn receive(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.read(address, buf)
            .map_err(|e| BusError::from(i2c::Error::kind(&e)))
    }
}

/// Describes which transport a slot is wired to (reported in diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// The shared hardware controller.
    Hardware { frequency_hz: u32 },
    /// A bit-banged channel on its own pin pair.
    Software { sda: u8, scl: u8, frequency_hz: u32 },
}

impl BusKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hardware { .. } => "hw",
            Self::Software { .. } => "sw",
        }
    }
}

/// One slot's transport: either a handle on the shared hardware bus or its
/// own software channel.
pub enum BusChannel<H, S> {
    Hardware(H),
    Software(S),
}

impl<H: I2c, S: I2c> ErrorType for BusChannel<H, S> {
    type Error = BusError;
}

impl<H: I2c, S: I2c> I2c for BusChannel<H, S> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        match self {
            Self::Hardware(bus) => bus
                .transaction(address, operations)
                .map_err(|e| BusError::from(i2c::Error::kind(&e))),
            Self::Software(bus) => bus
                .transaction(address, operations)
                .map_err(|e| BusError::from(i2c::Error::kind(&e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedSensor;
    use crate::sensors::TCS3472;

    #[test]
    fn test_error_kind_round_trip() {
        for err in [
            BusError::AddressNack,
            BusError::DataNack,
            BusError::ArbitrationLoss,
            BusError::Bus,
            BusError::Overrun,
            BusError::Other,
        ] {
            assert_eq!(BusError::from(i2c::Error::kind(&err)), err);
        }
    }

    #[test]
    fn test_channel_dispatches_to_variant() {
        let mut hw: BusChannel<SimulatedSensor, SimulatedSensor> =
            BusChannel::Hardware(SimulatedSensor::new(&TCS3472));
        let mut sw: BusChannel<SimulatedSensor, SimulatedSensor> =
            BusChannel::Software(SimulatedSensor::absent(&TCS3472));

        let mut id = [0u8; 1];
        hw.transfer(0x29, &[0xa0 | 0x12]).unwrap();
        hw.receive(0x29, &mut id).unwrap();
        assert_eq!(id[0], 0x44);

        assert_eq!(sw.transfer(0x29, &[0xa0 | 0x12]), Err(BusError::AddressNack));
    }
}
