//! Software-emulated (bit-banged) I2C channel
//!
//! Drives two ordinary GPIO lines in open-drain style: a line is either
//! pulled low by us or released, in which case the external pull-up brings
//! it high. `OutputPin::set_high` therefore means "release" and the pins
//! must be configured as open-drain outputs with input enabled (so the line
//! level can be sampled for ACK bits, read data and clock stretching).
//!
//! Because nothing ever drives the lines high, this channel only works for
//! devices whose logic-high is supplied by external pull-up resistors.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use log::trace;
use thiserror_no_std::Error;

/// How many half clock periods a device may hold SCL low before we give up.
const CLOCK_STRETCH_LIMIT: u32 = 1000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftI2cError {
    #[error("address not acknowledged")]
    AddressNack,
    #[error("data byte not acknowledged")]
    DataNack,
    #[error("SCL held low by device for too long")]
    ClockStretchTimeout,
    #[error("GPIO access failed")]
    Pin,
}

impl i2c::Error for SoftI2cError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Self::ClockStretchTimeout => ErrorKind::Other,
            Self::Pin => ErrorKind::Bus,
        }
    }
}

/// Bit-banged I2C master on an SDA/SCL pin pair.
pub struct SoftI2c<SDA, SCL, D> {
    sda: SDA,
    scl: SCL,
    delay: D,
    half_period_ns: u32,
}

impl<SDA, SCL, D> SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    /// Create a channel clocked at roughly `frequency_hz` (100 kHz nominal).
    ///
    /// Both lines are released immediately so the bus idles high.
    pub fn new(sda: SDA, scl: SCL, delay: D, frequency_hz: u32) -> Self {
        let mut bus = Self {
            sda,
            scl,
            delay,
            half_period_ns: 500_000_000 / frequency_hz.max(1),
        };
        // A pin that fails here fails again in the first transaction's
        // START, which reports it as `SoftI2cError::Pin`.
        let _ = bus.sda.set_high();
        let _ = bus.scl.set_high();
        bus
    }

    /// Give the pins back.
    pub fn release(self) -> (SDA, SCL, D) {
        (self.sda, self.scl, self.delay)
    }

    fn half_delay(&mut self) {
        self.delay.delay_ns(self.half_period_ns);
    }

    fn set_sda(&mut self, released: bool) -> Result<(), SoftI2cError> {
        if released {
            self.sda.set_high().map_err(|_| SoftI2cError::Pin)
        } else {
            self.sda.set_low().map_err(|_| SoftI2cError::Pin)
        }
    }

    fn sda_is_high(&mut self) -> Result<bool, SoftI2cError> {
        self.sda.is_high().map_err(|_| SoftI2cError::Pin)
    }

    fn scl_low(&mut self) -> Result<(), SoftI2cError> {
        self.scl.set_low().map_err(|_| SoftI2cError::Pin)
    }

    /// Release SCL and wait until the line actually rises (clock stretching).
    fn scl_release(&mut self) -> Result<(), SoftI2cError> {
        self.scl.set_high().map_err(|_| SoftI2cError::Pin)?;
        let mut waited = 0;
        while self.scl.is_low().map_err(|_| SoftI2cError::Pin)? {
            if waited >= CLOCK_STRETCH_LIMIT {
                return Err(SoftI2cError::ClockStretchTimeout);
            }
            self.half_delay();
            waited += 1;
        }
        Ok(())
    }

    /// START, or repeated START when SCL is currently low.
    fn start(&mut self) -> Result<(), SoftI2cError> {
        self.set_sda(true)?;
        self.half_delay();
        self.scl_release()?;
        self.half_delay();
        self.set_sda(false)?;
        self.half_delay();
        self.scl_low()
    }

    fn stop(&mut self) -> Result<(), SoftI2cError> {
        self.set_sda(false)?;
        self.half_delay();
        self.scl_release()?;
        self.half_delay();
        self.set_sda(true)?;
        self.half_delay();
        Ok(())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), SoftI2cError> {
        self.set_sda(bit)?;
        self.half_delay();
        self.scl_release()?;
        self.half_delay();
        self.scl_low()
    }

    fn read_bit(&mut self) -> Result<bool, SoftI2cError> {
        self.set_sda(true)?;
        self.half_delay();
        self.scl_release()?;
        let bit = self.sda_is_high()?;
        self.half_delay();
        self.scl_low()?;
        Ok(bit)
    }

    /// Returns whether the receiver acknowledged the byte.
    fn write_byte(&mut self, byte: u8) -> Result<bool, SoftI2cError> {
        for i in (0..8).rev() {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        let nack = self.read_bit()?;
        Ok(!nack)
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, SoftI2cError> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | u8::from(self.read_bit()?);
        }
        self.write_bit(!ack)?;
        Ok(byte)
    }

    fn run(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), SoftI2cError> {
        let mut previous_is_read = None;

        for index in 0..operations.len() {
            let is_read = matches!(operations[index], Operation::Read(_));
            let next_is_read = operations
                .get(index + 1)
                .map(|op| matches!(op, Operation::Read(_)));

            // Adjacent operations of the same kind are merged on the wire.
            if previous_is_read != Some(is_read) {
                self.start()?;
                let header = (address << 1) | u8::from(is_read);
                if !self.write_byte(header)? {
                    trace!("soft i2c: address 0x{:02x} not acknowledged", address);
                    return Err(SoftI2cError::AddressNack);
                }
            }

            match &mut operations[index] {
                Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        if !self.write_byte(byte)? {
                            return Err(SoftI2cError::DataNack);
                        }
                    }
                }
                Operation::Read(buf) => {
                    let continues = next_is_read == Some(true);
                    let len = buf.len();
                    for (i, slot) in buf.iter_mut().enumerate() {
                        let last = i + 1 == len && !continues;
                        *slot = self.read_byte(!last)?;
                    }
                }
            }

            previous_is_read = Some(is_read);
        }

        Ok(())
    }
}

impl<SDA, SCL, D> ErrorType for SoftI2c<SDA, SCL, D> {
    type Error = SoftI2cError;
}

impl<SDA, SCL, D> I2c for SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let result = self.run(address, operations);
        // Always leave the bus idle, even after a NACK.
        let stopped = self.stop();
        result.and(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use core::convert::Infallible;
    use std::rc::Rc;
    use std::vec::Vec;

    /// A target on the wire: which address it answers to, the data byte it
    /// refuses (counted from the first byte after the header) and the byte it
    /// returns on reads.
    #[derive(Clone, Copy)]
    struct Target {
        address: u8,
        nack_data_byte: Option<u32>,
        read_value: u8,
    }

    /// Two open-drain lines with pull-ups and an optional target that
    /// follows the clock: it samples SDA on SCL rising edges, acknowledges
    /// its address and written bytes during the ninth clock, and drives
    /// data bits on reads until the master NACKs.
    #[derive(Default)]
    struct Wire {
        sda_released: Cell<bool>,
        scl_released: Cell<bool>,
        target: Cell<Option<Target>>,
        /// SCL falling edges since the last START.
        falls: Cell<u32>,
        shift: Cell<u8>,
        addressed: Cell<bool>,
        reading: Cell<bool>,
        written: RefCell<Vec<u8>>,
        levels: RefCell<Vec<(bool, bool)>>,
    }

    impl Wire {
        fn with_target(target: Target) -> Rc<Self> {
            let wire = Self::default();
            wire.target.set(Some(target));
            Rc::new(wire)
        }

        /// Bit slot of the current clock: (byte since START, bit 0..=8).
        fn slot(&self) -> Option<(u32, u32)> {
            let bit = self.falls.get().checked_sub(1)?;
            Some((bit / 9, bit % 9))
        }

        fn target_pulls_sda(&self) -> bool {
            let Some(target) = self.target.get() else {
                return false;
            };
            if !self.addressed.get() {
                return false;
            }
            match self.slot() {
                None => false,
                Some((0, bit)) => bit == 8,
                Some((_, bit)) if self.reading.get() => {
                    bit < 8 && target.read_value & (0x80 >> bit) == 0
                }
                Some((byte, bit)) => bit == 8 && target.nack_data_byte != Some(byte - 1),
            }
        }

        fn sda_level(&self) -> bool {
            self.sda_released.get() && !self.target_pulls_sda()
        }

        fn rising_edge(&self, sda: bool) {
            let Some((byte, bit)) = self.slot() else {
                return;
            };
            if bit == 8 {
                // a NACK from the master ends a read
                if self.reading.get() && byte > 0 && sda {
                    self.addressed.set(false);
                }
                return;
            }

            self.shift.set((self.shift.get() << 1) | u8::from(sda));
            if bit < 7 {
                return;
            }
            let value = self.shift.replace(0);
            if byte == 0 {
                if let Some(target) = self.target.get() {
                    self.addressed.set(value >> 1 == target.address);
                    self.reading.set(value & 1 == 1);
                }
            } else if self.addressed.get() && !self.reading.get() {
                self.written.borrow_mut().push(value);
            }
        }

        fn record(&self) {
            let scl = self.scl_released.get();
            let (sda_before, scl_before) =
                self.levels.borrow().last().copied().unwrap_or((true, true));
            let sda = self.sda_level();

            if scl_before && scl {
                if sda_before && !sda {
                    self.falls.set(0);
                    self.shift.set(0);
                    self.addressed.set(false);
                    self.reading.set(false);
                } else if !sda_before && sda {
                    self.addressed.set(false);
                }
            } else if !scl_before && scl {
                self.rising_edge(sda);
            } else if scl_before && !scl {
                self.falls.set(self.falls.get() + 1);
            }

            self.levels.borrow_mut().push((self.sda_level(), scl));
        }

        /// Count START and STOP conditions (SDA edges while SCL is high).
        fn conditions(&self) -> (usize, usize) {
            let levels = self.levels.borrow();
            let mut starts = 0;
            let mut stops = 0;
            for pair in levels.windows(2) {
                let (sda_before, scl_before) = pair[0];
                let (sda_after, scl_after) = pair[1];
                if scl_before && scl_after {
                    if sda_before && !sda_after {
                        starts += 1;
                    } else if !sda_before && sda_after {
                        stops += 1;
                    }
                }
            }
            (starts, stops)
        }
    }

    struct Sda(Rc<Wire>);
    struct Scl(Rc<Wire>);

    impl embedded_hal::digital::ErrorType for Sda {
        type Error = Infallible;
    }
    impl embedded_hal::digital::ErrorType for Scl {
        type Error = Infallible;
    }

    impl OutputPin for Sda {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.sda_released.set(false);
            self.0.record();
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.sda_released.set(true);
            self.0.record();
            Ok(())
        }
    }

    impl InputPin for Sda {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.sda_level())
        }
        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.sda_level())
        }
    }

    impl OutputPin for Scl {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.scl_released.set(false);
            self.0.record();
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.scl_released.set(true);
            self.0.record();
            Ok(())
        }
    }

    impl InputPin for Scl {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.scl_released.get())
        }
        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.scl_released.get())
        }
    }

    /// A GPIO whose every access fails.
    struct BrokenPin;

    impl embedded_hal::digital::ErrorType for BrokenPin {
        type Error = embedded_hal::digital::ErrorKind;
    }

    impl OutputPin for BrokenPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Err(embedded_hal::digital::ErrorKind::Other)
        }
        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err(embedded_hal::digital::ErrorKind::Other)
        }
    }

    impl InputPin for BrokenPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Err(embedded_hal::digital::ErrorKind::Other)
        }
        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Err(embedded_hal::digital::ErrorKind::Other)
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn bus(wire: &Rc<Wire>) -> SoftI2c<Sda, Scl, NoDelay> {
        SoftI2c::new(Sda(wire.clone()), Scl(wire.clone()), NoDelay, 100_000)
    }

    const TCS: Target = Target {
        address: 0x29,
        nack_data_byte: None,
        read_value: 0x5a,
    };

    #[test]
    fn test_absent_device_reports_address_nack_and_stops() {
        let wire = Rc::new(Wire::default());
        let mut i2c = bus(&wire);

        let result = i2c.write(0x29, &[0xb2]);
        assert_eq!(result, Err(SoftI2cError::AddressNack));
        assert_eq!(wire.conditions(), (1, 1));
    }

    #[test]
    fn test_other_address_is_not_acknowledged() {
        let wire = Wire::with_target(TCS);
        let mut i2c = bus(&wire);

        assert_eq!(i2c.write(0x39, &[0x92]), Err(SoftI2cError::AddressNack));
        assert!(wire.written.borrow().is_empty());
        assert_eq!(wire.conditions(), (1, 1));
    }

    #[test]
    fn test_write_reaches_device() {
        let wire = Wire::with_target(TCS);
        let mut i2c = bus(&wire);

        i2c.write(0x29, &[0xa0, 0x0b, 0xc0]).unwrap();
        assert_eq!(*wire.written.borrow(), [0xa0, 0x0b, 0xc0]);
        assert_eq!(wire.conditions(), (1, 1));
    }

    #[test]
    fn test_write_read_uses_repeated_start() {
        let wire = Wire::with_target(TCS);
        let mut i2c = bus(&wire);

        let mut buf = [0u8; 2];
        i2c.write_read(0x29, &[0xb2], &mut buf).unwrap();
        assert_eq!(buf, [0x5a, 0x5a]);
        assert_eq!(*wire.written.borrow(), [0xb2]);
        // START, repeated START, one STOP
        assert_eq!(wire.conditions(), (2, 1));
    }

    #[test]
    fn test_data_nack_reported_and_bus_stopped() {
        let wire = Wire::with_target(Target {
            nack_data_byte: Some(1),
            ..TCS
        });
        let mut i2c = bus(&wire);

        let result = i2c.write(0x29, &[0xa0, 0x0b, 0xc0]);
        assert_eq!(result, Err(SoftI2cError::DataNack));
        // the refused byte was the last one sent
        assert_eq!(*wire.written.borrow(), [0xa0, 0x0b]);
        assert_eq!(wire.conditions(), (1, 1));
        assert_eq!(wire.levels.borrow().last(), Some(&(true, true)));
    }

    #[test]
    fn test_broken_pin_reported_on_first_transaction() {
        let mut i2c = SoftI2c::new(BrokenPin, BrokenPin, NoDelay, 100_000);
        assert_eq!(i2c.write(0x29, &[0x00]), Err(SoftI2cError::Pin));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            i2c::Error::kind(&SoftI2cError::AddressNack),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
        assert_eq!(
            i2c::Error::kind(&SoftI2cError::DataNack),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        );
    }
}
