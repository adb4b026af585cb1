//! Color sensor drivers
//!
//! The supported families share one driver, [`ColorSensor`], parameterized
//! by a [`SensorFamily`] table describing the device address, the register
//! map, the accepted identification values and the bit patterns that differ
//! between families. All register traffic goes through
//! [`RegisterDevice`], so retry and error behavior is identical for every
//! family.

mod tcs3400;
mod tcs3472;

pub use tcs3400::TCS3400;
pub use tcs3472::TCS3472;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::bus::{BusError, Transport};
use crate::register::{RegisterDevice, RegisterError};

/// Highest accepted gain setting.
pub const MAX_GAIN: u8 = 4;

/// Gain a freshly created slot starts with.
pub const DEFAULT_GAIN: u8 = 1;

/// Integration time a freshly created slot starts with (device units).
pub const DEFAULT_INTEGRATION_TIME: u8 = 63;

/// Time the oscillator needs after power-on before the ADC may be enabled.
pub const WARM_UP_US: u32 = 2400;

/// Wait time programmed during setup (the WEN cycle is unused).
const WAIT_TIME: u8 = 0x80;

/// Register offsets of one family. All values are the register numbers
/// passed through the family's [`ControlByte`](crate::register::ControlByte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    /// ENABLE; the setup block (ATIME, WTIME, thresholds) follows it.
    pub enable: u8,
    pub atime: u8,
    /// PERS, immediately followed by CONFIG.
    pub persistence: u8,
    pub gain: u8,
    pub id: u8,
    pub status: u8,
    /// First of eight bytes: clear, red, green, blue (little-endian).
    pub data: u8,
}

/// Per-family constants.
#[derive(Debug)]
pub struct SensorFamily {
    pub name: &'static str,
    /// Numeric family code reported in the state dump.
    pub code: u16,
    /// Fixed 7-bit I2C address.
    pub address: u8,
    pub control: crate::register::ControlByte,
    pub clear_interrupt_command: u8,
    pub registers: RegisterMap,
    /// Identification register values accepted as "present".
    pub part_numbers: &'static [u8],
    pub gain_shift: u8,
    pub gain_flags: u8,
    pub enable_setup: u8,
    pub enable_running: u8,
    /// Status bit that signals a completed conversion.
    pub status_ready: u8,
    /// Number of registers shown by the register dump, from `registers.enable`.
    pub dump_window: u8,
}

impl SensorFamily {
    /// Value written to the gain register.
    pub const fn gain_byte(&self, gain: u8) -> u8 {
        (gain << self.gain_shift) | self.gain_flags
    }

    pub fn accepts(&self, part_number: u8) -> bool {
        self.part_numbers.contains(&part_number)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("not found ({0})")]
    NotFound(BusError),
    #[error("unexpected part number 0x{found:02X}")]
    UnexpectedPartNumber { found: u8 },
    #[error("bus failure: {0}")]
    Bus(BusError),
    #[error("register write rejected: {0}")]
    Register(RegisterError),
    #[error("gain {gain} out of range (0-4)")]
    GainOutOfRange { gain: u8 },
}

impl From<BusError> for SensorError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl From<RegisterError> for SensorError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::Bus(bus) => Self::Bus(bus),
            other => Self::Register(other),
        }
    }
}

/// One conversion result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Measurement {
    /// Clear (unfiltered) channel.
    pub brightness: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Measurement {
    /// Decode the eight data bytes as read from the device. The wire format
    /// is little-endian regardless of the host.
    pub const fn from_le_bytes(raw: [u8; 8]) -> Self {
        Self {
            brightness: u16::from_le_bytes([raw[0], raw[1]]),
            red: u16::from_le_bytes([raw[2], raw[3]]),
            green: u16::from_le_bytes([raw[4], raw[5]]),
            blue: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    pub const fn to_le_bytes(self) -> [u8; 8] {
        let c = self.brightness.to_le_bytes();
        let r = self.red.to_le_bytes();
        let g = self.green.to_le_bytes();
        let b = self.blue.to_le_bytes();
        [c[0], c[1], r[0], r[1], g[0], g[1], b[0], b[1]]
    }
}

/// Driver for one physical sensor.
pub struct ColorSensor<T> {
    regs: RegisterDevice<T>,
    family: &'static SensorFamily,
    gain: u8,
    integration_time: u8,
    part_number: u8,
    initialized: bool,
    present: bool,
}

impl<T: Transport> ColorSensor<T> {
    pub fn new(bus: T, family: &'static SensorFamily) -> Self {
        Self {
            regs: RegisterDevice::new(bus, family.address, family.control),
            family,
            gain: DEFAULT_GAIN,
            integration_time: DEFAULT_INTEGRATION_TIME,
            part_number: 0,
            initialized: false,
            present: false,
        }
    }

    pub fn family(&self) -> &'static SensorFamily {
        self.family
    }

    pub fn gain(&self) -> u8 {
        self.gain
    }

    pub fn integration_time(&self) -> u8 {
        self.integration_time
    }

    /// Last value read from the identification register.
    pub fn part_number(&self) -> u8 {
        self.part_number
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Outcome of the most recent identification check.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Give the transport back.
    pub fn release(self) -> T {
        self.regs.release()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.regs.bus_mut()
    }

    /// Read the identification register and compare it against the family's
    /// accepted part numbers.
    ///
    /// A failed check always clears the initialized flag.
    pub fn check(&mut self) -> Result<u8, SensorError> {
        let mut id = [0u8; 1];
        let result = match self.regs.read_registers(self.family.registers.id, &mut id) {
            Err(err) => Err(SensorError::NotFound(err)),
            Ok(()) => {
                self.part_number = id[0];
                if self.family.accepts(id[0]) {
                    Ok(id[0])
                } else {
                    Err(SensorError::UnexpectedPartNumber { found: id[0] })
                }
            }
        };

        self.present = result.is_ok();
        if !self.present {
            self.initialized = false;
        }
        result
    }

    /// Make the sensor ready for measurements.
    ///
    /// Returns immediately (no bus traffic) when already initialized.
    /// Otherwise re-checks the identification and runs the whole setup
    /// sequence; a failure anywhere leaves the sensor uninitialized so the
    /// next call starts over from the top.
    pub fn prepare<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), SensorError> {
        if self.initialized {
            return Ok(());
        }

        self.check()?;

        match self.initialize(delay) {
            Ok(()) => {
                self.initialized = true;
                info!(
                    "{} at 0x{:02x}: initialized (part 0x{:02X}, gain {}, itime {})",
                    self.family.name,
                    self.regs.address(),
                    self.part_number,
                    self.gain,
                    self.integration_time
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "{} at 0x{:02x}: setup failed: {}",
                    self.family.name,
                    self.regs.address(),
                    err
                );
                Err(err)
            }
        }
    }

    fn initialize<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), SensorError> {
        let regs = self.family.registers;

        // Low threshold above high threshold: every conversion raises the
        // interrupt bit, which (unlike the valid bit) we can clear and thus
        // use as the "new data" flag.
        let setup = [
            self.family.enable_setup,
            0xff - self.integration_time,
            0x00,
            WAIT_TIME,
            0xff,
            0xff,
            0x00,
            0x00,
        ];
        self.regs.write_registers(regs.enable, &setup)?;
        // PERS = every cycle, CONFIG = no long wait
        self.regs.write_registers(regs.persistence, &[0x00, 0x00])?;
        self.regs
            .write_register(regs.gain, self.family.gain_byte(self.gain))?;
        delay.delay_us(WARM_UP_US);
        self.regs
            .write_register(regs.enable, self.family.enable_running)?;
        Ok(())
    }

    /// Set the analog gain (0-4).
    ///
    /// Written to the device right away when initialized, otherwise applied
    /// by the next [`prepare`](Self::prepare).
    pub fn set_gain(&mut self, gain: u8) -> Result<(), SensorError> {
        if gain > MAX_GAIN {
            return Err(SensorError::GainOutOfRange { gain });
        }

        if self.initialized {
            self.regs
                .write_register(self.family.registers.gain, self.family.gain_byte(gain))?;
        }

        self.gain = gain;
        Ok(())
    }

    /// Set the integration time. The device register holds `0xFF - value`.
    pub fn set_integration_time(&mut self, integration_time: u8) -> Result<(), SensorError> {
        if self.initialized {
            self.regs
                .write_register(self.family.registers.atime, 0xff - integration_time)?;
        }

        self.integration_time = integration_time;
        Ok(())
    }

    /// Fetch the latest conversion if a new one completed.
    ///
    /// `Ok(None)` means "no new data yet". A bus failure demotes the sensor
    /// to uninitialized so the next poll checks it again before trusting data.
    pub fn read_measurement(&mut self) -> Result<Option<Measurement>, SensorError> {
        let regs = self.family.registers;

        let mut status = [0u8; 1];
        if let Err(err) = self.regs.read_registers(regs.status, &mut status) {
            self.demote(err);
            return Err(err.into());
        }

        if status[0] & self.family.status_ready == 0 {
            return Ok(None);
        }

        if let Err(err) = self.regs.send_command(self.family.clear_interrupt_command) {
            debug!(
                "{} at 0x{:02x}: clearing interrupt failed: {}",
                self.family.name,
                self.regs.address(),
                err
            );
        }

        // One auto-increment read so the device's shadow registers keep the
        // four channels consistent with each other.
        let mut raw = [0u8; 8];
        if let Err(err) = self.regs.read_registers(regs.data, &mut raw) {
            self.demote(err);
            return Err(err.into());
        }

        Ok(Some(Measurement::from_le_bytes(raw)))
    }

    /// Raw register read for diagnostics.
    pub fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.regs.read_registers(register, buf)
    }

    fn demote(&mut self, err: BusError) {
        if self.initialized {
            warn!(
                "{} at 0x{:02x}: read failed ({}), will re-initialize",
                self.family.name,
                self.regs.address(),
                err
            );
        }
        self.initialized = false;
    }
}
