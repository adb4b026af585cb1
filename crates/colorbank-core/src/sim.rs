//! Simulated sensors
//!
//! A register-file model of the TCS34xx families that speaks
//! `embedded_hal::i2c::I2c`, used by the unit tests and by the desktop
//! simulator. It understands the family's control byte (register pointer
//! with auto-increment), the clear-interrupt command and the status bit
//! raised by a finished conversion. Failures can be injected per
//! transaction.

use core::convert::Infallible;
use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin, StatefulOutputPin};
use embedded_hal::i2c::{ErrorType, I2c, Operation};
use heapless::{Deque, Vec};

use crate::bus::BusError;
use crate::console::Console;
use crate::sensors::{Measurement, SensorFamily};

/// Status bit set alongside the interrupt bit once a conversion is valid.
const STATUS_VALID: u8 = 0x01;

/// Enable bit of the ADC (AEN).
const ENABLE_ADC: u8 = 0x02;

pub struct SimulatedSensor {
    family: &'static SensorFamily,
    registers: [u8; 256],
    pointer: u8,
    present: bool,
    skip: u32,
    failures: u32,
    transactions: u32,
}

impl SimulatedSensor {
    /// A powered-down device that identifies with the family's first part
    /// number.
    pub fn new(family: &'static SensorFamily) -> Self {
        let mut registers = [0u8; 256];
        if let Some(&part) = family.part_numbers.first() {
            registers[usize::from(family.registers.id)] = part;
        }
        Self {
            family,
            registers,
            pointer: 0,
            present: true,
            skip: 0,
            failures: 0,
            transactions: 0,
        }
    }

    /// A device that never acknowledges its address.
    pub fn absent(family: &'static SensorFamily) -> Self {
        let mut sim = Self::new(family);
        sim.present = false;
        sim
    }

    pub fn family(&self) -> &'static SensorFamily {
        self.family
    }

    pub fn address(&self) -> u8 {
        self.family.address
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Fail the next `count` transactions with a retryable bus error.
    pub fn fail_next(&mut self, count: u32) {
        self.fail_after(0, count);
    }

    /// Let `skip` transactions through, then fail the following `count`.
    pub fn fail_after(&mut self, skip: u32, count: u32) {
        self.skip = skip;
        self.failures = count;
    }

    /// Transactions seen so far, including failed ones.
    pub fn transaction_count(&self) -> u32 {
        self.transactions
    }

    pub fn register(&self, register: u8) -> u8 {
        self.registers[usize::from(register)]
    }

    pub fn set_register(&mut self, register: u8, value: u8) {
        self.registers[usize::from(register)] = value;
    }

    /// Whether the driver has switched the ADC on.
    pub fn is_running(&self) -> bool {
        self.register(self.family.registers.enable) & ENABLE_ADC != 0
    }

    /// Latch a finished conversion: data registers plus the status bits.
    pub fn complete_conversion(&mut self, measurement: Measurement) {
        let base = self.family.registers.data;
        for (offset, byte) in measurement.to_le_bytes().into_iter().enumerate() {
            self.set_register(base.wrapping_add(offset as u8), byte);
        }
        let status = self.family.registers.status;
        let ready = self.family.status_ready | STATUS_VALID;
        self.set_register(status, self.register(status) | ready);
    }

    fn inject_failure(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            false
        } else if self.failures > 0 {
            self.failures -= 1;
            true
        } else {
            false
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let Some((&control, payload)) = bytes.split_first() else {
            return;
        };

        if control == self.family.clear_interrupt_command {
            let status = self.family.registers.status;
            self.set_register(status, self.register(status) & !self.family.status_ready);
            return;
        }

        self.pointer = control & self.family.control.mask;
        for &byte in payload {
            self.set_register(self.pointer, byte);
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.register(self.pointer);
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

impl ErrorType for SimulatedSensor {
    type Error = BusError;
}

impl I2c for SimulatedSensor {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transactions += 1;

        if !self.present || address != self.family.address {
            return Err(BusError::AddressNack);
        }
        if self.inject_failure() {
            return Err(BusError::Bus);
        }

        for operation in operations {
            match operation {
                Operation::Write(bytes) => self.write_bytes(bytes),
                Operation::Read(buf) => self.read_bytes(buf),
            }
        }
        Ok(())
    }
}

/// Several simulated devices on one bus, routed by address.
#[derive(Default)]
pub struct SimBus {
    sensors: Vec<SimulatedSensor, 8>,
    transactions: u32,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device of `family`. Ignored once the bus is full.
    pub fn attach(&mut self, family: &'static SensorFamily) -> &mut Self {
        let _ = self.sensors.push(SimulatedSensor::new(family));
        self
    }

    pub fn sensor_mut(&mut self, address: u8) -> Option<&mut SimulatedSensor> {
        self.sensors.iter_mut().find(|s| s.address() == address)
    }

    pub fn sensors_mut(&mut self) -> impl Iterator<Item = &mut SimulatedSensor> {
        self.sensors.iter_mut()
    }

    pub fn transaction_count(&self) -> u32 {
        self.transactions
    }
}

impl ErrorType for SimBus {
    type Error = BusError;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transactions += 1;
        match self.sensor_mut(address) {
            Some(sensor) => sensor.transaction(address, operations),
            None => Err(BusError::AddressNack),
        }
    }
}

/// Delay that only adds up the requested time.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub total_us: u32,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_us += ns / 1000;
    }

    fn delay_us(&mut self, us: u32) {
        self.total_us += us;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_us += ms * 1000;
    }
}

/// Indicator LED that only remembers its level.
#[derive(Debug, Default)]
pub struct SimLed {
    lit: bool,
    label: &'static str,
}

impl SimLed {
    pub const fn new(label: &'static str) -> Self {
        Self { lit: false, label }
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    fn set(&mut self, lit: bool) {
        if lit != self.lit {
            log::info!("{}: {}", self.label, if lit { "on" } else { "off" });
        }
        self.lit = lit;
    }
}

impl digital::ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

impl StatefulOutputPin for SimLed {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.lit)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.lit)
    }
}

/// Console backed by memory: queued input, captured output.
pub struct MemoryConsole {
    input: Deque<u8, 256>,
    output: Vec<u8, 16384>,
    headroom: usize,
}

impl Default for MemoryConsole {
    fn default() -> Self {
        Self {
            input: Deque::new(),
            output: Vec::new(),
            headroom: 64,
        }
    }
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if typed by the operator. Excess input is dropped.
    pub fn type_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let _ = self.input.push_back(b);
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Output as text; empty if it is not valid UTF-8.
    pub fn output_str(&self) -> &str {
        core::str::from_utf8(&self.output).unwrap_or_default()
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    pub fn set_headroom(&mut self, headroom: usize) {
        self.headroom = headroom;
    }
}

impl fmt::Write for MemoryConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes())
    }
}

impl Console for MemoryConsole {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> fmt::Result {
        self.output.extend_from_slice(bytes).map_err(|_| fmt::Error)
    }

    fn write_headroom(&mut self) -> usize {
        self.headroom
    }
}
