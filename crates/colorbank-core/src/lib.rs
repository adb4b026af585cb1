//! Hardware-independent core of the colorbank firmware
//!
//! This crate contains all platform-agnostic logic for operating a bank of
//! TCS34xx color sensors behind a line-oriented serial protocol: the two I2C
//! transports (shared hardware controller and bit-banged software channels),
//! the retrying register layer, the sensor-family drivers, the polling
//! engine, the line editor and the command processor.
//!
//! It is `#![no_std]` so it compiles on both embedded targets (ESP32-S3) and
//! desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod app_state;
pub mod bus;
pub mod config;
pub mod console;
pub mod polling;
pub mod protocol;
pub mod register;
pub mod rgb_output;
pub mod sensors;
pub mod shared_bus;
#[cfg(any(test, feature = "simulation"))]
pub mod sim;
pub mod soft_i2c;

pub use app_state::{App, SessionState, Slot};
pub use bus::{BusChannel, BusError, BusKind, Transport};
pub use config::Config;
pub use console::{Console, SerialConsole};
pub use rgb_output::RgbOutput;
pub use sensors::{ColorSensor, Measurement, SensorError, SensorFamily, TCS3400, TCS3472};
