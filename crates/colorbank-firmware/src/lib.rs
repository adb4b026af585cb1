//! ESP32-S3 board support for colorbank
//!
//! Everything here touches esp-hal peripherals and only builds for the
//! target: pin assignment and bus construction, the UART adapter behind the
//! protocol console, and the discrete RGB status LED.

#![no_std]

pub mod hardware;
pub mod rgb_pins;
pub mod uart_port;
