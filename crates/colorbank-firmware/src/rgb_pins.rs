//! RGB status LED on three GPIOs
//!
//! The board carries a plain common-cathode RGB LED, so each channel is
//! either on or off: a channel value of 128 or more lights it.

use embedded_hal::digital::OutputPin;
use rgb::RGB8;

use colorbank_core::rgb_output::{RgbError, RgbOutput};

const THRESHOLD: u8 = 128;

pub struct GpioRgb<P> {
    red: P,
    green: P,
    blue: P,
    staged: RGB8,
}

impl<P: OutputPin> GpioRgb<P> {
    pub fn new(red: P, green: P, blue: P) -> Self {
        Self {
            red,
            green,
            blue,
            staged: RGB8::default(),
        }
    }
}

fn drive<P: OutputPin>(pin: &mut P, value: u8) -> Result<(), RgbError> {
    let result = if value >= THRESHOLD {
        pin.set_high()
    } else {
        pin.set_low()
    };
    result.map_err(|_| RgbError::Hardware)
}

impl<P: OutputPin> RgbOutput for GpioRgb<P> {
    fn len(&self) -> usize {
        1
    }

    fn color(&self, index: usize) -> Option<RGB8> {
        (index == 0).then_some(self.staged)
    }

    fn set_color(&mut self, index: usize, color: RGB8) -> Result<(), RgbError> {
        if index != 0 {
            return Err(RgbError::NoSuchOutput { index });
        }
        self.staged = color;
        Ok(())
    }

    fn show(&mut self) -> Result<(), RgbError> {
        drive(&mut self.red, self.staged.r)?;
        drive(&mut self.green, self.staged.g)?;
        drive(&mut self.blue, self.staged.b)
    }
}
