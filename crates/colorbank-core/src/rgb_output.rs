//! Auxiliary RGB status output
//!
//! Channel writes are staged; nothing reaches the hardware until
//! [`RgbOutput::show`] is called.

use rgb::RGB8;
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbError {
    #[error("no RGB output with index {index}")]
    NoSuchOutput { index: usize },
    #[error("failed to drive the RGB output")]
    Hardware,
}

pub trait RgbOutput {
    /// Number of addressable outputs.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Staged color of output `index`.
    fn color(&self, index: usize) -> Option<RGB8>;

    fn set_color(&mut self, index: usize, color: RGB8) -> Result<(), RgbError>;

    /// Push all staged colors to the hardware.
    fn show(&mut self) -> Result<(), RgbError>;
}

/// One color component, as addressed by `:led<N>.r/g/b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub fn from_key(key: &[u8]) -> Option<Self> {
        match key {
            b"r" => Some(Self::Red),
            b"g" => Some(Self::Green),
            b"b" => Some(Self::Blue),
            _ => None,
        }
    }

    pub fn apply(self, mut color: RGB8, value: u8) -> RGB8 {
        match self {
            Self::Red => color.r = value,
            Self::Green => color.g = value,
            Self::Blue => color.b = value,
        }
        color
    }
}

/// Set one component of one output and show the result immediately.
pub fn set_channel<R: RgbOutput + ?Sized>(
    output: &mut R,
    index: usize,
    channel: Channel,
    value: u8,
) -> Result<(), RgbError> {
    let color = output
        .color(index)
        .ok_or(RgbError::NoSuchOutput { index })?;
    output.set_color(index, channel.apply(color, value))?;
    output.show()
}

/// In-memory output with `N` pixels; keeps the last shown frame.
#[derive(Debug, Clone)]
pub struct RgbBuffer<const N: usize> {
    staged: [RGB8; N],
    shown: [RGB8; N],
    show_count: u32,
}

impl<const N: usize> Default for RgbBuffer<N> {
    fn default() -> Self {
        Self {
            staged: [RGB8::default(); N],
            shown: [RGB8::default(); N],
            show_count: 0,
        }
    }
}

impl<const N: usize> RgbBuffer<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame as of the last [`RgbOutput::show`].
    pub fn shown(&self) -> &[RGB8; N] {
        &self.shown
    }

    pub fn show_count(&self) -> u32 {
        self.show_count
    }
}

impl<const N: usize> RgbOutput for RgbBuffer<N> {
    fn len(&self) -> usize {
        N
    }

    fn color(&self, index: usize) -> Option<RGB8> {
        self.staged.get(index).copied()
    }

    fn set_color(&mut self, index: usize, color: RGB8) -> Result<(), RgbError> {
        let pixel = self
            .staged
            .get_mut(index)
            .ok_or(RgbError::NoSuchOutput { index })?;
        *pixel = color;
        Ok(())
    }

    fn show(&mut self) -> Result<(), RgbError> {
        self.shown = self.staged;
        self.show_count += 1;
        Ok(())
    }
}
