//! Raw input to command lines
//!
//! Bytes arrive one at a time from the console. CR and LF end a line (an LF
//! right after a CR belongs to the same terminator), NUL and ESC throw the
//! current line away, backspace removes the last byte. Printable bytes
//! (32..=128) are collected; anything else is reported as a `#` diagnostic
//! and not collected.

use core::fmt::{self, Write as _};

use heapless::Vec;

use crate::console::Console;

/// Size of the line buffer. A line must leave one byte free, so at most
/// `LINE_CAPACITY - 1` characters can be submitted.
pub const LINE_CAPACITY: usize = 20;

const BACKSPACE: u8 = 0x08;
const ESCAPE: u8 = 0x1b;

/// An assembled line, without its terminator.
pub type Line = Vec<u8, LINE_CAPACITY>;

/// Result of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Nothing to dispatch yet.
    Pending,
    Line(Line),
    /// The terminated line did not fit and was discarded.
    TooLong,
}

#[derive(Debug, Default)]
pub struct LineEditor {
    buf: Line,
    previous: u8,
}

impl LineEditor {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            previous: 0,
        }
    }

    /// Bytes collected for the current line so far.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Consume one input byte, writing echo and diagnostics to `out`.
    pub fn feed<C: Console + ?Sized>(
        &mut self,
        byte: u8,
        echo: bool,
        out: &mut C,
    ) -> Result<Input, fmt::Error> {
        let previous = core::mem::replace(&mut self.previous, byte);

        match byte {
            b'\r' | b'\n' => {
                if self.buf.is_empty() {
                    if !(previous == b'\r' && byte == b'\n') {
                        out.write_str("\r\n")?;
                    }
                    return Ok(Input::Pending);
                }

                if echo {
                    out.write_str("\r\n")?;
                }
                let line = core::mem::take(&mut self.buf);
                if line.len() < LINE_CAPACITY {
                    Ok(Input::Line(line))
                } else {
                    Ok(Input::TooLong)
                }
            }
            0 | ESCAPE => {
                self.buf.clear();
                if echo {
                    out.write_str("\r\n")?;
                }
                Ok(Input::Pending)
            }
            BACKSPACE => {
                if self.buf.pop().is_some() && echo {
                    out.write_str("\x08 \x08")?;
                }
                Ok(Input::Pending)
            }
            32..=128 => {
                // full buffer: the byte is consumed but neither kept nor echoed
                if self.buf.push(byte).is_ok() && echo {
                    out.write_bytes(&[byte])?;
                }
                Ok(Input::Pending)
            }
            _ => {
                write!(out, "# char code: 0x{:02X}\r\n", byte)?;
                if echo {
                    out.write_bytes(&[byte])?;
                }
                Ok(Input::Pending)
            }
        }
    }
}
