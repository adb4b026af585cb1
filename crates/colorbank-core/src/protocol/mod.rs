//! Serial control protocol
//!
//! Line-oriented ASCII, one command per line. Output lines start with one of
//! three prefixes so a host program can sort them without parsing further:
//!
//! | Prefix | Meaning                                   | Example                |
//! |--------|-------------------------------------------|------------------------|
//! | `%`    | status marker (command result, framing)   | `%ok`, `%values`       |
//! | `:`    | key=value data line                       | `:tcs0.gain=1`         |
//! | `#`    | diagnostic for humans                     | `#warn: not found ...` |
//!
//! Commands:
//!
//! - `?` dump the full state between `%values` and `%end`
//! - `:poll` run one poll cycle now
//! - `:allSensorRegs` hex dump of every sensor's registers
//! - `:auto=<n>`, `:echo=<n>` toggles (non-zero = on)
//! - `:tcs<N>.gain=<n>`, `:tcs<N>.itime=<n>`, `:tcs<N>.led=<n>` per slot
//! - `:led<N>.r=<n>`, `.g=`, `.b=` RGB output channels

pub mod line_editor;

use core::fmt::{self, Write as _};

use rgb::RGB8;
use thiserror_no_std::Error;

use crate::bus::Transport;
use crate::console::Console;
use crate::polling::SlotEvent;
use crate::rgb_output::Channel;
use crate::sensors::{ColorSensor, SensorError};

pub use line_editor::{Input, Line, LineEditor, LINE_CAPACITY};

/// Registers per row of the register dump.
const DUMP_ROW: usize = 8;

/// A parsed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `?`
    Dump,
    /// `:poll`
    Poll,
    /// `:allSensorRegs`
    DumpRegisters,
    /// `:<key>=<value>`
    Set { key: Key, value: u32 },
}

/// Target of a `:<key>=<value>` assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    AutoPoll,
    Echo,
    Gain { slot: usize },
    IntegrationTime { slot: usize },
    Led { slot: usize },
    Rgb { output: usize, channel: Channel },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command, missing `=`, or an index that does not exist.
    #[error("invalid command")]
    Command,
    /// The value is empty, contains a non-digit or does not fit.
    #[error("invalid format")]
    Format,
}

/// Parse one line. `slots` and `rgb_outputs` bound the accepted indices.
pub fn parse(line: &[u8], slots: usize, rgb_outputs: usize) -> Result<Command, CommandError> {
    match line {
        b"?" => return Ok(Command::Dump),
        b":poll" => return Ok(Command::Poll),
        b":allSensorRegs" => return Ok(Command::DumpRegisters),
        _ => {}
    }

    let assignment = line.strip_prefix(b":").ok_or(CommandError::Command)?;
    let eq = assignment
        .iter()
        .position(|&b| b == b'=')
        .ok_or(CommandError::Command)?;
    let (key, value) = (&assignment[..eq], &assignment[eq + 1..]);

    let value = parse_value(value)?;
    let key = parse_key(key, slots, rgb_outputs).ok_or(CommandError::Command)?;
    Ok(Command::Set { key, value })
}

fn parse_value(digits: &[u8]) -> Result<u32, CommandError> {
    if digits.is_empty() {
        return Err(CommandError::Format);
    }
    digits.iter().try_fold(0u32, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(CommandError::Format);
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u32::from(b - b'0')))
            .ok_or(CommandError::Format)
    })
}

/// `<prefix><digit>.<field>` with the index checked against `limit`.
fn indexed<'a>(key: &'a [u8], prefix: &[u8], limit: usize) -> Option<(usize, &'a [u8])> {
    match key.strip_prefix(prefix)? {
        [digit @ b'0'..=b'9', b'.', field @ ..] => {
            let index = usize::from(digit - b'0');
            (index < limit).then_some((index, field))
        }
        _ => None,
    }
}

fn parse_key(key: &[u8], slots: usize, rgb_outputs: usize) -> Option<Key> {
    match key {
        b"auto" => return Some(Key::AutoPoll),
        b"echo" => return Some(Key::Echo),
        _ => {}
    }

    if let Some((slot, field)) = indexed(key, b"tcs", slots) {
        return match field {
            b"gain" => Some(Key::Gain { slot }),
            b"itime" => Some(Key::IntegrationTime { slot }),
            b"led" => Some(Key::Led { slot }),
            _ => None,
        };
    }

    let (output, field) = indexed(key, b"led", rgb_outputs)?;
    Channel::from_key(field).map(|channel| Key::Rgb { output, channel })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub fn write_banner<C: Console + ?Sized>(out: &mut C, name: &str) -> fmt::Result {
    write!(out, "%startup: {}\r\n", name)
}

/// `%ok` or `%failed` for a mutating command.
pub fn write_outcome<C: Console + ?Sized>(out: &mut C, ok: bool) -> fmt::Result {
    out.write_str(if ok { "%ok\r\n" } else { "%failed\r\n" })
}

/// Error marker followed by the offending line for diagnosis.
pub fn write_error<C: Console + ?Sized>(
    out: &mut C,
    error: CommandError,
    line: &[u8],
) -> fmt::Result {
    write!(out, "%ERR: {}\r\n#DEBUG: ", error)?;
    out.write_bytes(line)?;
    write!(out, "|, {}\r\n", line.len())
}

pub fn write_too_long<C: Console + ?Sized>(out: &mut C) -> fmt::Result {
    out.write_str("%ERR: too long\r\n")
}

pub fn write_event<C: Console + ?Sized>(out: &mut C, event: &SlotEvent) -> fmt::Result {
    match event {
        SlotEvent::PresenceChanged { slot, present } => {
            write!(out, ":tcs{}.present={}\r\n", slot, u8::from(*present))
        }
        SlotEvent::Measurement { slot, measurement } => write!(
            out,
            ":tcs{}.color=(0x{:04X}, 0x{:04X}, 0x{:04X}, 0x{:04X})\r\n",
            slot, measurement.brightness, measurement.red, measurement.green, measurement.blue
        ),
        SlotEvent::ProbeFailed { slot, error } => match error {
            SensorError::NotFound(_) => {
                write!(out, "#warn: tcs{}: not found (I2C NACK)\r\n", slot)
            }
            other => write!(out, "#warn: tcs{}: {}\r\n", slot, other),
        },
    }
}

/// What `?` reports for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub present: bool,
    pub family_code: u16,
    pub gain: u8,
    pub integration_time: u8,
    pub part_number: u8,
    /// `None` when the slot has no indicator LED.
    pub led: Option<bool>,
}

pub fn write_dump_start<C: Console + ?Sized>(out: &mut C) -> fmt::Result {
    out.write_str("%values\r\n")
}

pub fn write_dump_end<C: Console + ?Sized>(out: &mut C) -> fmt::Result {
    out.write_str("%end\r\n")
}

pub fn write_slot_snapshot<C: Console + ?Sized>(
    out: &mut C,
    slot: usize,
    snapshot: &SlotSnapshot,
) -> fmt::Result {
    write!(out, ":tcs{}.present={}\r\n", slot, u8::from(snapshot.present))?;
    write!(out, ":tcs{}.type={}\r\n", slot, snapshot.family_code)?;
    write!(out, ":tcs{}.gain={}\r\n", slot, snapshot.gain)?;
    write!(out, ":tcs{}.itime={}\r\n", slot, snapshot.integration_time)?;
    write!(out, ":tcs{}.partnum={}\r\n", slot, snapshot.part_number)?;
    if let Some(led) = snapshot.led {
        write!(out, ":tcs{}.led={}\r\n", slot, u8::from(led))?;
    }
    Ok(())
}

pub fn write_rgb_snapshot<C: Console + ?Sized>(
    out: &mut C,
    output: usize,
    color: RGB8,
) -> fmt::Result {
    write!(out, ":led{}.r={}\r\n", output, color.r)?;
    write!(out, ":led{}.g={}\r\n", output, color.g)?;
    write!(out, ":led{}.b={}\r\n", output, color.b)
}

pub fn write_toggles<C: Console + ?Sized>(out: &mut C, auto_poll: bool, echo: bool) -> fmt::Result {
    write!(out, ":auto={}\r\n", u8::from(auto_poll))?;
    write!(out, ":echo={}\r\n", u8::from(echo))
}

/// Hex dump of one sensor's register window, eight registers per row.
///
/// Stops at the first row that cannot be read.
pub fn write_register_dump<C, T>(
    out: &mut C,
    slot: usize,
    sensor: &mut ColorSensor<T>,
) -> fmt::Result
where
    C: Console + ?Sized,
    T: Transport,
{
    let family = sensor.family();
    let base = family.registers.enable;

    write!(out, "# {}: tcs{}\r\n", family.name, slot)?;
    out.write_str("#     00 01 02 03 04 05 06 07\r\n")?;

    let mut row = [0u8; DUMP_ROW];
    for offset in (0..family.dump_window).step_by(DUMP_ROW) {
        let register = base.wrapping_add(offset);
        write!(out, "# {:02X}:", register)?;

        if let Err(err) = sensor.read_registers(register, &mut row) {
            log::debug!("tcs{}: register dump stopped at 0x{:02x}: {}", slot, register, err);
            out.write_str(" couldn't read\r\n")?;
            break;
        }
        for value in row {
            write!(out, " {:02X}", value)?;
        }
        out.write_str("\r\n")?;
    }
    out.write_str("#\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Measurement, TCS3400, TCS3472};
    use crate::sim::{MemoryConsole, SimulatedSensor};

    #[test]
    fn test_exact_commands() {
        assert_eq!(parse(b"?", 2, 1), Ok(Command::Dump));
        assert_eq!(parse(b":poll", 2, 1), Ok(Command::Poll));
        assert_eq!(parse(b":allSensorRegs", 2, 1), Ok(Command::DumpRegisters));
        assert_eq!(parse(b"??", 2, 1), Err(CommandError::Command));
        assert_eq!(parse(b":polls", 2, 1), Err(CommandError::Command));
    }

    #[test]
    fn test_assignments() {
        assert_eq!(
            parse(b":auto=1", 2, 1),
            Ok(Command::Set {
                key: Key::AutoPoll,
                value: 1
            })
        );
        assert_eq!(
            parse(b":tcs1.itime=200", 2, 1),
            Ok(Command::Set {
                key: Key::IntegrationTime { slot: 1 },
                value: 200
            })
        );
        assert_eq!(
            parse(b":led0.g=255", 2, 1),
            Ok(Command::Set {
                key: Key::Rgb {
                    output: 0,
                    channel: Channel::Green
                },
                value: 255
            })
        );
    }

    #[test]
    fn test_command_errors() {
        // missing '='
        assert_eq!(parse(b":auto", 2, 1), Err(CommandError::Command));
        // slot out of range
        assert_eq!(parse(b":tcs2.gain=1", 2, 1), Err(CommandError::Command));
        assert_eq!(parse(b":led1.r=1", 2, 1), Err(CommandError::Command));
        // unknown field and unknown key
        assert_eq!(parse(b":tcs0.foo=1", 2, 1), Err(CommandError::Command));
        assert_eq!(parse(b":speed=1", 2, 1), Err(CommandError::Command));
        // two-digit index
        assert_eq!(parse(b":tcs10.gain=1", 2, 1), Err(CommandError::Command));
        // not a command at all
        assert_eq!(parse(b"poll", 2, 1), Err(CommandError::Command));
    }

    #[test]
    fn test_format_errors() {
        assert_eq!(parse(b":auto=", 2, 1), Err(CommandError::Format));
        assert_eq!(parse(b":tcs0.gain=3x", 2, 1), Err(CommandError::Format));
        assert_eq!(parse(b":tcs0.gain=-1", 2, 1), Err(CommandError::Format));
        assert_eq!(parse(b":echo=99999999999", 2, 1), Err(CommandError::Format));
    }

    #[test]
    fn test_error_response_echoes_line() {
        let mut out = MemoryConsole::new();
        write_error(&mut out, CommandError::Format, b":auto=x").unwrap();
        assert_eq!(
            out.output_str(),
            "%ERR: invalid format\r\n#DEBUG: :auto=x|, 7\r\n"
        );
    }

    #[test]
    fn test_event_lines() {
        let mut out = MemoryConsole::new();
        write_event(
            &mut out,
            &SlotEvent::Measurement {
                slot: 1,
                measurement: Measurement {
                    brightness: 0x1a2b,
                    red: 0x10,
                    green: 0,
                    blue: 0xffff,
                },
            },
        )
        .unwrap();
        write_event(
            &mut out,
            &SlotEvent::PresenceChanged {
                slot: 0,
                present: false,
            },
        )
        .unwrap();
        assert_eq!(
            out.output_str(),
            ":tcs1.color=(0x1A2B, 0x0010, 0x0000, 0xFFFF)\r\n:tcs0.present=0\r\n"
        );
    }

    #[test]
    fn test_register_dump() {
        let mut sensor = ColorSensor::new(SimulatedSensor::new(&TCS3472), &TCS3472);
        let mut out = MemoryConsole::new();
        write_register_dump(&mut out, 0, &mut sensor).unwrap();

        let text = out.output_str();
        assert!(text.starts_with("# TCS3472: tcs0\r\n#     00 01 02 03 04 05 06 07\r\n"));
        assert!(text.contains("# 00: 00 00 00 00 00 00 00 00\r\n"));
        assert!(text.contains("# 10: 00 00 44 00 00 00 00 00\r\n"));
        assert_eq!(text.matches("\r\n# ").count(), 5);
    }

    #[test]
    fn test_register_dump_stops_on_failure() {
        let mut sensor = ColorSensor::new(SimulatedSensor::new(&TCS3400), &TCS3400);
        sensor.transport_mut().fail_after(2, 3);
        let mut out = MemoryConsole::new();
        write_register_dump(&mut out, 1, &mut sensor).unwrap();

        let text = out.output_str();
        assert!(text.contains("# 80: 00 00 00 00 00 00 00 00\r\n"));
        assert!(text.contains("# 88: couldn't read\r\n"));
        assert!(!text.contains("# 90:"));
    }
}
