//! Application state and the cooperative control loop
//!
//! [`App`] owns everything the loop touches: the sensor slots, the RGB
//! output, the two session toggles, the line editor and the poll timer.
//! The board code creates it once and then calls [`App::tick`] forever.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::StatefulOutputPin;
use heapless::Vec;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::bus::Transport;
use crate::config::Config;
use crate::console::Console;
use crate::polling::{self, MAX_SLOTS};
use crate::protocol::{self, Command, Input, Key, LineEditor, SlotSnapshot};
use crate::rgb_output::{self, RgbError, RgbOutput};
use crate::sensors::SensorError;

pub use crate::polling::Slot;

/// The slot table as held by [`App`].
pub type Slots<T, L> = Vec<Slot<T, L>, MAX_SLOTS>;

/// The operator-controlled toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Poll cycles run by themselves.
    pub auto_poll: bool,
    /// Typed characters are echoed back.
    pub echo: bool,
}

impl SessionState {
    pub const fn from_config(config: &Config) -> Self {
        Self {
            auto_poll: config.auto_poll,
            echo: config.echo,
        }
    }
}

/// Why an assignment command was answered with `%failed`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingError {
    #[error("value {value} out of range")]
    ValueOutOfRange { value: u32 },
    #[error("no slot {slot}")]
    NoSuchSlot { slot: usize },
    #[error("slot {slot} has no indicator LED")]
    NoLed { slot: usize },
    #[error("indicator LED could not be driven")]
    Led,
    #[error("sensor: {0}")]
    Sensor(SensorError),
    #[error("RGB output: {0}")]
    Rgb(RgbError),
}

impl From<SensorError> for SettingError {
    fn from(err: SensorError) -> Self {
        Self::Sensor(err)
    }
}

impl From<RgbError> for SettingError {
    fn from(err: RgbError) -> Self {
        Self::Rgb(err)
    }
}

fn byte_value(value: u32) -> Result<u8, SettingError> {
    u8::try_from(value).map_err(|_| SettingError::ValueOutOfRange { value })
}

pub struct App<T, L, R> {
    name: &'static str,
    config: Config,
    session: SessionState,
    slots: Slots<T, L>,
    rgb: R,
    editor: LineEditor,
    /// `None` while polling is off, so enabling it polls right away.
    last_poll_ms: Option<u64>,
}

impl<T, L, R> App<T, L, R>
where
    T: Transport,
    L: StatefulOutputPin,
    R: RgbOutput,
{
    pub fn new(name: &'static str, config: Config, slots: Slots<T, L>, rgb: R) -> Self {
        Self {
            name,
            session: SessionState::from_config(&config),
            config,
            slots,
            rgb,
            editor: LineEditor::new(),
            last_poll_ms: None,
        }
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn slots(&self) -> &[Slot<T, L>] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [Slot<T, L>] {
        &mut self.slots
    }

    pub fn rgb(&self) -> &R {
        &self.rgb
    }

    /// Print the startup banner.
    pub fn start<C: Console + ?Sized>(&mut self, console: &mut C) -> fmt::Result {
        info!(
            "{}: {} slots, {} RGB outputs, auto={} echo={}",
            self.name,
            self.slots.len(),
            self.rgb.len(),
            self.session.auto_poll,
            self.session.echo
        );
        protocol::write_banner(console, self.name)
    }

    /// One iteration of the main loop.
    ///
    /// Runs a poll cycle if automatic polling is on, the poll interval has
    /// passed and the console has room for the output; then consumes every
    /// input byte that is already waiting.
    pub fn tick<C, D>(&mut self, console: &mut C, now_ms: u64, delay: &mut D) -> fmt::Result
    where
        C: Console + ?Sized,
        D: DelayNs,
    {
        if !self.session.auto_poll {
            self.last_poll_ms = None;
        } else if self.poll_due(now_ms) && console.write_headroom() > self.config.min_write_headroom
        {
            self.last_poll_ms = Some(now_ms);
            self.poll(console, delay)?;
        }

        while let Some(byte) = console.read_byte() {
            match self.editor.feed(byte, self.session.echo, console)? {
                Input::Pending => {}
                Input::Line(line) => self.handle_line(console, &line, delay)?,
                Input::TooLong => protocol::write_too_long(console)?,
            }
        }
        Ok(())
    }

    fn poll_due(&self, now_ms: u64) -> bool {
        match self.last_poll_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) > u64::from(self.config.poll_interval_ms),
        }
    }

    /// Run one poll cycle and report what changed.
    pub fn poll<C, D>(&mut self, console: &mut C, delay: &mut D) -> fmt::Result
    where
        C: Console + ?Sized,
        D: DelayNs,
    {
        // keep polling every slot even if the console gives up half way
        let mut written = Ok(());
        polling::poll_cycle(
            &mut self.slots,
            delay,
            self.config.verbose_probe,
            |event| {
                if written.is_ok() {
                    written = protocol::write_event(console, &event);
                }
            },
        );
        written
    }

    /// Execute one complete input line.
    pub fn handle_line<C, D>(&mut self, console: &mut C, line: &[u8], delay: &mut D) -> fmt::Result
    where
        C: Console + ?Sized,
        D: DelayNs,
    {
        let command = match protocol::parse(line, self.slots.len(), self.rgb.len()) {
            Ok(command) => command,
            Err(err) => return protocol::write_error(console, err, line),
        };

        match command {
            Command::Dump => self.write_dump(console),
            Command::Poll => self.poll(console, delay),
            Command::DumpRegisters => {
                for (index, slot) in self.slots.iter_mut().enumerate() {
                    protocol::write_register_dump(console, index, &mut slot.sensor)?;
                }
                Ok(())
            }
            Command::Set { key, value } => {
                let result = self.apply(key, value);
                if let Err(err) = &result {
                    debug!("{:?}={} rejected: {}", key, value, err);
                }
                protocol::write_outcome(console, result.is_ok())
            }
        }
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot<T, L>, SettingError> {
        self.slots
            .get_mut(slot)
            .ok_or(SettingError::NoSuchSlot { slot })
    }

    fn apply(&mut self, key: Key, value: u32) -> Result<(), SettingError> {
        match key {
            Key::AutoPoll => {
                self.session.auto_poll = value != 0;
                info!("auto poll {}", if value != 0 { "on" } else { "off" });
            }
            Key::Echo => self.session.echo = value != 0,
            Key::Gain { slot } => {
                let gain = byte_value(value)?;
                self.slot_mut(slot)?.sensor.set_gain(gain)?;
            }
            Key::IntegrationTime { slot } => {
                let itime = byte_value(value)?;
                self.slot_mut(slot)?.sensor.set_integration_time(itime)?;
            }
            Key::Led { slot } => {
                let led = self
                    .slot_mut(slot)?
                    .led
                    .as_mut()
                    .ok_or(SettingError::NoLed { slot })?;
                let driven = if value != 0 {
                    led.set_high()
                } else {
                    led.set_low()
                };
                driven.map_err(|_| SettingError::Led)?;
            }
            Key::Rgb { output, channel } => {
                let level = byte_value(value)?;
                rgb_output::set_channel(&mut self.rgb, output, channel, level)?;
            }
        }
        Ok(())
    }

    fn write_dump<C: Console + ?Sized>(&mut self, console: &mut C) -> fmt::Result {
        protocol::write_dump_start(console)?;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let led = match slot.led.as_mut() {
                Some(led) => match led.is_set_high() {
                    Ok(lit) => Some(lit),
                    Err(_) => {
                        warn!("tcs{}: LED state unreadable", index);
                        None
                    }
                },
                None => None,
            };
            let snapshot = SlotSnapshot {
                present: slot.reported_present(),
                family_code: slot.sensor.family().code,
                gain: slot.sensor.gain(),
                integration_time: slot.sensor.integration_time(),
                part_number: slot.sensor.part_number(),
                led,
            };
            protocol::write_slot_snapshot(console, index, &snapshot)?;
        }

        for output in 0..self.rgb.len() {
            if let Some(color) = self.rgb.color(output) {
                protocol::write_rgb_snapshot(console, output, color)?;
            }
        }

        protocol::write_toggles(console, self.session.auto_poll, self.session.echo)?;
        protocol::write_dump_end(console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusKind;
    use crate::rgb_output::RgbBuffer;
    use crate::sensors::{ColorSensor, Measurement, SensorFamily, TCS3400, TCS3472};
    use crate::sim::{MemoryConsole, RecordingDelay, SimLed, SimulatedSensor};
    use rgb::RGB8;

    type TestApp = App<SimulatedSensor, SimLed, RgbBuffer<1>>;

    fn slot(sim: SimulatedSensor, family: &'static SensorFamily) -> Slot<SimulatedSensor, SimLed> {
        Slot::new(
            ColorSensor::new(sim, family),
            BusKind::Hardware {
                frequency_hz: 400_000,
            },
            Some(SimLed::new("led")),
        )
    }

    fn app() -> TestApp {
        let mut slots = Slots::new();
        let _ = slots.push(slot(SimulatedSensor::new(&TCS3472), &TCS3472));
        let _ = slots.push(slot(SimulatedSensor::absent(&TCS3400), &TCS3400));
        App::new("colorbank test", Config::default(), slots, RgbBuffer::new())
    }

    /// Type `input` and run one loop iteration at `now_ms`.
    fn run(app: &mut TestApp, console: &mut MemoryConsole, input: &[u8], now_ms: u64) -> String {
        console.clear_output();
        console.type_bytes(input);
        app.tick(console, now_ms, &mut RecordingDelay::default())
            .unwrap();
        console.output_str().to_string()
    }

    #[test]
    fn test_banner() {
        let mut app = app();
        let mut console = MemoryConsole::new();
        app.start(&mut console).unwrap();
        assert_eq!(console.output_str(), "%startup: colorbank test\r\n");
    }

    #[test]
    fn test_gain_command() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b":poll\r", 0);
        assert!(out.contains(":tcs0.present=1\r\n"));
        assert!(app.slots()[0].sensor.is_initialized());

        let out = run(&mut app, &mut console, b":tcs0.gain=3\r", 1);
        assert!(out.ends_with("%ok\r\n"));
        assert_eq!(app.slots()[0].sensor.gain(), 3);

        let out = run(&mut app, &mut console, b":tcs0.gain=9\r", 2);
        assert!(out.ends_with("%failed\r\n"));
        assert_eq!(app.slots()[0].sensor.gain(), 3);
    }

    #[test]
    fn test_echo_off_still_dumps() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b":echo=0\n", 0);
        assert_eq!(out, ":echo=0\r\n%ok\r\n");
        assert!(!app.session().echo);

        let out = run(&mut app, &mut console, b"?\n", 1);
        assert!(out.starts_with("%values\r\n"));
        assert!(out.ends_with(":echo=0\r\n%end\r\n"));
        assert!(!out.contains('?'));
    }

    #[test]
    fn test_dump_contents() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b"?\r", 0);
        assert!(out.contains(":tcs0.present=0\r\n:tcs0.type=3472\r\n:tcs0.gain=1\r\n"));
        assert!(out.contains(":tcs0.itime=63\r\n:tcs0.partnum=0\r\n:tcs0.led=0\r\n"));
        assert!(out.contains(":tcs1.type=3400\r\n"));
        assert!(out.contains(":led0.r=0\r\n:led0.g=0\r\n:led0.b=0\r\n"));
        assert!(out.contains(":auto=0\r\n:echo=1\r\n%end\r\n"));
    }

    #[test]
    fn test_too_long_line() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b":tcs0.gain=00000000000001\r", 0);
        assert!(out.ends_with("%ERR: too long\r\n"));
        assert_eq!(app.slots()[0].sensor.gain(), 1);

        let out = run(&mut app, &mut console, b":tcs0.gain=2\r", 1);
        assert!(out.ends_with("%ok\r\n"));
        assert_eq!(app.slots()[0].sensor.gain(), 2);
    }

    #[test]
    fn test_command_errors_echo_line() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b":tcs7.gain=1\r", 0);
        assert!(out.ends_with("%ERR: invalid command\r\n#DEBUG: :tcs7.gain=1|, 12\r\n"));

        let out = run(&mut app, &mut console, b":auto=on\r", 0);
        assert!(out.ends_with("%ERR: invalid format\r\n#DEBUG: :auto=on|, 8\r\n"));
    }

    #[test]
    fn test_led_and_rgb_commands() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        run(&mut app, &mut console, b":tcs1.led=1\r", 0);
        assert!(app.slots()[1].led.as_ref().is_some_and(SimLed::is_lit));

        let out = run(&mut app, &mut console, b":led0.b=128\r", 0);
        assert!(out.ends_with("%ok\r\n"));
        assert_eq!(app.rgb().shown()[0], RGB8::new(0, 0, 128));

        let out = run(&mut app, &mut console, b":led0.r=256\r", 0);
        assert!(out.ends_with("%failed\r\n"));
        assert_eq!(app.rgb().shown()[0], RGB8::new(0, 0, 128));
    }

    #[test]
    fn test_auto_poll_schedule() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        run(&mut app, &mut console, b":auto=1\r", 1000);
        // enabling polls on the next iteration
        let out = run(&mut app, &mut console, b"", 1001);
        assert!(out.contains(":tcs0.present=1\r\n"));

        let m = Measurement {
            brightness: 1,
            red: 2,
            green: 3,
            blue: 4,
        };
        app.slots_mut()[0].sensor.transport_mut().complete_conversion(m);

        // interval not yet passed
        assert!(!run(&mut app, &mut console, b"", 1040).contains(".color="));
        let out = run(&mut app, &mut console, b"", 1052);
        assert!(out.contains(":tcs0.color=(0x0001, 0x0002, 0x0003, 0x0004)\r\n"));
    }

    #[test]
    fn test_auto_poll_waits_for_console_headroom() {
        let mut app = app();
        let mut console = MemoryConsole::new();
        console.set_headroom(10);

        run(&mut app, &mut console, b":auto=1\r", 0);
        assert!(!run(&mut app, &mut console, b"", 100).contains(".present="));

        console.set_headroom(11);
        assert!(run(&mut app, &mut console, b"", 200).contains(":tcs0.present=1"));
    }

    #[test]
    fn test_check_warnings_for_absent_slot() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b":poll\r", 0);
        assert!(out.contains("#warn: tcs1: not found (I2C NACK)\r\n"));
        assert!(!out.contains(":tcs1.present"));
    }

    #[test]
    fn test_register_dump_command() {
        let mut app = app();
        let mut console = MemoryConsole::new();

        let out = run(&mut app, &mut console, b":allSensorRegs\r", 0);
        assert!(out.contains("# TCS3472: tcs0\r\n"));
        assert!(out.contains("# TCS3400: tcs1\r\n"));
        assert!(out.contains("# 80: couldn't read\r\n"));
    }
}
