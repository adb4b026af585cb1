//! Desktop simulator for the colorbank color sensor firmware.
//!
//! Runs the colorbank-core control loop against simulated TCS34xx sensors.
//! Protocol input is read from stdin and protocol output goes to stdout, so
//! the simulator can be driven by hand or piped into a host program. Log
//! output goes to stderr (`RUST_LOG=debug` shows bus retries).
//!
//! # Bank layout
//!
//! | Slot | Family  | Bus                      |
//! |------|---------|--------------------------|
//! | 0    | TCS3472 | hardware                 |
//! | 1    | TCS3400 | hardware                 |
//! | 2    | TCS3472 | software, GPIO 5/6       |
//! | 3    | TCS3472 | software, GPIO 15/16     |
//! | 4    | TCS3400 | software, GPIO 17/18     |
//! | 5    | TCS3472 | software, GPIO 10/11 (nothing connected) |
//!
//! Run with `--help` for the start-up flags.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write as _};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use embedded_hal::delay::DelayNs;
use embedded_hal_bus::i2c::CriticalSectionDevice;
use log::{error, info, warn};
use rgb::RGB8;

use colorbank_core::app_state::Slots;
use colorbank_core::bus::{BusChannel, BusKind};
use colorbank_core::console::Console;
use colorbank_core::rgb_output::{RgbBuffer, RgbError, RgbOutput};
use colorbank_core::sensors::{ColorSensor, Measurement, SensorFamily, TCS3400, TCS3472};
use colorbank_core::shared_bus::{self, SharedBus};
use colorbank_core::sim::{SimBus, SimLed, SimulatedSensor};
use colorbank_core::{App, Config, Slot};

// ---------------------------------------------------------------------------
// Bank description
// ---------------------------------------------------------------------------

type SimChannel =
    BusChannel<CriticalSectionDevice<'static, SimBus>, CriticalSectionDevice<'static, SimBus>>;

/// Pause between two loop iterations.
const LOOP_PERIOD: Duration = Duration::from_millis(2);

/// Duration of one ADC integration cycle.
const INTEGRATION_CYCLE: Duration = Duration::from_micros(2400);

struct SlotLayout {
    family: &'static SensorFamily,
    /// `None` for the hardware bus, otherwise the (SDA, SCL) pin pair.
    pins: Option<(u8, u8)>,
    connected: bool,
}

const BANK: [SlotLayout; 6] = [
    SlotLayout {
        family: &TCS3472,
        pins: None,
        connected: true,
    },
    SlotLayout {
        family: &TCS3400,
        pins: None,
        connected: true,
    },
    SlotLayout {
        family: &TCS3472,
        pins: Some((5, 6)),
        connected: true,
    },
    SlotLayout {
        family: &TCS3472,
        pins: Some((15, 16)),
        connected: true,
    },
    SlotLayout {
        family: &TCS3400,
        pins: Some((17, 18)),
        connected: true,
    },
    SlotLayout {
        family: &TCS3472,
        pins: Some((10, 11)),
        connected: false,
    },
];

const LED_LABELS: [&str; 2] = ["tcs0 led", "tcs1 led"];

fn leak_bus(bus: SimBus) -> &'static SharedBus<SimBus> {
    Box::leak(Box::new(shared_bus::shared(bus)))
}

// ---------------------------------------------------------------------------
// Host-side ports
// ---------------------------------------------------------------------------

/// stdin/stdout console. A reader thread feeds stdin bytes into a channel so
/// the loop never blocks on input.
struct StdioConsole {
    input: Receiver<u8>,
    closed: bool,
    stdout: io::Stdout,
}

impl StdioConsole {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for byte in io::stdin().lock().bytes() {
                let Ok(byte) = byte else { break };
                if tx.send(byte).is_err() {
                    break;
                }
            }
        });
        Self {
            input: rx,
            closed: false,
            stdout: io::stdout(),
        }
    }
}

impl fmt::Write for StdioConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes())
    }
}

impl Console for StdioConsole {
    fn read_byte(&mut self) -> Option<u8> {
        match self.input.try_recv() {
            Ok(byte) => Some(byte),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> fmt::Result {
        let mut out = self.stdout.lock();
        out.write_all(bytes)
            .and_then(|()| out.flush())
            .map_err(|_| fmt::Error)
    }

    fn write_headroom(&mut self) -> usize {
        4096
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// RGB output that logs every frame it shows.
#[derive(Default)]
struct LoggedRgb {
    pixels: RgbBuffer<1>,
}

impl RgbOutput for LoggedRgb {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn color(&self, index: usize) -> Option<RGB8> {
        self.pixels.color(index)
    }

    fn set_color(&mut self, index: usize, color: RGB8) -> Result<(), RgbError> {
        self.pixels.set_color(index, color)
    }

    fn show(&mut self) -> Result<(), RgbError> {
        self.pixels.show()?;
        for (index, color) in self.pixels.shown().iter().enumerate() {
            info!(
                "rgb{}: #{:02X}{:02X}{:02X}",
                index, color.r, color.g, color.b
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Synthetic light
// ---------------------------------------------------------------------------

/// Completes conversions on every running simulated sensor at the rate its
/// integration time dictates, with a slowly rotating hue.
struct Scene {
    started: Instant,
    last_conversion: HashMap<(usize, u8), Instant>,
}

impl Scene {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_conversion: HashMap::new(),
        }
    }

    fn advance(&mut self, buses: &[&'static SharedBus<SimBus>]) {
        let now = Instant::now();
        let t = now.duration_since(self.started).as_secs_f64();

        for (bus_index, bus) in buses.iter().enumerate() {
            critical_section::with(|cs| {
                let mut bus = bus.borrow_ref_mut(cs);
                for sensor in bus.sensors_mut() {
                    if !sensor.is_running() {
                        continue;
                    }
                    let key = (bus_index, sensor.address());
                    let due = self
                        .last_conversion
                        .get(&key)
                        .is_none_or(|last| now.duration_since(*last) >= conversion_time(sensor));
                    if due {
                        let phase = bus_index as f64 + f64::from(sensor.address()) / 64.0;
                        sensor.complete_conversion(synthesize(t + phase * 7.0, sensor));
                        self.last_conversion.insert(key, now);
                    }
                }
            });
        }
    }
}

fn integration_cycles(sensor: &SimulatedSensor) -> u32 {
    256 - u32::from(sensor.register(sensor.family().registers.atime))
}

fn conversion_time(sensor: &SimulatedSensor) -> Duration {
    INTEGRATION_CYCLE * integration_cycles(sensor)
}

fn synthesize(t: f64, sensor: &SimulatedSensor) -> Measurement {
    let gain = match sensor.register(sensor.family().registers.gain) & 0x03 {
        0 => 1.0,
        1 => 4.0,
        2 => 16.0,
        _ => 60.0,
    };
    let full_scale = f64::from((1024 * integration_cycles(sensor)).min(65535));
    let exposure = 0.02 * gain;

    let hue = t / 20.0;
    let red = 0.5 + 0.5 * hue.sin();
    let green = 0.5 + 0.5 * (hue + 2.094).sin();
    let blue = 0.5 + 0.5 * (hue + 4.189).sin();
    let counts = |level: f64| (level * exposure * full_scale).min(full_scale) as u16;

    Measurement {
        brightness: counts((red + green + blue) / 1.5),
        red: counts(red),
        green: counts(green),
        blue: counts(blue),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Desktop simulator for the colorbank color sensor bank.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Start with automatic polling enabled
    #[arg(short, long)]
    auto: bool,

    /// Start with input echo disabled
    #[arg(long)]
    no_echo: bool,

    /// No `#warn` lines for missing sensors
    #[arg(short, long)]
    quiet: bool,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = Config::default().poll_interval_ms)]
    poll_interval: u32,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            auto_poll: self.auto,
            echo: !self.no_echo,
            verbose_probe: !self.quiet,
            poll_interval_ms: self.poll_interval,
            ..Config::default()
        }
    }
}

fn main() {
    env_logger::init();
    let config = Args::parse().into_config();
    info!("Starting colorbank simulator");

    let mut hardware_bus = SimBus::new();
    for layout in BANK.iter().filter(|l| l.pins.is_none() && l.connected) {
        hardware_bus.attach(layout.family);
    }
    let hardware_bus = leak_bus(hardware_bus);
    let mut buses = vec![hardware_bus];

    let mut slots: Slots<SimChannel, SimLed> = Slots::new();
    for (index, layout) in BANK.iter().enumerate() {
        let (channel, bus) = match layout.pins {
            None => (
                BusChannel::Hardware(CriticalSectionDevice::new(hardware_bus)),
                BusKind::Hardware {
                    frequency_hz: config.hardware_bus_hz,
                },
            ),
            Some((sda, scl)) => {
                let mut wire = SimBus::new();
                if layout.connected {
                    wire.attach(layout.family);
                }
                let wire = leak_bus(wire);
                buses.push(wire);
                (
                    BusChannel::Software(CriticalSectionDevice::new(wire)),
                    BusKind::Software {
                        sda,
                        scl,
                        frequency_hz: config.software_bus_hz,
                    },
                )
            }
        };

        let led = LED_LABELS.get(index).copied().map(SimLed::new);
        let slot = Slot::new(ColorSensor::new(channel, layout.family), bus, led);
        if slots.push(slot).is_err() {
            warn!("slot table full, dropping slot {}", index);
        }
    }

    let mut app = App::new("colorbank simulator", config, slots, LoggedRgb::default());
    let mut console = StdioConsole::spawn();
    let mut delay = StdDelay;
    let mut scene = Scene::new();
    let started = Instant::now();

    if app.start(&mut console).is_err() {
        error!("stdout closed");
        return;
    }

    while !console.closed {
        scene.advance(&buses);

        let now_ms = started.elapsed().as_millis() as u64;
        if app.tick(&mut console, now_ms, &mut delay).is_err() {
            error!("stdout closed");
            break;
        }
        thread::sleep(LOOP_PERIOD);
    }

    info!("Simulator exiting");
}
