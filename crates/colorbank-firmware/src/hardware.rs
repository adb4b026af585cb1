//! Board wiring
//!
//! | Slot | Family  | Bus                   | LED     |
//! |------|---------|-----------------------|---------|
//! | 0    | TCS3472 | hardware, GPIO 8/9    | GPIO 4  |
//! | 1    | TCS3472 | software, GPIO 5/6    | GPIO 7  |
//! | 2    | TCS3400 | hardware, GPIO 8/9    | -       |
//! | 3    | TCS3400 | software, GPIO 15/16  | -       |
//!
//! The RGB status LED sits on GPIO 12/13/14 and the protocol console on
//! UART0 (TX 43, RX 44).

use embedded_hal_bus::i2c::CriticalSectionDevice;
use esp_hal::Blocking;
use esp_hal::delay::Delay;
use esp_hal::gpio::{AnyPin, DriveMode, Flex, InputConfig, Level, Output, OutputConfig, Pin, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, ConfigError, I2c};
use esp_hal::peripherals::I2C0;
use esp_hal::time::Rate;
use log::{info, warn};
use static_cell::StaticCell;

use colorbank_core::app_state::Slots;
use colorbank_core::bus::{BusChannel, BusKind};
use colorbank_core::sensors::{ColorSensor, SensorFamily};
use colorbank_core::shared_bus::{self, SharedBus};
use colorbank_core::soft_i2c::SoftI2c;
use colorbank_core::{Config, Slot};

pub type HardwareI2c = I2c<'static, Blocking>;
pub type SoftwareI2c = SoftI2c<Flex<'static>, Flex<'static>, Delay>;
pub type SlotChannel = BusChannel<CriticalSectionDevice<'static, HardwareI2c>, SoftwareI2c>;
pub type Led = Output<'static>;
pub type BoardSlots = Slots<SlotChannel, Led>;

/// Which transport a slot's sensor hangs off.
pub enum Wire {
    Hardware,
    Software {
        sda: AnyPin<'static>,
        scl: AnyPin<'static>,
    },
}

/// One row of the board table.
pub struct SlotWiring {
    pub family: &'static SensorFamily,
    pub wire: Wire,
    pub led: Option<AnyPin<'static>>,
}

static I2C0_BUS: StaticCell<SharedBus<HardwareI2c>> = StaticCell::new();

/// Bring up the hardware controller at the configured clock rate.
pub fn hardware_i2c(
    i2c0: I2C0<'static>,
    sda: AnyPin<'static>,
    scl: AnyPin<'static>,
    config: &Config,
) -> Result<HardwareI2c, ConfigError> {
    let i2c_config = I2cConfig::default().with_frequency(Rate::from_hz(config.hardware_bus_hz));
    Ok(I2c::new(i2c0, i2c_config)?.with_sda(sda).with_scl(scl))
}

/// Move the controller into static storage so several slots can share it.
///
/// Must only be called once.
pub fn share_hardware_bus(i2c: HardwareI2c) -> &'static SharedBus<HardwareI2c> {
    I2C0_BUS.init(shared_bus::shared(i2c))
}

/// Configure a pin as an open-drain I2C line with the internal pull-up.
fn open_drain(pin: AnyPin<'static>) -> Flex<'static> {
    let mut line = Flex::new(pin);
    line.apply_input_config(&InputConfig::default().with_pull(Pull::Up));
    line.apply_output_config(
        &OutputConfig::default()
            .with_drive_mode(DriveMode::OpenDrain)
            .with_pull(Pull::Up),
    );
    line.set_high();
    line.set_input_enable(true);
    line.set_output_enable(true);
    line
}

fn indicator(pin: AnyPin<'static>) -> Led {
    Output::new(pin, Level::Low, OutputConfig::default())
}

/// Build the slot table from the board wiring. Rows beyond the slot limit
/// are dropped with a warning.
pub fn build_slots(
    bus: &'static SharedBus<HardwareI2c>,
    wiring: impl IntoIterator<Item = SlotWiring>,
    config: &Config,
) -> BoardSlots {
    let mut slots = BoardSlots::new();

    for (index, row) in wiring.into_iter().enumerate() {
        let (channel, kind) = match row.wire {
            Wire::Hardware => (
                BusChannel::Hardware(CriticalSectionDevice::new(bus)),
                BusKind::Hardware {
                    frequency_hz: config.hardware_bus_hz,
                },
            ),
            Wire::Software { sda, scl } => {
                let kind = BusKind::Software {
                    sda: sda.number(),
                    scl: scl.number(),
                    frequency_hz: config.software_bus_hz,
                };
                let channel = SoftI2c::new(
                    open_drain(sda),
                    open_drain(scl),
                    Delay::new(),
                    config.software_bus_hz,
                );
                (BusChannel::Software(channel), kind)
            }
        };

        info!(
            "tcs{}: {} on {} bus",
            index,
            row.family.name,
            kind.label()
        );

        let led = row.led.map(indicator);
        let slot = Slot::new(ColorSensor::new(channel, row.family), kind, led);
        if slots.push(slot).is_err() {
            warn!("slot table full, dropping tcs{}", index);
        }
    }

    slots
}
