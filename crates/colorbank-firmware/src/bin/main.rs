#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig, Pin};
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use log::{error, info};

use colorbank_core::sensors::{TCS3400, TCS3472};
use colorbank_core::{App, Config, SerialConsole};
use colorbank_firmware::hardware::{self, SlotWiring, Wire};
use colorbank_firmware::rgb_pins::GpioRgb;
use colorbank_firmware::uart_port::{TX_FIFO_LEN, UartPort};

const LOOP_PERIOD: Duration = Duration::from_millis(1);
const BAUD_RATE: u32 = 115_200;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Park the core after a fatal setup error; the RTT log holds the reason.
async fn halt() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "the slot table and line buffers live in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let config = Config::default();

    let uart = match Uart::new(
        peripherals.UART0,
        UartConfig::default().with_baudrate(BAUD_RATE),
    ) {
        Ok(uart) => uart
            .with_tx(peripherals.GPIO43)
            .with_rx(peripherals.GPIO44),
        Err(e) => {
            error!("UART0 setup failed: {:?}", e);
            halt().await
        }
    };
    let mut console = SerialConsole::new(UartPort::new(uart), TX_FIFO_LEN);

    let i2c = match hardware::hardware_i2c(
        peripherals.I2C0,
        peripherals.GPIO8.degrade(),
        peripherals.GPIO9.degrade(),
        &config,
    ) {
        Ok(i2c) => i2c,
        Err(e) => {
            error!("I2C0 setup failed: {:?}", e);
            halt().await
        }
    };
    let bus = hardware::share_hardware_bus(i2c);

    let wiring = [
        SlotWiring {
            family: &TCS3472,
            wire: Wire::Hardware,
            led: Some(peripherals.GPIO4.degrade()),
        },
        SlotWiring {
            family: &TCS3472,
            wire: Wire::Software {
                sda: peripherals.GPIO5.degrade(),
                scl: peripherals.GPIO6.degrade(),
            },
            led: Some(peripherals.GPIO7.degrade()),
        },
        SlotWiring {
            family: &TCS3400,
            wire: Wire::Hardware,
            led: None,
        },
        SlotWiring {
            family: &TCS3400,
            wire: Wire::Software {
                sda: peripherals.GPIO15.degrade(),
                scl: peripherals.GPIO16.degrade(),
            },
            led: None,
        },
    ];
    let slots = hardware::build_slots(bus, wiring, &config);

    let rgb = GpioRgb::new(
        Output::new(peripherals.GPIO12, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO13, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO14, Level::Low, OutputConfig::default()),
    );

    let mut app = App::new("colorbank", config, slots, rgb);
    let mut delay = Delay::new();

    if app.start(&mut console).is_err() {
        error!("console write failed");
    }

    loop {
        let now_ms = Instant::now().as_millis();
        if app.tick(&mut console, now_ms, &mut delay).is_err() {
            error!("console write failed");
        }
        Timer::after(LOOP_PERIOD).await;
    }
}
