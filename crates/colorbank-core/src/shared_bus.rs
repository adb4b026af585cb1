//! Shared hardware I2C bus
//!
//! Several slots live on the one hardware controller. The controller is
//! stored once as a [`SharedBus`] and every slot gets its own
//! [`CriticalSectionDevice`] onto it; each transaction takes the bus for its
//! whole duration, so a register write followed by a read never interleaves
//! with another slot's traffic.
//!
//! # Example
//!
//! ```ignore
//! use static_cell::StaticCell;
//!
//! static I2C_BUS: StaticCell<SharedBus<esp_hal::i2c::master::I2c<'static, esp_hal::Blocking>>> =
//!     StaticCell::new();
//!
//! let i2c_bus = I2C_BUS.init(shared(i2c));
//!
//! let device1 = CriticalSectionDevice::new(i2c_bus);
//! let device2 = CriticalSectionDevice::new(i2c_bus);
//! ```

use core::cell::RefCell;

use critical_section::Mutex;

pub use embedded_hal_bus::i2c::CriticalSectionDevice;

/// The hardware controller as stored in a `static`.
pub type SharedBus<T> = Mutex<RefCell<T>>;

/// Wrap a controller for sharing.
pub const fn shared<T>(bus: T) -> SharedBus<T> {
    Mutex::new(RefCell::new(bus))
}
