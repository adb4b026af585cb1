//! AMS TCS3400 color light-to-digital converter (TCS34001/3/5/7)
//!
//! Same register layout as the TCS3472 moved up to 0x80, but without a
//! command register: the register address is sent as-is.

use super::{RegisterMap, SensorFamily};
use crate::register::ControlByte;

pub const TCS3400: SensorFamily = SensorFamily {
    name: "TCS3400",
    code: 3400,
    address: 0x39,
    control: ControlByte {
        prefix: 0x00,
        mask: 0xff,
    },
    // AICLEAR: clears all ALS interrupts
    clear_interrupt_command: 0xe7,
    registers: RegisterMap {
        enable: 0x80,
        atime: 0x81,
        persistence: 0x8c,
        gain: 0x8f,
        id: 0x92,
        status: 0x93,
        data: 0x94,
    },
    // 0x90: TCS34001/5. TCS34003/7 report 0x93 but answer at 0x29.
    part_numbers: &[0x90],
    gain_shift: 0,
    gain_flags: 0x00,
    enable_setup: 0x11,
    enable_running: 0x0b,
    status_ready: 0x10,
    dump_window: 32,
};
