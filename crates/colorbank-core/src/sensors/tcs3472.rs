//! AMS TCS3472x color light-to-digital converter (TCS34721/3/5/7)

use super::{RegisterMap, SensorFamily};
use crate::register::ControlByte;

pub const TCS3472: SensorFamily = SensorFamily {
    name: "TCS3472",
    code: 3472,
    address: 0x29,
    // CMD bit plus auto-increment protocol; register number in the low 5 bits
    control: ControlByte {
        prefix: 0xa0,
        mask: 0x1f,
    },
    // CMD | special function | clear channel interrupt
    clear_interrupt_command: 0xe6,
    registers: RegisterMap {
        enable: 0x00,
        atime: 0x01,
        persistence: 0x0c,
        gain: 0x0f,
        id: 0x12,
        status: 0x13,
        data: 0x14,
    },
    // 0x44: TCS34721/5 (I2C at VDD), 0x4D: TCS34723/7 (I2C at 1.8 V)
    part_numbers: &[0x44, 0x4d],
    gain_shift: 0,
    gain_flags: 0x00,
    // PON | AIEN
    enable_setup: 0x11,
    // PON | AEN | WEN
    enable_running: 0x0b,
    // AINT
    status_ready: 0x10,
    dump_window: 32,
};
