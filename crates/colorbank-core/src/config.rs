use serde::{Deserialize, Serialize};

/// Runtime tunables of the control loop.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Minimum time between two automatic poll cycles.
    pub poll_interval_ms: u32,
    /// Automatic polling is skipped while the console can accept fewer bytes
    /// than this without blocking.
    pub min_write_headroom: usize,
    /// Print `#warn` diagnostics when a slot fails its identification check.
    pub verbose_probe: bool,
    /// Initial state of the `echo` toggle.
    pub echo: bool,
    /// Initial state of the `auto` toggle.
    pub auto_poll: bool,
    pub software_bus_hz: u32,
    pub hardware_bus_hz: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            min_write_headroom: 10,
            verbose_probe: true,
            echo: true,
            auto_poll: false,
            software_bus_hz: 100_000,
            hardware_bus_hz: 400_000,
        }
    }
}
