use serde::{Deserialize, Serialize};

/// Shortest hardware watchdog window armed by the bootloader.
pub const WATCHDOG_SHORT_WINDOW_MS: u32 = 800;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfiguration {
    /// How long to listen for a master advertisement before trying to boot.
    pub master_wait_ms: u32,
    /// Suspension timeout of the protocol loop.
    pub protocol_tick_ms: u32,
    /// Idle protocol ticks between two announcements.
    pub announce_interval: u8,
    /// Sleep period while halted, waiting for the watchdog to fire.
    pub halt_sleep_ms: u32,
}

impl Default for TimingConfiguration {
    fn default() -> Self {
        Self { master_wait_ms: 2000, protocol_tick_ms: 100, announce_interval: 16, halt_sleep_ms: 2000 }
    }
}
