//! Build-time configuration.
//!
//! The constants below are generated by the build script from the RON
//! configuration in `CANBOOT_CONFIG` (see the `canboot_config` crate).
#![allow(missing_docs)]

use crate::hal::{
    storage::{ConfigurationStorage, ProgramStorage},
    time::{Milliseconds, U32Ext},
};

include!(concat!(env!("OUT_DIR"), "/configuration.rs"));

/// Suspension timeouts used by the boot decision driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Listening window for a master advertisement.
    pub master_wait: Milliseconds,
    /// Protocol loop suspension timeout.
    pub protocol_tick: Milliseconds,
    /// Idle ticks between two announcements.
    pub announce_interval: u8,
    /// Sleep period of a halted module waiting for its watchdog.
    pub halt_sleep: Milliseconds,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            master_wait: MASTER_WAIT_MS.ms(),
            protocol_tick: PROTOCOL_TICK_MS.ms(),
            announce_interval: ANNOUNCE_INTERVAL,
            halt_sleep: HALT_SLEEP_MS.ms(),
        }
    }
}

/// Storage layout the application image is linked against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryMap {
    /// Application image region, end exclusive.
    pub program_flash: (u32, u32),
    pub user_data_size: u32,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self { program_flash: (PROGRAM_FLASH_START, PROGRAM_FLASH_END), user_data_size: USER_DATA_SIZE }
    }
}

impl MemoryMap {
    /// Whether the storage drivers cover exactly the configured regions.
    pub fn matches<P, C>(&self, program: &P, configuration: &C) -> bool
    where
        P: ProgramStorage,
        C: ConfigurationStorage,
    {
        program.range() == self.program_flash && configuration.user_data_size() == self.user_data_size
    }
}
