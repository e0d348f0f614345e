//! This canboot sub-crate contains all definitions to help generate
//! the build-time constants of the bootloader.
//!
//! NOTE: This code is not included anywhere from the bootloader itself!
//! It is a dependency of the **build script**, which deserializes a
//! [`Configuration`] and uses [`codegen`] to emit the constants that the
//! library includes (module identity, memory map, timing).

use std::fmt::Display;

use anyhow::{bail, Result};
use identity::Identity;
use memory::MemoryConfiguration;
use serde::{Deserialize, Serialize};
use timing::TimingConfiguration;

pub mod codegen;
pub mod identity;
pub mod memory;
pub mod timing;

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Configuration {
    pub identity: Identity,
    pub memory_configuration: MemoryConfiguration,
    pub timing_configuration: TimingConfiguration,
}

impl Configuration {
    pub fn new(
        identity: Identity,
        memory_configuration: MemoryConfiguration,
        timing_configuration: TimingConfiguration,
    ) -> Self {
        Self { identity, memory_configuration, timing_configuration }
    }

    pub fn complete(&self) -> bool { self.required_configuration_steps().count() == 0 }

    pub fn required_configuration_steps(&self) -> impl Iterator<Item = RequiredConfigurationStep> {
        #[rustfmt::skip]
        let steps = [
            self.identity.module_type.is_empty()
                .then_some(RequiredConfigurationStep::ModuleType),

            (self.identity.module_type.len() > identity::MODULE_TYPE_LENGTH)
                .then_some(RequiredConfigurationStep::ShortModuleType),

            (self.identity.default_module_name.is_empty()
                || self.identity.default_module_name.len() > identity::MODULE_NAME_LENGTH)
                .then_some(RequiredConfigurationStep::DefaultModuleName),

            (self.memory_configuration.program_flash_end
                <= self.memory_configuration.program_flash_start)
                .then_some(RequiredConfigurationStep::ProgramFlashRange),

            (self.memory_configuration.program_flash_start % 4 != 0
                || self.memory_configuration.program_flash_end % 4 != 0)
                .then_some(RequiredConfigurationStep::ProgramFlashAlignment),

            (self.memory_configuration.user_data_size > u16::MAX as u32)
                .then_some(RequiredConfigurationStep::UserDataSize),

            (self.timing_configuration.announce_interval == 0)
                .then_some(RequiredConfigurationStep::AnnounceInterval),

            (self.timing_configuration.protocol_tick_ms == 0
                || self.timing_configuration.protocol_tick_ms >= timing::WATCHDOG_SHORT_WINDOW_MS)
                .then_some(RequiredConfigurationStep::ProtocolTick),
        ];
        steps.into_iter().flatten()
    }

    /// Fails with a description of every missing or invalid setting.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<String> =
            self.required_configuration_steps().map(|step| step.to_string()).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            bail!("Incomplete configuration: {}", missing.join("; "))
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequiredConfigurationStep {
    ModuleType,
    ShortModuleType,
    DefaultModuleName,
    ProgramFlashRange,
    ProgramFlashAlignment,
    UserDataSize,
    AnnounceInterval,
    ProtocolTick,
}

impl Display for RequiredConfigurationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RequiredConfigurationStep::ModuleType => "[Required] Define a module type",
            RequiredConfigurationStep::ShortModuleType => {
                "[Required] Module type must fit in 12 characters"
            }
            RequiredConfigurationStep::DefaultModuleName => {
                "[Required] Default module name must have between 1 and 16 characters"
            }
            RequiredConfigurationStep::ProgramFlashRange => {
                "[Required] Program flash must end after it starts"
            }
            RequiredConfigurationStep::ProgramFlashAlignment => {
                "[Required] Program flash boundaries must be word aligned"
            }
            RequiredConfigurationStep::UserDataSize => {
                "[Required] User data size must fit in 16 bits"
            }
            RequiredConfigurationStep::AnnounceInterval => {
                "[Required] Announce interval must be at least one tick"
            }
            RequiredConfigurationStep::ProtocolTick => {
                "[Required] Protocol tick must be shorter than the shortest watchdog window"
            }
        })
    }
}
