use serde::{Deserialize, Serialize};

#[macro_export(local_inner_macros)]
macro_rules! KB {
    ($val:expr) => {
        $val * 1024
    };
}

/// Layout of the application image and the user data area.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfiguration {
    /// First address of the application image. The bootloader jumps here.
    pub program_flash_start: u32,
    /// One past the last address of the application image.
    pub program_flash_end: u32,
    /// Bytes of user data kept alongside the configuration record.
    pub user_data_size: u32,
}

impl MemoryConfiguration {
    pub fn program_flash_size(&self) -> u32 {
        self.program_flash_end.saturating_sub(self.program_flash_start)
    }
}

impl Default for MemoryConfiguration {
    fn default() -> Self {
        // 256K part, 24K reserved for the bootloader, 4K for configuration banks.
        Self {
            program_flash_start: 0x0800_6000,
            program_flash_end: 0x0800_0000 + KB!(252),
            user_data_size: 1024,
        }
    }
}
