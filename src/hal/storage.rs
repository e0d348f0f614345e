//! Program and configuration storage interfaces.
//!
//! The bootloader never touches flash directly. Every address decision
//! goes through `is_address_valid` / `is_user_address_valid`, and every
//! write goes through a `begin_write` .. `end_write` bracket.
use core::fmt::Debug;

/// Length of the stored module name.
pub const MODULE_NAME_LENGTH: usize = 16;

/// Record kept in the redundant configuration banks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleConfiguration {
    /// Nul padded. An erased record reads as all `0xFF`.
    pub name: [u8; MODULE_NAME_LENGTH],
    /// Bus address, `0xFF` when unassigned.
    pub can_id: u8,
    /// CRC the master computed over the image it wrote.
    pub image_crc: u32,
}

impl ModuleConfiguration {
    pub const fn erased() -> Self {
        Self { name: [0xFF; MODULE_NAME_LENGTH], can_id: 0xFF, image_crc: 0xFFFF_FFFF }
    }
}

/// Application image region.
pub trait ProgramStorage {
    type Error: Copy + Debug;

    /// Address range `[start, end)` of the image region.
    fn range(&self) -> (u32, u32);
    fn size(&self) -> u32 {
        let (start, end) = self.range();
        end.saturating_sub(start)
    }
    fn is_address_valid(&self, address: u32) -> bool {
        let (start, end) = self.range();
        (start..end).contains(&address)
    }

    fn unlock(&mut self) -> nb::Result<(), Self::Error>;
    fn erase(&mut self) -> nb::Result<(), Self::Error>;

    /// Whether a write bracket is open.
    fn is_ready(&self) -> bool;
    fn begin_write(&mut self) -> nb::Result<(), Self::Error>;
    fn write16(&mut self, address: u32, value: u16) -> nb::Result<(), Self::Error>;
    fn end_write(&mut self) -> nb::Result<(), Self::Error>;

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> nb::Result<(), Self::Error>;
}

/// Configuration record plus the user data area, both backed by two
/// redundant banks.
pub trait ConfigurationStorage {
    type Error: Copy + Debug;

    fn module_configuration(&self) -> ModuleConfiguration;

    fn unlock(&mut self) -> nb::Result<(), Self::Error>;
    /// Erases the configuration record.
    fn erase(&mut self) -> nb::Result<(), Self::Error>;
    fn write_module_name(&mut self, name: &[u8; MODULE_NAME_LENGTH]) -> nb::Result<(), Self::Error>;
    fn write_can_id(&mut self, can_id: u8) -> nb::Result<(), Self::Error>;
    fn write_program_crc(&mut self, crc: u32) -> nb::Result<(), Self::Error>;

    /// User data addresses are offsets into the user data area.
    fn user_data_size(&self) -> u32;
    fn is_user_address_valid(&self, address: u32) -> bool { address < self.user_data_size() }
    fn erase_user_data(&mut self) -> nb::Result<(), Self::Error>;

    /// Whether a user data write bracket is open.
    fn is_ready(&self) -> bool;
    fn begin_write(&mut self) -> nb::Result<(), Self::Error>;
    fn write_user_data16(&mut self, address: u32, value: u16) -> nb::Result<(), Self::Error>;
    fn end_write(&mut self) -> nb::Result<(), Self::Error>;

    fn read_user_data(&mut self, address: u32, bytes: &mut [u8]) -> nb::Result<(), Self::Error>;
}
