//! Identifiers a module presents on the bus.
use crate::{
    config,
    hal::{crc::Crc, storage::MODULE_NAME_LENGTH},
    utilities::buffer::{pad_field, trim_nul},
};

pub const UID_LENGTH: usize = 12;
pub const MODULE_TYPE_LENGTH: usize = 12;

/// Opaque module identifier, stable for the lifetime of the silicon.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleUid(pub [u8; UID_LENGTH]);

impl ModuleUid {
    /// Reduces a hardware unique ID of any length to 12 bytes: three
    /// CRC-32 words, each over a different one byte salt plus the ID.
    pub fn from_hardware<C: Crc>(hardware_id: &[u8], crc: &mut C) -> Self {
        let mut uid = [0u8; UID_LENGTH];
        for (salt, word) in uid.chunks_mut(4).enumerate() {
            crc.reset();
            crc.update(&[salt as u8]);
            crc.update(hardware_id);
            word.copy_from_slice(&crc.value().to_le_bytes());
        }
        Self(uid)
    }

    pub fn as_bytes(&self) -> &[u8; UID_LENGTH] { &self.0 }
}

/// User assigned module name, nul padded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleName(pub [u8; MODULE_NAME_LENGTH]);

impl ModuleName {
    /// Truncates names longer than 16 bytes.
    pub fn new(name: &str) -> Self { Self(pad_field(name.as_bytes())) }

    /// Erased configuration reads back as `0xFF`.
    pub fn is_blank(&self) -> bool { self.0[0] == 0xFF }

    pub fn trimmed(&self) -> &[u8] { trim_nul(&self.0) }
}

impl Default for ModuleName {
    fn default() -> Self { Self([0; MODULE_NAME_LENGTH]) }
}

/// Firmware family, fixed at build time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleType(pub [u8; MODULE_TYPE_LENGTH]);

impl ModuleType {
    pub fn new(module_type: &str) -> Self { Self(pad_field(module_type.as_bytes())) }

    /// The firmware family configured at build time.
    pub fn configured() -> Self { Self::new(config::MODULE_TYPE) }
}

impl Default for ModuleType {
    fn default() -> Self { Self([0; MODULE_TYPE_LENGTH]) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::crc::Crc32;

    #[test]
    fn uid_reduction_is_stable_and_salted() {
        let hardware_id = [0x34, 0x00, 0x3F, 0x00, 0x0E, 0x47, 0x33, 0x38, 0x31, 0x32, 0x35, 0x37];
        let mut crc = Crc32::new();
        let uid = ModuleUid::from_hardware(&hardware_id, &mut crc);
        assert_eq!(uid, ModuleUid::from_hardware(&hardware_id, &mut crc));
        assert_ne!(uid.0[0..4], uid.0[4..8]);
        assert_ne!(uid.0[4..8], uid.0[8..12]);

        let mut other = hardware_id;
        other[11] ^= 1;
        assert_ne!(uid, ModuleUid::from_hardware(&other, &mut crc));
    }

    #[test]
    fn names_are_padded_and_truncated() {
        let name = ModuleName::new("left_wheel");
        assert_eq!(name.trimmed(), b"left_wheel");
        assert_eq!(name.0[10..], [0u8; 6]);
        assert!(!name.is_blank());

        let long = ModuleName::new("a_name_that_is_far_too_long");
        assert_eq!(long.trimmed(), b"a_name_that_is_f");
        assert!(ModuleName([0xFF; MODULE_NAME_LENGTH]).is_blank());
    }

    #[test]
    fn configured_module_type_comes_from_the_build_configuration() {
        let module_type = ModuleType::configured();
        assert_eq!(trim_nul(&module_type.0), config::MODULE_TYPE.as_bytes());
        assert_ne!(module_type, ModuleType::default());
    }
}
