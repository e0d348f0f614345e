use super::error::FakeError;
use crate::hal::storage::{self, ModuleConfiguration, MODULE_NAME_LENGTH};

const ERASED: u8 = 0xFF;

/// Program flash over a `Vec`, starting erased.
pub struct FakeProgramStorage {
    base: u32,
    pub data: Vec<u8>,
    pub unlocked: bool,
    pub writing: bool,
    pub erase_count: usize,
    pub writes: Vec<(u32, u16)>,
    /// Makes every write and erase fail.
    pub broken: bool,
}

impl FakeProgramStorage {
    pub fn new(base: u32, length: usize) -> Self {
        Self {
            base,
            data: vec![ERASED; length],
            unlocked: false,
            writing: false,
            erase_count: 0,
            writes: Vec::new(),
            broken: false,
        }
    }

    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn check(&self) -> nb::Result<(), FakeError> {
        if self.broken {
            Err(nb::Error::Other(FakeError))
        } else {
            Ok(())
        }
    }
}

impl storage::ProgramStorage for FakeProgramStorage {
    type Error = FakeError;

    fn range(&self) -> (u32, u32) { (self.base, self.base + self.data.len() as u32) }

    fn unlock(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.unlocked = true;
        Ok(())
    }

    fn erase(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        if !self.unlocked {
            return Err(nb::Error::Other(FakeError));
        }
        self.data.iter_mut().for_each(|byte| *byte = ERASED);
        self.erase_count += 1;
        Ok(())
    }

    fn is_ready(&self) -> bool { self.writing }

    fn begin_write(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.writing = true;
        Ok(())
    }

    fn write16(&mut self, address: u32, value: u16) -> nb::Result<(), Self::Error> {
        self.check()?;
        if !self.writing
            || !storage::ProgramStorage::is_address_valid(self, address)
            || address % 2 != 0
        {
            return Err(nb::Error::Other(FakeError));
        }
        self.load(address, &value.to_le_bytes());
        self.writes.push((address, value));
        Ok(())
    }

    fn end_write(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.writing = false;
        Ok(())
    }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        if address < self.base {
            return Err(nb::Error::Other(FakeError));
        }
        let offset = (address - self.base) as usize;
        let end = offset + bytes.len();
        if end > self.data.len() {
            return Err(nb::Error::Other(FakeError));
        }
        bytes.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }
}

/// Configuration record plus a user data area, starting erased.
pub struct FakeConfigurationStorage {
    pub configuration: ModuleConfiguration,
    pub user: Vec<u8>,
    pub unlocked: bool,
    pub writing: bool,
    pub name_writes: usize,
    pub broken: bool,
}

impl FakeConfigurationStorage {
    pub fn new(user_data_size: usize) -> Self {
        Self {
            configuration: ModuleConfiguration::erased(),
            user: vec![ERASED; user_data_size],
            unlocked: false,
            writing: false,
            name_writes: 0,
            broken: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        let mut bytes = [0u8; MODULE_NAME_LENGTH];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        self.configuration.name = bytes;
        self
    }

    pub fn with_can_id(mut self, can_id: u8) -> Self {
        self.configuration.can_id = can_id;
        self
    }

    pub fn with_image_crc(mut self, crc: u32) -> Self {
        self.configuration.image_crc = crc;
        self
    }

    fn check(&self) -> nb::Result<(), FakeError> {
        if self.broken {
            Err(nb::Error::Other(FakeError))
        } else {
            Ok(())
        }
    }
}

impl storage::ConfigurationStorage for FakeConfigurationStorage {
    type Error = FakeError;

    fn module_configuration(&self) -> ModuleConfiguration { self.configuration }

    fn unlock(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.unlocked = true;
        Ok(())
    }

    fn erase(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.configuration = ModuleConfiguration::erased();
        Ok(())
    }

    fn write_module_name(&mut self, name: &[u8; MODULE_NAME_LENGTH]) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.configuration.name = *name;
        self.name_writes += 1;
        Ok(())
    }

    fn write_can_id(&mut self, can_id: u8) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.configuration.can_id = can_id;
        Ok(())
    }

    fn write_program_crc(&mut self, crc: u32) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.configuration.image_crc = crc;
        Ok(())
    }

    fn user_data_size(&self) -> u32 { self.user.len() as u32 }

    fn erase_user_data(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        if !self.unlocked {
            return Err(nb::Error::Other(FakeError));
        }
        self.user.iter_mut().for_each(|byte| *byte = ERASED);
        Ok(())
    }

    fn is_ready(&self) -> bool { self.writing }

    fn begin_write(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.writing = true;
        Ok(())
    }

    fn write_user_data16(&mut self, address: u32, value: u16) -> nb::Result<(), Self::Error> {
        self.check()?;
        let offset = address as usize;
        if !self.writing || offset + 2 > self.user.len() {
            return Err(nb::Error::Other(FakeError));
        }
        self.user[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn end_write(&mut self) -> nb::Result<(), Self::Error> {
        self.check()?;
        self.writing = false;
        Ok(())
    }

    fn read_user_data(&mut self, address: u32, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        let offset = address as usize;
        let end = offset + bytes.len();
        if end > self.user.len() {
            return Err(nb::Error::Other(FakeError));
        }
        bytes.copy_from_slice(&self.user[offset..end]);
        Ok(())
    }
}
