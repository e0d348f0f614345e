//! CRC engine interface.
use crc::{crc32, Hasher32};

/// Running CRC over a sequence of memory blocks.
pub trait Crc {
    fn reset(&mut self);
    fn update(&mut self, bytes: &[u8]);
    fn value(&self) -> u32;

    fn checksum(&mut self, bytes: &[u8]) -> u32 {
        self.reset();
        self.update(bytes);
        self.value()
    }
}

/// Software CRC-32 (IEEE polynomial), matching the STM32 CRC unit once
/// that is configured for reflected input and output.
pub struct Crc32 {
    digest: crc32::Digest,
}

impl Crc32 {
    pub fn new() -> Self { Self { digest: crc32::Digest::new(crc32::IEEE) } }
}

impl Default for Crc32 {
    fn default() -> Self { Self::new() }
}

impl Crc for Crc32 {
    fn reset(&mut self) { self.digest.reset(); }

    fn update(&mut self, bytes: &[u8]) { self.digest.write(bytes); }

    fn value(&self) -> u32 { self.digest.sum32() }
}
