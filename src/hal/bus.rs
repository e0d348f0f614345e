//! CAN bus interface.
//!
//! Every frame carries a 16 bit identifier built from a topic (high byte)
//! and a module address (low byte).
use core::fmt::Debug;

use crate::hal::time::Milliseconds;

/// Master advertisements, received through a mask on the topic byte.
pub const DISCOVERY_TOPIC: u8 = 0xFC;
/// Bootloader traffic, in both directions.
pub const BOOTLOADER_TOPIC: u8 = 0xFD;
/// Address value meaning "not assigned".
pub const UNASSIGNED_ADDRESS: u8 = 0xFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameId(pub u16);

impl FrameId {
    pub const fn new(topic: u8, address: u8) -> Self {
        FrameId(((topic as u16) << 8) | address as u16)
    }

    pub const fn topic(&self) -> u8 { (self.0 >> 8) as u8 }

    pub const fn address(&self) -> u8 { (self.0 & 0x00FF) as u8 }
}

/// Transmit side of a CAN controller. Reception is interrupt driven and
/// reaches the transport through its lanes instead.
pub trait Bus {
    type Error: Copy + Debug;

    /// Queues one frame. `WouldBlock` while the controller is busy; the
    /// controller gives up on its own after `timeout`.
    fn transmit(&mut self, id: FrameId, data: &[u8], timeout: Milliseconds) -> nb::Result<(), Self::Error>;

    /// Releases the controller before control leaves the bootloader.
    fn stop(&mut self) {}
}
