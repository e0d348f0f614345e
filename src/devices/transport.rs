//! CAN transport between the slave protocol and the bus driver.
//!
//! Reception is split in two halves. [`Lanes`] is shared with the
//! receive interrupt: every completed frame is copied into the in-flight
//! half of a double buffer and the halves are swapped inside a critical
//! section, so the interrupt always has a free buffer. [`CanTransport`]
//! lives in the protocol thread, drains the ready halves and owns the
//! single transmit buffer.
//!
//! Until a master advertises itself on the discovery topic only
//! discovery frames are accepted. The first advertisement latches the
//! master address; after that, command frames addressed from that master
//! are accepted as well. A later advertisement re-latches the address.
use core::cell::RefCell;

use critical_section::Mutex;
use nb::block;

use crate::{
    devices::{
        identity::ModuleUid,
        messages::{Message, LONG_FRAME_LENGTH, SHORT_FRAME_LENGTH},
        traits::CanBus,
    },
    error::Error,
    hal::{
        bus::{FrameId, BOOTLOADER_TOPIC, DISCOVERY_TOPIC, UNASSIGNED_ADDRESS},
        time::Milliseconds,
    },
    log,
    utilities::lfsr::Lfsr,
};

/// Capabilities the slave protocol needs from a transport.
pub trait Transport {
    /// Whether a master address has been latched.
    fn is_initialized(&self) -> bool;

    /// Sends one message to the master. Returns `false` when no master
    /// is known yet or the bus refused the frame.
    fn transmit(&mut self, message: &Message) -> bool;

    /// Takes the most recent frame, if any, decoding it.
    fn receive(&mut self) -> Option<Message>;

    /// Opens the discovery filter. Returns `false` if a master is
    /// already latched.
    fn listen_for_master(&mut self) -> bool;

    /// Binds the module's own bus address, drawing a random one when the
    /// stored address is unassigned. `None` before a master is known.
    fn bind(&mut self, can_id: u8) -> Option<u8>;

    /// Releases the bus before leaving the bootloader.
    fn shutdown(&mut self);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Link {
    Initializing,
    Initialized { master: u8 },
}

/// Two receive buffers of one frame class: one being filled by the
/// interrupt, one waiting for the protocol thread.
struct DoubleBuffer<const N: usize> {
    buffers: [[u8; N]; 2],
    in_flight: usize,
    ready: Option<usize>,
}

impl<const N: usize> DoubleBuffer<N> {
    const fn new() -> Self { Self { buffers: [[0; N]; 2], in_flight: 0, ready: None } }

    /// Stores a completed frame and swaps halves. An unread ready frame is
    /// overwritten by the newer one.
    fn complete(&mut self, data: &[u8]) {
        let buffer = &mut self.buffers[self.in_flight];
        let length = data.len().min(N);
        buffer[..length].copy_from_slice(&data[..length]);
        buffer[length..].iter_mut().for_each(|byte| *byte = 0);
        self.ready = Some(self.in_flight);
        self.in_flight ^= 1;
    }

    fn take(&mut self) -> Option<[u8; N]> { self.ready.take().map(|index| self.buffers[index]) }

    fn clear(&mut self) { self.ready = None; }
}

struct LaneState {
    link: Link,
    discovery: DoubleBuffer<SHORT_FRAME_LENGTH>,
    commands: DoubleBuffer<LONG_FRAME_LENGTH>,
}

/// Receive state shared between the bus interrupt and the protocol
/// thread. Meant to live in a `static`.
pub struct Lanes {
    state: Mutex<RefCell<LaneState>>,
}

impl Default for Lanes {
    fn default() -> Self { Self::new() }
}

impl Lanes {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(LaneState {
                link: Link::Initializing,
                discovery: DoubleBuffer::new(),
                commands: DoubleBuffer::new(),
            })),
        }
    }

    /// Receive interrupt entry point. Returns whether the frame was
    /// accepted, in which case the protocol thread should be resumed.
    pub fn on_frame(&self, id: FrameId, data: &[u8]) -> bool {
        critical_section::with(|cs| {
            let mut lanes = self.state.borrow_ref_mut(cs);
            if id.topic() == DISCOVERY_TOPIC {
                lanes.discovery.complete(data);
                lanes.link = Link::Initialized { master: id.address() };
                return true;
            }
            match lanes.link {
                Link::Initialized { master } if id == FrameId::new(BOOTLOADER_TOPIC, master) => {
                    lanes.commands.complete(data);
                    true
                }
                _ => false,
            }
        })
    }

    pub fn master(&self) -> Option<u8> {
        critical_section::with(|cs| match self.state.borrow_ref(cs).link {
            Link::Initialized { master } => Some(master),
            Link::Initializing => None,
        })
    }

    fn is_initialized(&self) -> bool { self.master().is_some() }

    fn discard_pending(&self) {
        critical_section::with(|cs| {
            let mut lanes = self.state.borrow_ref_mut(cs);
            lanes.discovery.clear();
            lanes.commands.clear();
        })
    }

    fn take_command(&self) -> Option<[u8; LONG_FRAME_LENGTH]> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).commands.take())
    }

    fn take_discovery(&self) -> Option<[u8; SHORT_FRAME_LENGTH]> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).discovery.take())
    }
}

/// Production transport over a CAN controller.
pub struct CanTransport<'a, B: CanBus> {
    bus: B,
    lanes: &'a Lanes,
    tx: [u8; LONG_FRAME_LENGTH],
    address: u8,
    lfsr: Lfsr,
}

impl<'a, B: CanBus> CanTransport<'a, B> {
    pub fn new(bus: B, lanes: &'a Lanes, uid: &ModuleUid) -> Self {
        Self {
            bus,
            lanes,
            tx: [0; LONG_FRAME_LENGTH],
            address: UNASSIGNED_ADDRESS,
            lfsr: Lfsr::from_uid(uid.as_bytes()),
        }
    }

    /// Own bus address, `0xFF` until bound.
    pub fn address(&self) -> u8 { self.address }

    fn send(&mut self, message: &Message) -> Result<(), Error> {
        let length = message.encode(&mut self.tx)?;
        let timeout = Milliseconds(self.lfsr.next_value() as u32);
        let id = FrameId::new(BOOTLOADER_TOPIC, self.address);
        block!(self.bus.transmit(id, &self.tx[..length], timeout))?;
        Ok(())
    }
}

impl<'a, B: CanBus> Transport for CanTransport<'a, B> {
    fn is_initialized(&self) -> bool { self.lanes.is_initialized() }

    fn transmit(&mut self, message: &Message) -> bool {
        if !self.is_initialized() {
            return false;
        }
        match self.send(message) {
            Ok(()) => true,
            Err(error) => {
                error.report();
                false
            }
        }
    }

    fn receive(&mut self) -> Option<Message> {
        if !self.is_initialized() {
            return None;
        }
        let decoded = match self.lanes.take_command() {
            Some(frame) => Message::decode(&frame),
            None => Message::decode(&self.lanes.take_discovery()?),
        };
        decoded.map_err(|error| error.report()).ok()
    }

    fn listen_for_master(&mut self) -> bool {
        if self.is_initialized() {
            return false;
        }
        self.lanes.discard_pending();
        true
    }

    fn bind(&mut self, can_id: u8) -> Option<u8> {
        let master = self.lanes.master()?;
        let mut address = can_id;
        while address == UNASSIGNED_ADDRESS {
            address = self.lfsr.next_byte();
        }
        self.address = address;
        log::info!("Master {} found, bound to address {}", master, address);
        Some(address)
    }

    fn shutdown(&mut self) { self.bus.stop(); }
}

#[cfg(not(target_arch = "arm"))]
#[doc(hidden)]
pub mod doubles {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted transport: hands out queued messages and records what the
    /// protocol sends back.
    #[derive(Default)]
    pub struct MockTransport {
        pub initialized: bool,
        pub inbox: VecDeque<Message>,
        pub sent: Vec<Message>,
        pub listening: bool,
        pub bound: Option<u8>,
        pub shut_down: bool,
        /// Latched when the driver next listens, as if a master answered.
        pub master_on_listen: bool,
    }

    impl MockTransport {
        pub fn initialized() -> Self { Self { initialized: true, ..Default::default() } }

        pub fn push(&mut self, message: Message) { self.inbox.push_back(message); }

        pub fn last_sent(&self) -> Option<&Message> { self.sent.last() }
    }

    impl Transport for MockTransport {
        fn is_initialized(&self) -> bool { self.initialized }

        fn transmit(&mut self, message: &Message) -> bool {
            if !self.initialized {
                return false;
            }
            self.sent.push(*message);
            true
        }

        fn receive(&mut self) -> Option<Message> {
            if !self.initialized {
                return None;
            }
            self.inbox.pop_front()
        }

        fn listen_for_master(&mut self) -> bool {
            if self.initialized {
                return false;
            }
            self.listening = true;
            if self.master_on_listen {
                self.initialized = true;
            }
            true
        }

        fn bind(&mut self, can_id: u8) -> Option<u8> {
            if !self.initialized {
                return None;
            }
            let address = if can_id == UNASSIGNED_ADDRESS { 0x42 } else { can_id };
            self.bound = Some(address);
            Some(address)
        }

        fn shutdown(&mut self) { self.shut_down = true; }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::messages::{Command, IHexPhase, TEXT_LENGTH},
        hal::doubles::bus::FakeBus,
    };

    const UID: ModuleUid = ModuleUid([7; 12]);
    const MASTER: u8 = 0x11;

    fn advertise(lanes: &Lanes, master: u8) -> bool {
        lanes.on_frame(FrameId::new(DISCOVERY_TOPIC, master), &[0x03, 0, 0, 0, 0, 0, 0, 0])
    }

    fn command_frame(sequence: u8) -> [u8; LONG_FRAME_LENGTH] {
        let mut frame = [0u8; LONG_FRAME_LENGTH];
        Message::new(sequence, Command::Deselect(UID)).encode(&mut frame).unwrap();
        frame
    }

    #[test]
    fn commands_are_ignored_until_a_master_advertises() {
        let lanes = Lanes::new();
        let mut transport = CanTransport::new(FakeBus::default(), &lanes, &UID);
        assert!(transport.listen_for_master());
        assert!(!lanes.on_frame(FrameId::new(BOOTLOADER_TOPIC, MASTER), &command_frame(1)));
        assert!(!transport.is_initialized());
        assert_eq!(transport.receive(), None);

        assert!(advertise(&lanes, MASTER));
        assert!(transport.is_initialized());
        assert!(!transport.listen_for_master());
        assert_eq!(transport.receive(), Some(Message::new(0, Command::MasterAdvertise)));
    }

    #[test]
    fn only_frames_from_the_latched_master_are_accepted() {
        let lanes = Lanes::new();
        let mut transport = CanTransport::new(FakeBus::default(), &lanes, &UID);
        advertise(&lanes, MASTER);
        transport.receive();

        assert!(!lanes.on_frame(FrameId::new(BOOTLOADER_TOPIC, 0x12), &command_frame(1)));
        assert!(!lanes.on_frame(FrameId::new(0xFE, MASTER), &command_frame(1)));
        assert_eq!(transport.receive(), None);

        assert!(lanes.on_frame(FrameId::new(BOOTLOADER_TOPIC, MASTER), &command_frame(3)));
        assert_eq!(transport.receive(), Some(Message::new(3, Command::Deselect(UID))));
        assert_eq!(transport.receive(), None);
    }

    #[test]
    fn last_advertiser_wins() {
        let lanes = Lanes::new();
        advertise(&lanes, MASTER);
        advertise(&lanes, 0x22);
        assert_eq!(lanes.master(), Some(0x22));
        assert!(!lanes.on_frame(FrameId::new(BOOTLOADER_TOPIC, MASTER), &command_frame(1)));
    }

    #[test]
    fn newer_frame_replaces_an_unread_one() {
        let lanes = Lanes::new();
        let mut transport = CanTransport::new(FakeBus::default(), &lanes, &UID);
        advertise(&lanes, MASTER);
        transport.receive();
        lanes.on_frame(FrameId::new(BOOTLOADER_TOPIC, MASTER), &command_frame(1));
        lanes.on_frame(FrameId::new(BOOTLOADER_TOPIC, MASTER), &command_frame(3));
        assert_eq!(transport.receive().map(|message| message.sequence), Some(3));
    }

    #[test]
    fn transmission_requires_a_master_and_uses_the_own_address() {
        let lanes = Lanes::new();
        let mut transport = CanTransport::new(FakeBus { busy_for: 2, ..Default::default() }, &lanes, &UID);
        let message = Message::new(
            4,
            Command::IHexWrite { phase: IHexPhase::End as u8, text: [0; TEXT_LENGTH] },
        );
        assert!(!transport.transmit(&message));
        assert_eq!(transport.bind(0x30), None);

        advertise(&lanes, MASTER);
        assert_eq!(transport.bind(0x30), Some(0x30));
        assert!(transport.transmit(&message));

        let (id, data, timeout) = &transport.bus.sent[0];
        assert_eq!(*id, FrameId(0xFD30));
        assert_eq!(data.len(), LONG_FRAME_LENGTH);
        assert_eq!(&data[..3], &[0x50, 4, 0x03]);
        assert!(timeout.0 > 0);
    }

    #[test]
    fn unassigned_address_is_drawn_from_the_uid_seeded_register() {
        let lanes = Lanes::new();
        let mut transport = CanTransport::new(FakeBus::default(), &lanes, &UID);
        advertise(&lanes, MASTER);
        let address = transport.bind(UNASSIGNED_ADDRESS).unwrap();
        assert_eq!(address, 0x83);
        assert_eq!(transport.address(), address);
    }

    #[test]
    fn bus_failures_are_not_escalated() {
        let lanes = Lanes::new();
        let mut transport = CanTransport::new(FakeBus { broken: true, ..Default::default() }, &lanes, &UID);
        advertise(&lanes, MASTER);
        transport.bind(1);
        assert!(!transport.transmit(&Message::new(0, Command::Bootload)));
        transport.shutdown();
        assert!(transport.bus.stopped);
    }
}
