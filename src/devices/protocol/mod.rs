//! Slave side of the bootloader protocol.
//!
//! The protocol owns the selection state of this module and is the only
//! component that mutates storage. Every received frame is handled to
//! completion before the next one is looked at: a handler decides an
//! [`AcknowledgeStatus`], and every status other than `DISCARD` and
//! `DO_NOT_ACK` is answered with an acknowledgement frame.
//!
//! # Selection
//!
//! A master first selects a module by UID. Selection realigns the
//! accepted sequence number to that of the select frame; from then on a
//! guarded command is only accepted if its sequence number is exactly
//! two ahead of the last accepted one (one slot for the request, one for
//! the acknowledgement). Selecting another module mutes this one, which
//! stops its periodic announcements until the master moves on.
use nb::block;

use crate::{
    devices::{
        identity::{ModuleName, ModuleType, ModuleUid},
        messages::{
            Acknowledge, AcknowledgePayload, AcknowledgeStatus, Announce, Command, Describe, DescribeCrcs,
            IHexPhase, Message, TEXT_LENGTH,
        },
        traits::{ConfigurationFlash, ProgramFlash},
        transport::Transport,
    },
    error::Error,
    hal::{
        crc::Crc,
        led::{Indicator, Pattern},
    },
    log,
    utilities::guard::Guard,
};

pub mod session;

use session::{ReadBuffer, UpdateSession};

/// `IHEX_READ` address meaning "keep draining the previous read".
pub const CONTINUE_READ: u32 = 0xFFFF_FFFF;

const CRC_CHUNK_LENGTH: usize = 64;

/// What the caller should do after a frame has been handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    Continue,
    /// The master asked for a reset, and has been acknowledged.
    Reset,
    /// The master asked for the bootloader to take over on next reset.
    Bootload,
}

/// Selection state. Changed only by message handlers, one message at a
/// time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionState {
    pub selected: bool,
    /// Last accepted sequence number.
    pub sequence: u8,
    pub muted: bool,
    /// Whether the module is in maintenance mode.
    pub loading: bool,
}

pub struct SlaveProtocol<T, P, C, I, K>
where
    T: Transport,
    P: ProgramFlash,
    C: ConfigurationFlash,
    I: Indicator,
    K: Crc,
{
    pub(crate) transport: T,
    pub(crate) program: P,
    pub(crate) configuration: C,
    pub(crate) indicator: I,
    pub(crate) crc: K,
    uid: ModuleUid,
    module_type: ModuleType,
    state: SessionState,
    update: Option<UpdateSession>,
    read: ReadBuffer,
}

impl<T, P, C, I, K> SlaveProtocol<T, P, C, I, K>
where
    T: Transport,
    P: ProgramFlash,
    C: ConfigurationFlash,
    I: Indicator,
    K: Crc,
{
    pub fn new(
        transport: T,
        program: P,
        configuration: C,
        indicator: I,
        crc: K,
        uid: ModuleUid,
    ) -> Self {
        Self {
            transport,
            program,
            configuration,
            indicator,
            crc,
            uid,
            module_type: ModuleType::configured(),
            state: SessionState::default(),
            update: None,
            read: ReadBuffer::new(),
        }
    }

    pub fn state(&self) -> SessionState { self.state }

    pub fn uid(&self) -> ModuleUid { self.uid }

    pub fn initialize(&mut self) {
        self.indicator.set_active(true);
        self.update_led();
    }

    /// Enters maintenance mode, if a master is known.
    pub fn start(&mut self) {
        if self.transport.is_initialized() {
            self.state.loading = true;
        }
        self.update_led();
    }

    /// Leaves maintenance mode.
    pub fn wait(&mut self) {
        self.state.loading = false;
        self.update_led();
    }

    /// Handles the pending frame, if any, in maintenance mode.
    pub fn process_message(&mut self) -> Disposition {
        let message = match self.transport.receive() {
            Some(message) => message,
            None => return Disposition::Continue,
        };
        let status = self.handle(&message);
        if status.is_acknowledged() {
            self.acknowledge(&message, status);
        } else if status == AcknowledgeStatus::Discard {
            log::debug!("Discarded command {}", message.command.command_byte());
        }
        match (message.command, status) {
            (Command::Reset(_), AcknowledgeStatus::Ok) => Disposition::Reset,
            _ => Disposition::Continue,
        }
    }

    /// Handles the pending frame, if any, outside maintenance mode, where
    /// only bootload requests are honoured. Nothing is acknowledged.
    pub fn process_bootload_message(&mut self) -> Disposition {
        match self.transport.receive().map(|message| message.command) {
            Some(Command::Bootload) => Disposition::Bootload,
            Some(Command::BootloadByName(name)) if name == self.stored_name() => Disposition::Bootload,
            _ => Disposition::Continue,
        }
    }

    /// Advertises this module, unless it is selected or muted.
    pub fn announce(&mut self) {
        if self.state.selected || self.state.muted {
            return;
        }
        let configuration = self.configuration.module_configuration();
        let announce = Announce {
            uid: self.uid,
            program_flash_size: self.program.size(),
            user_flash_size: self.user_flash_size(),
            can_id: configuration.can_id,
            name: ModuleName(configuration.name),
        };
        self.transport.transmit(&Message::new(0, Command::Announce(announce)));
    }

    /// CRC over the whole program region.
    pub fn program_crc(&mut self) -> Result<u32, Error> {
        let (start, end) = self.program.range();
        let mut chunk = [0u8; CRC_CHUNK_LENGTH];
        self.crc.reset();
        let mut address = start;
        while address < end {
            let length = ((end - address) as usize).min(CRC_CHUNK_LENGTH);
            block!(self.program.read(address, &mut chunk[..length]))?;
            self.crc.update(&chunk[..length]);
            address += length as u32;
        }
        Ok(self.crc.value())
    }

    pub fn stored_name(&self) -> ModuleName { ModuleName(self.configuration.module_configuration().name) }

    fn user_flash_size(&self) -> u16 { u16::try_from(self.configuration.user_data_size()).unwrap_or(u16::MAX) }

    fn handle(&mut self, message: &Message) -> AcknowledgeStatus {
        let sequence = message.sequence;
        let status = match message.command {
            Command::Identify(uid) => self.identify(uid),
            Command::Select { uid, .. } => self.select(uid, sequence),
            Command::Deselect(uid) => self.deselect(uid, sequence),
            Command::EraseConfiguration(uid) => self.guarded(uid, sequence, |protocol| {
                outcome(block!(protocol.configuration.erase()).map_err(Error::from))
            }),
            Command::EraseProgram(uid) => self.guarded(uid, sequence, |protocol| {
                let program = &mut protocol.program;
                outcome(block!(program.unlock()).and_then(|_| block!(program.erase())).map_err(Error::from))
            }),
            Command::EraseUserConfiguration(uid) => self.guarded(uid, sequence, |protocol| {
                let configuration = &mut protocol.configuration;
                outcome(
                    block!(configuration.unlock())
                        .and_then(|_| block!(configuration.erase_user_data()))
                        .map_err(Error::from),
                )
            }),
            Command::WriteProgramCrc { uid, crc } => self.guarded(uid, sequence, |protocol| {
                outcome(block!(protocol.configuration.write_program_crc(crc)).map_err(Error::from))
            }),
            Command::WriteModuleName { uid, name } => self.guarded(uid, sequence, |protocol| {
                outcome(block!(protocol.configuration.write_module_name(&name.0)).map_err(Error::from))
            }),
            Command::WriteModuleCanId { uid, can_id } => self.guarded(uid, sequence, |protocol| {
                outcome(block!(protocol.configuration.write_can_id(can_id)).map_err(Error::from))
            }),
            Command::DescribeV2(uid) | Command::DescribeV3(uid) => self.guarded(uid, sequence, |_| AcknowledgeStatus::Ok),
            Command::IHexWrite { phase, text } => {
                if !self.state.selected {
                    AcknowledgeStatus::Discard
                } else if sequence != self.state.sequence.wrapping_add(2) {
                    AcknowledgeStatus::WrongSequence
                } else {
                    self.state.sequence = sequence;
                    self.ihex_write(phase, &text)
                }
            }
            Command::IHexRead { uid, address } => self.guarded(uid, sequence, |protocol| {
                if address == CONTINUE_READ {
                    return AcknowledgeStatus::Ok;
                }
                let SlaveProtocol { read, program, configuration, .. } = protocol;
                outcome(read.load(address, program, configuration))
            }),
            Command::Reset(uid) => self.guarded(uid, sequence, |_| AcknowledgeStatus::Ok),
            Command::Bootload
            | Command::BootloadByName(_)
            | Command::Announce(_)
            | Command::MasterAdvertise
            | Command::Ack(_) => AcknowledgeStatus::Discard,
            Command::Unknown(_) => AcknowledgeStatus::NotImplemented,
        };
        if !matches!(
            status,
            AcknowledgeStatus::Ok | AcknowledgeStatus::IHexOk | AcknowledgeStatus::Discard | AcknowledgeStatus::DoNotAck
        ) {
            log::warn!("Command {} rejected with {}", message.command.command_byte(), status);
        }
        status
    }

    /// Selection and sequence discipline shared by every UID addressed
    /// command. `action` runs only if the command is accepted.
    fn guarded<F>(&mut self, uid: ModuleUid, sequence: u8, action: F) -> AcknowledgeStatus
    where
        F: FnOnce(&mut Self) -> AcknowledgeStatus,
    {
        match (uid == self.uid, self.state.selected) {
            (true, true) if sequence == self.state.sequence.wrapping_add(2) => {
                self.state.sequence = sequence;
                action(self)
            }
            (true, true) => AcknowledgeStatus::WrongSequence,
            (true, false) => AcknowledgeStatus::NotSelected,
            (false, true) => AcknowledgeStatus::WrongUid,
            (false, false) => AcknowledgeStatus::Discard,
        }
    }

    fn identify(&mut self, uid: ModuleUid) -> AcknowledgeStatus {
        if uid == self.uid && !self.state.selected {
            self.indicator.set_pattern(Pattern::Identify);
            return AcknowledgeStatus::Ok;
        }
        self.update_led();
        AcknowledgeStatus::Discard
    }

    fn select(&mut self, uid: ModuleUid, sequence: u8) -> AcknowledgeStatus {
        if uid == self.uid {
            self.state.sequence = sequence;
            self.state.selected = true;
            self.state.muted = false;
            self.update_led();
            AcknowledgeStatus::Ok
        } else {
            self.state.selected = false;
            self.mute(true);
            AcknowledgeStatus::Discard
        }
    }

    fn deselect(&mut self, uid: ModuleUid, sequence: u8) -> AcknowledgeStatus {
        match (uid == self.uid, self.state.selected) {
            (true, true) if sequence == self.state.sequence.wrapping_add(2) => {
                self.state.sequence = sequence;
                self.state.selected = false;
                self.update_led();
                AcknowledgeStatus::Ok
            }
            (true, true) => AcknowledgeStatus::WrongSequence,
            (true, false) => AcknowledgeStatus::Discard,
            (false, true) => AcknowledgeStatus::WrongUid,
            (false, false) => {
                self.mute(false);
                AcknowledgeStatus::Discard
            }
        }
    }

    fn ihex_write(&mut self, phase: u8, text: &[u8; TEXT_LENGTH]) -> AcknowledgeStatus {
        match IHexPhase::from_u8(phase) {
            Some(IHexPhase::Begin) => {
                log::info!("Update session started");
                self.indicator.set_active(false);
                self.update = Some(UpdateSession::begin());
                AcknowledgeStatus::Ok
            }
            Some(IHexPhase::Data) => {
                let SlaveProtocol { update, indicator, program, configuration, .. } = self;
                let session = match update.as_mut() {
                    Some(session) => session,
                    None => return AcknowledgeStatus::Error,
                };
                let fed = {
                    let _led = Guard::new(&mut *indicator, |i| i.force(true), |i| i.force(false));
                    session.feed(text, program, configuration)
                };
                let success = session.success();
                match fed {
                    Ok(()) if success => AcknowledgeStatus::Ok,
                    Ok(()) => AcknowledgeStatus::Error,
                    Err(error) => {
                        error.report();
                        if let Some(session) = update.take() {
                            session.abort(program, configuration);
                        }
                        indicator.set_active(true);
                        AcknowledgeStatus::Error
                    }
                }
            }
            Some(IHexPhase::End) => {
                let session = match self.update.take() {
                    Some(session) => session,
                    None => return AcknowledgeStatus::Error,
                };
                let success = session.end(&mut self.program, &mut self.configuration);
                self.indicator.set_active(true);
                log::info!("Update session finished, success: {}", success);
                if success {
                    AcknowledgeStatus::Ok
                } else {
                    AcknowledgeStatus::Error
                }
            }
            None => AcknowledgeStatus::Broken,
        }
    }

    fn describe(&mut self, with_crcs: bool) -> Result<Describe, Error> {
        let configuration = self.configuration.module_configuration();
        let crcs = if with_crcs {
            Some(DescribeCrcs { image_crc: configuration.image_crc, flash_crc: self.program_crc()? })
        } else {
            None
        };
        Ok(Describe {
            program_flash_size: self.program.size(),
            user_flash_size: self.user_flash_size(),
            can_id: configuration.can_id,
            module_type: self.module_type,
            name: ModuleName(configuration.name),
            crcs,
        })
    }

    fn acknowledge(&mut self, request: &Message, status: AcknowledgeStatus) {
        let accepted = status == AcknowledgeStatus::Ok;
        let (status, payload) = match request.command {
            Command::IHexRead { .. } if accepted => {
                let (text, more) = self.read.next_chunk();
                let status = if more { AcknowledgeStatus::IHexOk } else { AcknowledgeStatus::Ok };
                (status, AcknowledgePayload::Text(text))
            }
            Command::IHexRead { .. } => (status, AcknowledgePayload::Text([0; TEXT_LENGTH])),
            Command::DescribeV2(_) | Command::DescribeV3(_) => {
                let with_crcs = matches!(request.command, Command::DescribeV3(_));
                let empty = Describe { crcs: with_crcs.then(DescribeCrcs::default), ..Describe::default() };
                match accepted.then(|| self.describe(with_crcs)) {
                    Some(Ok(describe)) => (status, AcknowledgePayload::Describe(describe)),
                    Some(Err(error)) => {
                        error.report();
                        (AcknowledgeStatus::Error, AcknowledgePayload::Describe(empty))
                    }
                    None => (status, AcknowledgePayload::Describe(empty)),
                }
            }
            _ => (status, AcknowledgePayload::Uid(self.uid)),
        };
        let acknowledge = Acknowledge { status, request: request.command.command_byte(), payload };
        self.transport.transmit(&Message::new(request.sequence.wrapping_add(1), Command::Ack(acknowledge)));
    }

    fn mute(&mut self, muted: bool) {
        self.state.muted = muted && !self.state.selected;
        self.update_led();
    }

    fn update_led(&mut self) {
        let pattern = match (self.transport.is_initialized(), self.state) {
            (false, _) => Pattern::Waiting,
            (true, SessionState { loading: false, .. }) => Pattern::Initialized,
            (true, SessionState { selected: true, .. }) => Pattern::Selected,
            (true, SessionState { muted: true, .. }) => Pattern::Muted,
            (true, _) => Pattern::Loading,
        };
        self.indicator.set_pattern(pattern);
    }
}

fn outcome(result: Result<(), Error>) -> AcknowledgeStatus {
    match result {
        Ok(()) => AcknowledgeStatus::Ok,
        Err(error) => {
            error.report();
            AcknowledgeStatus::Error
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::{
            messages::{MessageType, LONG_FRAME_LENGTH, TEXT_LENGTH},
            transport::doubles::MockTransport,
        },
        hal::{
            crc::Crc32,
            doubles::{
                flash::{FakeConfigurationStorage, FakeProgramStorage},
                led::FakeIndicator,
            },
        },
        utilities::buffer::trim_nul,
    };

    type TestProtocol =
        SlaveProtocol<MockTransport, FakeProgramStorage, FakeConfigurationStorage, FakeIndicator, Crc32>;

    const U: ModuleUid = ModuleUid([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB]);
    const OTHER: ModuleUid = ModuleUid([0x11; 12]);
    const BASE: u32 = 0x0800_6000;

    fn protocol() -> TestProtocol {
        let mut protocol = SlaveProtocol::new(
            MockTransport::initialized(),
            FakeProgramStorage::new(BASE, 0x100),
            FakeConfigurationStorage::new(64).with_name("gripper").with_can_id(7).with_image_crc(0x1234_5678),
            FakeIndicator::default(),
            Crc32::new(),
            U,
        );
        protocol.initialize();
        protocol.start();
        protocol
    }

    /// Feeds one message and returns the acknowledgement it produced.
    fn exchange(protocol: &mut TestProtocol, sequence: u8, command: Command) -> Option<Acknowledge> {
        let sent = protocol.transport.sent.len();
        protocol.transport.push(Message::new(sequence, command));
        protocol.process_message();
        if protocol.transport.sent.len() == sent {
            return None;
        }
        match protocol.transport.last_sent().map(|message| message.command) {
            Some(Command::Ack(acknowledge)) => Some(acknowledge),
            _ => None,
        }
    }

    fn status(protocol: &mut TestProtocol, sequence: u8, command: Command) -> Option<AcknowledgeStatus> {
        exchange(protocol, sequence, command).map(|acknowledge| acknowledge.status)
    }

    fn hex(phase: IHexPhase, text: &str) -> Command {
        let mut field = [0u8; TEXT_LENGTH];
        field[..text.len()].copy_from_slice(text.as_bytes());
        Command::IHexWrite { phase: phase as u8, text: field }
    }

    fn selected(sequence: u8) -> TestProtocol {
        let mut protocol = protocol();
        assert_eq!(status(&mut protocol, sequence, Command::Select { uid: U, master: 1 }), Some(AcknowledgeStatus::Ok));
        protocol
    }

    #[test]
    fn selection_realigns_the_sequence_regardless_of_prior_state() {
        let mut protocol = selected(5);
        assert_eq!(protocol.state().sequence, 5);
        assert!(protocol.state().selected);

        assert_eq!(status(&mut protocol, 200, Command::Select { uid: U, master: 1 }), Some(AcknowledgeStatus::Ok));
        assert_eq!(protocol.state().sequence, 200);
    }

    #[test]
    fn guarded_commands_need_the_next_sequence_number() {
        let mut protocol = selected(5);
        let ack = exchange(&mut protocol, 7, Command::EraseProgram(U)).unwrap();
        assert_eq!(ack.status, AcknowledgeStatus::Ok);
        assert_eq!(ack.request, MessageType::EraseProgram as u8);
        assert_eq!(ack.payload, AcknowledgePayload::Uid(U));
        assert_eq!(protocol.transport.last_sent().unwrap().sequence, 8);
        assert_eq!(protocol.program.erase_count, 1);
        assert!(protocol.program.unlocked);

        assert_eq!(status(&mut protocol, 7, Command::EraseProgram(U)), Some(AcknowledgeStatus::WrongSequence));
        assert_eq!(protocol.program.erase_count, 1);
        assert_eq!(protocol.state().sequence, 7);
    }

    #[test]
    fn sequence_numbers_wrap() {
        let mut protocol = selected(255);
        assert_eq!(status(&mut protocol, 1, Command::EraseConfiguration(U)), Some(AcknowledgeStatus::Ok));
        assert_eq!(protocol.transport.last_sent().unwrap().sequence, 2);
    }

    #[test]
    fn rejections_depend_on_uid_and_selection() {
        let mut protocol = protocol();
        assert_eq!(status(&mut protocol, 3, Command::EraseProgram(U)), Some(AcknowledgeStatus::NotSelected));
        assert_eq!(status(&mut protocol, 3, Command::EraseProgram(OTHER)), None);

        let mut protocol = selected(5);
        assert_eq!(status(&mut protocol, 7, Command::EraseProgram(OTHER)), Some(AcknowledgeStatus::WrongUid));
        assert_eq!(protocol.program.erase_count, 0);
        assert_eq!(protocol.state().sequence, 5);
    }

    #[test]
    fn repeated_deselect_is_discarded() {
        let mut protocol = selected(5);
        assert_eq!(status(&mut protocol, 7, Command::Deselect(U)), Some(AcknowledgeStatus::Ok));
        assert!(!protocol.state().selected);
        let pattern_changes = protocol.indicator.patterns.len();
        assert_eq!(status(&mut protocol, 7, Command::Deselect(U)), None);
        assert_eq!(protocol.indicator.patterns.len(), pattern_changes);
    }

    #[test]
    fn selecting_another_module_mutes_announcements() {
        let mut protocol = protocol();
        protocol.announce();
        assert!(matches!(protocol.transport.last_sent().unwrap().command, Command::Announce(_)));

        assert_eq!(status(&mut protocol, 5, Command::Select { uid: OTHER, master: 1 }), None);
        assert!(protocol.state().muted);
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Muted));
        let sent = protocol.transport.sent.len();
        protocol.announce();
        assert_eq!(protocol.transport.sent.len(), sent);

        assert_eq!(status(&mut protocol, 7, Command::Deselect(OTHER)), None);
        assert!(!protocol.state().muted);
        protocol.announce();
        assert_eq!(protocol.transport.sent.len(), sent + 1);
    }

    #[test]
    fn announcements_describe_the_module() {
        let mut protocol = protocol();
        protocol.announce();
        match protocol.transport.last_sent().unwrap().command {
            Command::Announce(announce) => {
                assert_eq!(announce.uid, U);
                assert_eq!(announce.program_flash_size, 0x100);
                assert_eq!(announce.user_flash_size, 64);
                assert_eq!(announce.can_id, 7);
                assert_eq!(announce.name, ModuleName::new("gripper"));
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[test]
    fn selected_modules_do_not_announce() {
        let mut protocol = selected(5);
        let sent = protocol.transport.sent.len();
        protocol.announce();
        assert_eq!(protocol.transport.sent.len(), sent);
    }

    #[test]
    fn identify_only_answers_for_an_unselected_match() {
        let mut protocol = protocol();
        assert_eq!(status(&mut protocol, 1, Command::Identify(U)), Some(AcknowledgeStatus::Ok));
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Identify));
        assert_eq!(status(&mut protocol, 1, Command::Identify(OTHER)), None);
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Loading));

        let mut protocol = selected(5);
        assert_eq!(status(&mut protocol, 1, Command::Identify(U)), None);
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Selected));
    }

    #[test]
    fn configuration_writes_reach_storage() {
        let mut protocol = selected(5);
        let name = ModuleName::new("left_wheel");
        assert_eq!(status(&mut protocol, 7, Command::WriteModuleName { uid: U, name }), Some(AcknowledgeStatus::Ok));
        assert_eq!(
            status(&mut protocol, 9, Command::WriteModuleCanId { uid: U, can_id: 0x33 }),
            Some(AcknowledgeStatus::Ok)
        );
        assert_eq!(
            status(&mut protocol, 11, Command::WriteProgramCrc { uid: U, crc: 0xCAFE }),
            Some(AcknowledgeStatus::Ok)
        );
        let stored = protocol.configuration.configuration;
        assert_eq!(stored.name, name.0);
        assert_eq!(stored.can_id, 0x33);
        assert_eq!(stored.image_crc, 0xCAFE);

        assert_eq!(status(&mut protocol, 13, Command::EraseConfiguration(U)), Some(AcknowledgeStatus::Ok));
        assert!(ModuleName(protocol.configuration.configuration.name).is_blank());
    }

    #[test]
    fn storage_failures_are_reported_as_errors() {
        let mut protocol = selected(5);
        protocol.configuration.broken = true;
        assert_eq!(status(&mut protocol, 7, Command::EraseUserConfiguration(U)), Some(AcknowledgeStatus::Error));
        assert_eq!(protocol.state().sequence, 7);
    }

    #[test]
    fn a_complete_update_session_writes_program_flash() {
        let mut protocol = selected(5);
        assert_eq!(status(&mut protocol, 7, hex(IHexPhase::Begin, "")), Some(AcknowledgeStatus::Ok));
        assert!(!protocol.indicator.active);
        assert_eq!(
            status(&mut protocol, 9, hex(IHexPhase::Data, ":020000040800F2\n:046000000102030492\n")),
            Some(AcknowledgeStatus::Ok)
        );
        assert_eq!(protocol.indicator.forced, vec![true, false]);
        assert_eq!(status(&mut protocol, 11, hex(IHexPhase::End, "")), Some(AcknowledgeStatus::Ok));
        assert!(protocol.indicator.active);
        assert_eq!(&protocol.program.data[..4], &[1, 2, 3, 4]);
        assert!(!protocol.program.writing);
    }

    #[test]
    fn out_of_range_data_latches_failure_until_end() {
        let mut protocol = selected(5);
        status(&mut protocol, 7, hex(IHexPhase::Begin, ""));
        assert_eq!(status(&mut protocol, 9, hex(IHexPhase::Data, ":02100000AABB89\n")), Some(AcknowledgeStatus::Error));
        assert_eq!(
            status(&mut protocol, 11, hex(IHexPhase::Data, ":020000040800F2\n:046000000102030492\n")),
            Some(AcknowledgeStatus::Error)
        );
        assert!(protocol.program.writes.is_empty());
        assert_eq!(status(&mut protocol, 13, hex(IHexPhase::End, "")), Some(AcknowledgeStatus::Error));

        // A new session starts clean.
        status(&mut protocol, 15, hex(IHexPhase::Begin, ""));
        assert_eq!(status(&mut protocol, 17, hex(IHexPhase::End, "")), Some(AcknowledgeStatus::Ok));
    }

    #[test]
    fn malformed_hex_aborts_the_session() {
        let mut protocol = selected(5);
        status(&mut protocol, 7, hex(IHexPhase::Begin, ""));
        assert_eq!(status(&mut protocol, 9, hex(IHexPhase::Data, ":03000100010203F6\n")), Some(AcknowledgeStatus::Error));
        assert!(protocol.indicator.active);
        assert_eq!(status(&mut protocol, 11, hex(IHexPhase::Data, ":00000001FF\n")), Some(AcknowledgeStatus::Error));
        assert_eq!(status(&mut protocol, 13, hex(IHexPhase::End, "")), Some(AcknowledgeStatus::Error));
    }

    #[test]
    fn hex_writes_need_selection_and_a_known_phase() {
        let mut protocol = protocol();
        assert_eq!(status(&mut protocol, 7, hex(IHexPhase::Begin, "")), None);

        let mut protocol = selected(5);
        assert_eq!(
            status(&mut protocol, 7, Command::IHexWrite { phase: 9, text: [0; TEXT_LENGTH] }),
            Some(AcknowledgeStatus::Broken)
        );
        assert_eq!(status(&mut protocol, 8, hex(IHexPhase::Begin, "")), Some(AcknowledgeStatus::WrongSequence));
    }

    #[test]
    fn hex_reads_are_drained_across_acknowledgements() {
        let mut protocol = selected(5);
        protocol.program.load(BASE, &(0u8..16).collect::<Vec<u8>>());

        let first = exchange(&mut protocol, 7, Command::IHexRead { uid: U, address: BASE }).unwrap();
        assert_eq!(first.status, AcknowledgeStatus::IHexOk);
        let second = exchange(&mut protocol, 9, Command::IHexRead { uid: U, address: CONTINUE_READ }).unwrap();
        assert_eq!(second.status, AcknowledgeStatus::Ok);

        let mut text = Vec::new();
        for ack in [first, second] {
            match ack.payload {
                AcknowledgePayload::Text(chunk) => text.extend_from_slice(trim_nul(&chunk)),
                other => panic!("Unexpected payload {:?}", other),
            }
        }
        assert_eq!(
            text,
            b":020000040800F2\n:10600000000102030405060708090A0B0C0D0E0F18\n:00000001FF\n".to_vec()
        );
    }

    #[test]
    fn continuing_without_a_prior_read_yields_an_empty_chunk() {
        let mut protocol = selected(5);
        let ack = exchange(&mut protocol, 7, Command::IHexRead { uid: U, address: CONTINUE_READ }).unwrap();
        assert_eq!(ack.status, AcknowledgeStatus::Ok);
        assert_eq!(ack.payload, AcknowledgePayload::Text([0; TEXT_LENGTH]));
    }

    #[test]
    fn reading_outside_storage_is_an_error() {
        let mut protocol = selected(5);
        assert_eq!(
            status(&mut protocol, 7, Command::IHexRead { uid: U, address: 0x2000_0000 }),
            Some(AcknowledgeStatus::Error)
        );
    }

    #[test]
    fn describe_reports_stored_and_computed_crcs() {
        let mut protocol = selected(5);
        let ack = exchange(&mut protocol, 7, Command::DescribeV3(U)).unwrap();
        let expected_crc = Crc32::new().checksum(&[0xFF; 0x100]);
        match ack.payload {
            AcknowledgePayload::Describe(describe) => {
                assert_eq!(describe.program_flash_size, 0x100);
                assert_eq!(describe.user_flash_size, 64);
                assert_eq!(describe.can_id, 7);
                assert_eq!(describe.module_type, ModuleType::new(crate::config::MODULE_TYPE));
                assert_eq!(describe.name, ModuleName::new("gripper"));
                let crcs = DescribeCrcs { image_crc: 0x1234_5678, flash_crc: expected_crc };
                assert_eq!(describe.crcs, Some(crcs));
            }
            other => panic!("Unexpected payload {:?}", other),
        }

        let ack = exchange(&mut protocol, 7, Command::DescribeV2(U)).unwrap();
        assert_eq!(ack.status, AcknowledgeStatus::WrongSequence);
        assert_eq!(ack.payload, AcknowledgePayload::Describe(Describe::default()));
    }

    #[test]
    fn describe_v2_reply_carries_no_crcs() {
        let mut protocol = selected(5);
        let ack = exchange(&mut protocol, 7, Command::DescribeV2(U)).unwrap();
        match ack.payload {
            AcknowledgePayload::Describe(describe) => {
                assert_eq!(describe.name, ModuleName::new("gripper"));
                assert_eq!(describe.crcs, None);
            }
            other => panic!("Unexpected payload {:?}", other),
        }

        let mut frame = [0xAAu8; LONG_FRAME_LENGTH];
        protocol.transport.sent.last().unwrap().encode(&mut frame).unwrap();
        assert_eq!(&frame[23..39], &ModuleName::new("gripper").0);
        assert_eq!(&frame[39..43], &[0; 4]);
        assert!(frame[39..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn unknown_commands_are_not_implemented() {
        let mut protocol = protocol();
        let ack = exchange(&mut protocol, 4, Command::Unknown(0x42)).unwrap();
        assert_eq!(ack.status, AcknowledgeStatus::NotImplemented);
        assert_eq!(ack.request, 0x42);
    }

    #[test]
    fn foreign_traffic_is_discarded() {
        let mut protocol = selected(5);
        assert_eq!(status(&mut protocol, 7, Command::Bootload), None);
        assert_eq!(status(&mut protocol, 7, Command::MasterAdvertise), None);
        assert_eq!(protocol.state().sequence, 5);
    }

    #[test]
    fn reset_is_acknowledged_before_it_happens() {
        let mut protocol = selected(5);
        protocol.transport.push(Message::new(7, Command::Reset(U)));
        assert_eq!(protocol.process_message(), Disposition::Reset);
        assert!(matches!(
            protocol.transport.last_sent().unwrap().command,
            Command::Ack(Acknowledge { status: AcknowledgeStatus::Ok, .. })
        ));

        protocol.transport.push(Message::new(7, Command::Reset(U)));
        assert_eq!(protocol.process_message(), Disposition::Continue);
    }

    #[test]
    fn outside_maintenance_only_bootload_requests_count() {
        let mut protocol = protocol();
        protocol.wait();
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Initialized));

        protocol.transport.push(Message::new(0, Command::Select { uid: U, master: 1 }));
        assert_eq!(protocol.process_bootload_message(), Disposition::Continue);
        protocol.transport.push(Message::new(0, Command::BootloadByName(ModuleName::new("other"))));
        assert_eq!(protocol.process_bootload_message(), Disposition::Continue);
        protocol.transport.push(Message::new(0, Command::BootloadByName(ModuleName::new("gripper"))));
        assert_eq!(protocol.process_bootload_message(), Disposition::Bootload);
        protocol.transport.push(Message::new(0, Command::Bootload));
        assert_eq!(protocol.process_bootload_message(), Disposition::Bootload);
        assert!(protocol.transport.sent.is_empty());
        assert!(!protocol.state().selected);
    }

    #[test]
    fn indicator_follows_transport_and_selection() {
        let mut protocol = SlaveProtocol::new(
            MockTransport::default(),
            FakeProgramStorage::new(BASE, 0x100),
            FakeConfigurationStorage::new(64),
            FakeIndicator::default(),
            Crc32::new(),
            U,
        );
        protocol.initialize();
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Waiting));
        protocol.start();
        assert!(!protocol.state().loading);

        protocol.transport.initialized = true;
        protocol.start();
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Loading));
        protocol.wait();
        assert_eq!(protocol.indicator.pattern(), Some(Pattern::Initialized));
    }
}
