//! Wire format of the bootloader protocol.
//!
//! Every frame starts with a command byte and a sequence byte, followed
//! by a command specific payload and zero padding up to the frame class
//! length: 8 bytes for short frames, 48 for long ones. Multi-byte fields
//! are little-endian.
//!
//! Encoding and decoding go field by field; nothing here depends on the
//! in-memory layout of the Rust types.
use nom::{
    bytes::complete::take,
    combinator::{map, map_res},
    number::complete::{le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};
use static_assertions::const_assert;

use crate::{
    devices::identity::{ModuleName, ModuleType, ModuleUid, MODULE_TYPE_LENGTH, UID_LENGTH},
    error::Error,
    hal::storage::MODULE_NAME_LENGTH,
};

pub const SHORT_FRAME_LENGTH: usize = 8;
pub const LONG_FRAME_LENGTH: usize = 48;
pub const HEADER_LENGTH: usize = 2;
/// Hex text carried by `IHEX_WRITE` frames and by string acknowledgements.
pub const TEXT_LENGTH: usize = 44;

const ACK_HEADER_LENGTH: usize = HEADER_LENGTH + 2;
const DESCRIBE_BASE_LENGTH: usize = 4 + 2 + 1 + MODULE_TYPE_LENGTH + MODULE_NAME_LENGTH;
const ANNOUNCE_LENGTH: usize = UID_LENGTH + 4 + 2 + 1 + MODULE_NAME_LENGTH;

const_assert!(HEADER_LENGTH + 1 + TEXT_LENGTH <= LONG_FRAME_LENGTH);
const_assert!(ACK_HEADER_LENGTH + TEXT_LENGTH == LONG_FRAME_LENGTH);
const_assert!(ACK_HEADER_LENGTH + DESCRIBE_BASE_LENGTH + 8 <= LONG_FRAME_LENGTH);
const_assert!(HEADER_LENGTH + ANNOUNCE_LENGTH <= LONG_FRAME_LENGTH);
const_assert!(HEADER_LENGTH + UID_LENGTH + MODULE_NAME_LENGTH <= LONG_FRAME_LENGTH);

/// Fixed total length a message occupies on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameClass {
    Short,
    Long,
}

impl FrameClass {
    pub const fn length(&self) -> usize {
        match self {
            FrameClass::Short => SHORT_FRAME_LENGTH,
            FrameClass::Long => LONG_FRAME_LENGTH,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    Request = 0x01,
    IdentifySlave = 0x02,
    MasterAdvertise = 0x03,
    EraseConfiguration = 0x04,
    EraseProgram = 0x05,
    WriteProgramCrc = 0x06,
    EraseUserConfiguration = 0x07,
    SelectSlave = 0x10,
    DeselectSlave = 0x11,
    DescribeV2 = 0x21,
    DescribeV3 = 0x22,
    WriteModuleName = 0x27,
    WriteModuleCanId = 0x28,
    IHexWrite = 0x50,
    IHexRead = 0x51,
    Reset = 0x60,
    Bootload = 0x70,
    BootloadByName = 0x71,
    Ack = 0xFF,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use MessageType::*;
        [
            Request,
            IdentifySlave,
            MasterAdvertise,
            EraseConfiguration,
            EraseProgram,
            WriteProgramCrc,
            EraseUserConfiguration,
            SelectSlave,
            DeselectSlave,
            DescribeV2,
            DescribeV3,
            WriteModuleName,
            WriteModuleCanId,
            IHexWrite,
            IHexRead,
            Reset,
            Bootload,
            BootloadByName,
            Ack,
        ]
        .into_iter()
        .find(|message_type| *message_type as u8 == value)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AcknowledgeStatus {
    Ok = 0x01,
    WrongUid = 0x02,
    WrongSequence = 0x03,
    Discard = 0x04,
    NotSelected = 0x05,
    NotImplemented = 0x06,
    Broken = 0x07,
    Error = 0x08,
    /// More text follows in the next string acknowledgement.
    IHexOk = 0x09,
    DoNotAck = 0x0A,
}

impl AcknowledgeStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        use AcknowledgeStatus::*;
        [Ok, WrongUid, WrongSequence, Discard, NotSelected, NotImplemented, Broken, Error, IHexOk, DoNotAck]
            .into_iter()
            .find(|status| *status as u8 == value)
    }

    /// Whether this status produces a reply frame.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, AcknowledgeStatus::Discard | AcknowledgeStatus::DoNotAck)
    }
}

/// Phase tag of an `IHEX_WRITE` frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IHexPhase {
    Begin = 0x01,
    Data = 0x02,
    End = 0x03,
}

impl IHexPhase {
    pub fn from_u8(value: u8) -> Option<Self> {
        [IHexPhase::Begin, IHexPhase::Data, IHexPhase::End]
            .into_iter()
            .find(|phase| *phase as u8 == value)
    }
}

/// Periodic self-advertisement of an unselected module.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Announce {
    pub uid: ModuleUid,
    pub program_flash_size: u32,
    pub user_flash_size: u16,
    pub can_id: u8,
    pub name: ModuleName,
}

/// Checksums trailing a V3 description: the one stored with the image
/// and the one computed over program flash.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct DescribeCrcs {
    pub image_crc: u32,
    pub flash_crc: u32,
}

/// Module description returned by the describe commands. A V2
/// description ends after the module name and carries no `crcs`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Describe {
    pub program_flash_size: u32,
    pub user_flash_size: u16,
    pub can_id: u8,
    pub module_type: ModuleType,
    pub name: ModuleName,
    pub crcs: Option<DescribeCrcs>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcknowledgePayload {
    Uid(ModuleUid),
    Describe(Describe),
    Text([u8; TEXT_LENGTH]),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Acknowledge {
    pub status: AcknowledgeStatus,
    /// Command byte of the request being answered.
    pub request: u8,
    pub payload: AcknowledgePayload,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Announce(Announce),
    Identify(ModuleUid),
    MasterAdvertise,
    Select { uid: ModuleUid, master: u8 },
    Deselect(ModuleUid),
    EraseConfiguration(ModuleUid),
    EraseProgram(ModuleUid),
    EraseUserConfiguration(ModuleUid),
    WriteProgramCrc { uid: ModuleUid, crc: u32 },
    WriteModuleName { uid: ModuleUid, name: ModuleName },
    WriteModuleCanId { uid: ModuleUid, can_id: u8 },
    DescribeV2(ModuleUid),
    DescribeV3(ModuleUid),
    /// `phase` stays raw so unknown phases can be answered with `BROKEN`.
    IHexWrite { phase: u8, text: [u8; TEXT_LENGTH] },
    IHexRead { uid: ModuleUid, address: u32 },
    Reset(ModuleUid),
    Bootload,
    BootloadByName(ModuleName),
    Ack(Acknowledge),
    /// Any command byte outside the closed command set.
    Unknown(u8),
}

impl Command {
    pub fn command_byte(&self) -> u8 {
        let message_type = match self {
            Command::Announce(_) => MessageType::Request,
            Command::Identify(_) => MessageType::IdentifySlave,
            Command::MasterAdvertise => MessageType::MasterAdvertise,
            Command::Select { .. } => MessageType::SelectSlave,
            Command::Deselect(_) => MessageType::DeselectSlave,
            Command::EraseConfiguration(_) => MessageType::EraseConfiguration,
            Command::EraseProgram(_) => MessageType::EraseProgram,
            Command::EraseUserConfiguration(_) => MessageType::EraseUserConfiguration,
            Command::WriteProgramCrc { .. } => MessageType::WriteProgramCrc,
            Command::WriteModuleName { .. } => MessageType::WriteModuleName,
            Command::WriteModuleCanId { .. } => MessageType::WriteModuleCanId,
            Command::DescribeV2(_) => MessageType::DescribeV2,
            Command::DescribeV3(_) => MessageType::DescribeV3,
            Command::IHexWrite { .. } => MessageType::IHexWrite,
            Command::IHexRead { .. } => MessageType::IHexRead,
            Command::Reset(_) => MessageType::Reset,
            Command::Bootload => MessageType::Bootload,
            Command::BootloadByName(_) => MessageType::BootloadByName,
            Command::Ack(_) => MessageType::Ack,
            Command::Unknown(raw) => return *raw,
        };
        message_type as u8
    }

    pub fn class(&self) -> FrameClass {
        match self {
            Command::MasterAdvertise => FrameClass::Short,
            _ => FrameClass::Long,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub sequence: u8,
    pub command: Command,
}

impl Message {
    pub fn new(sequence: u8, command: Command) -> Self { Self { sequence, command } }

    pub fn class(&self) -> FrameClass { self.command.class() }

    /// Serializes into `frame`, zero padding up to the frame class length.
    /// Returns the number of bytes to put on the bus.
    pub fn encode(&self, frame: &mut [u8]) -> Result<usize, Error> {
        let length = self.class().length();
        let frame = frame.get_mut(..length).ok_or(Error::FrameTooShort)?;
        let mut writer = FrameWriter { frame, position: 0 };
        writer.u8(self.command.command_byte())?;
        writer.u8(self.sequence)?;
        self.encode_payload(&mut writer)?;
        writer.pad();
        Ok(length)
    }

    fn encode_payload(&self, writer: &mut FrameWriter<'_>) -> Result<(), Error> {
        match &self.command {
            Command::Announce(announce) => {
                writer.bytes(&announce.uid.0)?;
                writer.u32(announce.program_flash_size)?;
                writer.u16(announce.user_flash_size)?;
                writer.u8(announce.can_id)?;
                writer.bytes(&announce.name.0)
            }
            Command::Identify(uid)
            | Command::Deselect(uid)
            | Command::EraseConfiguration(uid)
            | Command::EraseProgram(uid)
            | Command::EraseUserConfiguration(uid)
            | Command::DescribeV2(uid)
            | Command::DescribeV3(uid)
            | Command::Reset(uid) => writer.bytes(&uid.0),
            Command::Select { uid, master } => {
                writer.bytes(&uid.0)?;
                writer.u8(*master)
            }
            Command::WriteProgramCrc { uid, crc } => {
                writer.bytes(&uid.0)?;
                writer.u32(*crc)
            }
            Command::WriteModuleName { uid, name } => {
                writer.bytes(&uid.0)?;
                writer.bytes(&name.0)
            }
            Command::WriteModuleCanId { uid, can_id } => {
                writer.bytes(&uid.0)?;
                writer.u8(*can_id)
            }
            Command::IHexWrite { phase, text } => {
                writer.u8(*phase)?;
                writer.bytes(text)
            }
            Command::IHexRead { uid, address } => {
                writer.bytes(&uid.0)?;
                writer.u32(*address)
            }
            Command::BootloadByName(name) => writer.bytes(&name.0),
            Command::Ack(acknowledge) => {
                writer.u8(acknowledge.status as u8)?;
                writer.u8(acknowledge.request)?;
                match &acknowledge.payload {
                    AcknowledgePayload::Uid(uid) => writer.bytes(&uid.0),
                    AcknowledgePayload::Text(text) => writer.bytes(text),
                    AcknowledgePayload::Describe(describe) => {
                        writer.u32(describe.program_flash_size)?;
                        writer.u16(describe.user_flash_size)?;
                        writer.u8(describe.can_id)?;
                        writer.bytes(&describe.module_type.0)?;
                        writer.bytes(&describe.name.0)?;
                        match describe.crcs {
                            Some(crcs) => {
                                writer.u32(crcs.image_crc)?;
                                writer.u32(crcs.flash_crc)
                            }
                            None => Ok(()),
                        }
                    }
                }
            }
            Command::MasterAdvertise | Command::Bootload | Command::Unknown(_) => Ok(()),
        }
    }

    /// Parses a received frame. Trailing padding is ignored; a frame too
    /// short for its command's payload is rejected.
    pub fn decode(frame: &[u8]) -> Result<Self, Error> {
        let (payload, (command, sequence)) = header(frame).map_err(|_| Error::FrameTooShort)?;
        let (_, command) = match MessageType::from_u8(command) {
            Some(MessageType::Ack) => acknowledge(payload).map_err(|error| match error {
                nom::Err::Failure(_) => Error::MalformedFrame,
                _ => Error::FrameTooShort,
            })?,
            Some(message_type) => command_payload(message_type, payload).map_err(|_| Error::FrameTooShort)?,
            None => (payload, Command::Unknown(command)),
        };
        Ok(Self { sequence, command })
    }
}

struct FrameWriter<'a> {
    frame: &'a mut [u8],
    position: usize,
}

impl<'a> FrameWriter<'a> {
    fn bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.position + bytes.len();
        self.frame.get_mut(self.position..end).ok_or(Error::BufferOverflow)?.copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    fn u8(&mut self, value: u8) -> Result<(), Error> { self.bytes(&[value]) }

    fn u16(&mut self, value: u16) -> Result<(), Error> { self.bytes(&value.to_le_bytes()) }

    fn u32(&mut self, value: u32) -> Result<(), Error> { self.bytes(&value.to_le_bytes()) }

    fn pad(self) { self.frame[self.position..].iter_mut().for_each(|byte| *byte = 0); }
}

fn header(input: &[u8]) -> IResult<&[u8], (u8, u8)> { tuple((le_u8, le_u8))(input) }

fn array<const N: usize>(input: &[u8]) -> IResult<&[u8], [u8; N]> {
    map_res(take(N), |bytes: &[u8]| <[u8; N]>::try_from(bytes))(input)
}

fn uid(input: &[u8]) -> IResult<&[u8], ModuleUid> { map(array::<UID_LENGTH>, ModuleUid)(input) }

fn name(input: &[u8]) -> IResult<&[u8], ModuleName> { map(array::<MODULE_NAME_LENGTH>, ModuleName)(input) }

fn announce(input: &[u8]) -> IResult<&[u8], Announce> {
    let (input, (uid, program_flash_size, user_flash_size, can_id, name)) =
        tuple((uid, le_u32, le_u16, le_u8, name))(input)?;
    Ok((input, Announce { uid, program_flash_size, user_flash_size, can_id, name }))
}

fn command_payload(message_type: MessageType, input: &[u8]) -> IResult<&[u8], Command> {
    match message_type {
        MessageType::Request => map(announce, Command::Announce)(input),
        MessageType::IdentifySlave => map(uid, Command::Identify)(input),
        MessageType::MasterAdvertise => Ok((input, Command::MasterAdvertise)),
        MessageType::EraseConfiguration => map(uid, Command::EraseConfiguration)(input),
        MessageType::EraseProgram => map(uid, Command::EraseProgram)(input),
        MessageType::EraseUserConfiguration => map(uid, Command::EraseUserConfiguration)(input),
        MessageType::WriteProgramCrc => {
            map(tuple((uid, le_u32)), |(uid, crc)| Command::WriteProgramCrc { uid, crc })(input)
        }
        MessageType::SelectSlave => {
            map(tuple((uid, le_u8)), |(uid, master)| Command::Select { uid, master })(input)
        }
        MessageType::DeselectSlave => map(uid, Command::Deselect)(input),
        MessageType::DescribeV2 => map(uid, Command::DescribeV2)(input),
        MessageType::DescribeV3 => map(uid, Command::DescribeV3)(input),
        MessageType::WriteModuleName => {
            map(tuple((uid, name)), |(uid, name)| Command::WriteModuleName { uid, name })(input)
        }
        MessageType::WriteModuleCanId => {
            map(tuple((uid, le_u8)), |(uid, can_id)| Command::WriteModuleCanId { uid, can_id })(input)
        }
        MessageType::IHexWrite => map(tuple((le_u8, array::<TEXT_LENGTH>)), |(phase, text)| {
            Command::IHexWrite { phase, text }
        })(input),
        MessageType::IHexRead => {
            map(tuple((uid, le_u32)), |(uid, address)| Command::IHexRead { uid, address })(input)
        }
        MessageType::Reset => map(uid, Command::Reset)(input),
        MessageType::Bootload => Ok((input, Command::Bootload)),
        MessageType::BootloadByName => map(name, Command::BootloadByName)(input),
        MessageType::Ack => acknowledge(input),
    }
}

fn crcs(input: &[u8]) -> IResult<&[u8], DescribeCrcs> {
    map(tuple((le_u32, le_u32)), |(image_crc, flash_crc)| DescribeCrcs { image_crc, flash_crc })(input)
}

fn describe(input: &[u8], with_crcs: bool) -> IResult<&[u8], Describe> {
    let (input, (program_flash_size, user_flash_size, can_id, module_type, name)) =
        tuple((le_u32, le_u16, le_u8, array::<MODULE_TYPE_LENGTH>, name))(input)?;
    let (input, crcs) = if with_crcs { map(crcs, Some)(input)? } else { (input, None) };
    let module_type = ModuleType(module_type);
    Ok((input, Describe { program_flash_size, user_flash_size, can_id, module_type, name, crcs }))
}

fn acknowledge(input: &[u8]) -> IResult<&[u8], Command> {
    let (rest, (raw_status, request)) = tuple((le_u8, le_u8))(input)?;
    let status = AcknowledgeStatus::from_u8(raw_status).ok_or_else(|| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::MapRes))
    })?;
    let (rest, payload) = match MessageType::from_u8(request) {
        Some(MessageType::IHexRead) => map(array::<TEXT_LENGTH>, AcknowledgePayload::Text)(rest)?,
        Some(MessageType::DescribeV2) => {
            map(|input| describe(input, false), AcknowledgePayload::Describe)(rest)?
        }
        Some(MessageType::DescribeV3) => {
            map(|input| describe(input, true), AcknowledgePayload::Describe)(rest)?
        }
        _ => map(uid, AcknowledgePayload::Uid)(rest)?,
    };
    Ok((rest, Command::Ack(Acknowledge { status, request, payload })))
}
