//! State that lives only for the duration of a hex transfer.
use heapless::String;
use nb::block;

use crate::{
    devices::{
        messages::TEXT_LENGTH,
        traits::{ConfigurationFlash, ProgramFlash},
    },
    error::Error,
    log,
    utilities::{
        buffer::trim_nul,
        ihex::{self, Decoder, Record, LINE_LENGTH},
    },
};

/// Capacity of the hex read buffer, in characters.
pub const READ_BUFFER_LENGTH: usize = 256;

/// One `BEGIN` .. `END` hex write transfer.
///
/// Storage failures latch `success` to false but decoding carries on, so
/// the master learns about the failure at `END`. Integrity failures in
/// the hex stream itself are returned from [`UpdateSession::feed`] and
/// end the session.
pub struct UpdateSession {
    decoder: Decoder,
    success: bool,
}

impl Default for UpdateSession {
    fn default() -> Self { Self::begin() }
}

impl UpdateSession {
    pub fn begin() -> Self {
        let mut decoder = Decoder::new();
        decoder.begin();
        Self { decoder, success: true }
    }

    pub fn success(&self) -> bool { self.success }

    /// Decodes a nul padded chunk of hex text, writing every complete
    /// data record to program flash or to the user data area.
    pub fn feed<P, C>(&mut self, text: &[u8], program: &mut P, configuration: &mut C) -> Result<(), Error>
    where
        P: ProgramFlash,
        C: ConfigurationFlash,
    {
        let Self { decoder, success } = self;
        decoder.feed(trim_nul(text), |record| match record {
            Record::Data { address, bytes } => write_record(address, bytes, success, program, configuration),
            Record::EndOfFile => Ok(()),
        })
    }

    /// Closes open write brackets and reports the aggregate result.
    pub fn end<P, C>(mut self, program: &mut P, configuration: &mut C) -> bool
    where
        P: ProgramFlash,
        C: ConfigurationFlash,
    {
        if let Err(error) = self.decoder.end() {
            error.report();
            self.success = false;
        }
        close(program, configuration) && self.success
    }

    /// Drops the session after an integrity failure.
    pub fn abort<P, C>(self, program: &mut P, configuration: &mut C)
    where
        P: ProgramFlash,
        C: ConfigurationFlash,
    {
        log::warn!("Update session aborted");
        close(program, configuration);
    }
}

fn write_record<P, C>(
    address: u32,
    bytes: &[u8],
    success: &mut bool,
    program: &mut P,
    configuration: &mut C,
) -> Result<(), Error>
where
    P: ProgramFlash,
    C: ConfigurationFlash,
{
    if address % 2 != 0 {
        return Err(Error::HexMisaligned);
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::HexOddLength);
    }
    for (address, word) in (address..).step_by(2).zip(bytes.chunks_exact(2)) {
        if !*success {
            break;
        }
        if let Err(error) = write_word(address, u16::from_le_bytes([word[0], word[1]]), program, configuration) {
            error.report();
            *success = false;
        }
    }
    Ok(())
}

fn write_word<P, C>(address: u32, value: u16, program: &mut P, configuration: &mut C) -> Result<(), Error>
where
    P: ProgramFlash,
    C: ConfigurationFlash,
{
    if program.is_address_valid(address) {
        if !program.is_ready() {
            block!(program.begin_write())?;
        }
        block!(program.write16(address, value))?;
    } else if configuration.is_user_address_valid(address) {
        if !configuration.is_ready() {
            block!(configuration.begin_write())?;
        }
        block!(configuration.write_user_data16(address, value))?;
    } else {
        return Err(Error::AddressOutOfRange);
    }
    Ok(())
}

fn close<P, C>(program: &mut P, configuration: &mut C) -> bool
where
    P: ProgramFlash,
    C: ConfigurationFlash,
{
    let mut closed = true;
    if program.is_ready() {
        closed &= block!(program.end_write()).is_ok();
    }
    if configuration.is_ready() {
        closed &= block!(configuration.end_write()).is_ok();
    }
    closed
}

/// Hex text of the last read request, drained one acknowledgement at a
/// time.
pub struct ReadBuffer {
    text: String<READ_BUFFER_LENGTH>,
    offset: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self { Self::new() }
}

impl ReadBuffer {
    pub const fn new() -> Self { Self { text: String::new(), offset: 0 } }

    /// Renders up to 16 bytes at `address` as hex records, replacing
    /// whatever was left of the previous read. The read stops at the end
    /// of the region `address` falls in.
    pub fn load<P, C>(&mut self, address: u32, program: &mut P, configuration: &mut C) -> Result<(), Error>
    where
        P: ProgramFlash,
        C: ConfigurationFlash,
    {
        self.offset = 0;
        self.text.clear();
        let mut bytes = [0u8; LINE_LENGTH];
        let clamp = |end: u32| (end - address).min(LINE_LENGTH as u32) as usize;
        let length = if program.is_address_valid(address) {
            let length = clamp(program.range().1);
            block!(program.read(address, &mut bytes[..length]))?;
            length
        } else if configuration.is_user_address_valid(address) {
            let length = clamp(configuration.user_data_size());
            block!(configuration.read_user_data(address, &mut bytes[..length]))?;
            length
        } else {
            return Err(Error::AddressOutOfRange);
        };
        ihex::encode(address, &bytes[..length], &mut self.text)
    }

    /// Next chunk of text, zero padded, and whether more remains. The
    /// buffer is emptied once the last chunk is handed out.
    pub fn next_chunk(&mut self) -> ([u8; TEXT_LENGTH], bool) {
        let mut chunk = [0u8; TEXT_LENGTH];
        let remaining = &self.text.as_bytes()[self.offset..];
        let length = remaining.len().min(TEXT_LENGTH);
        chunk[..length].copy_from_slice(&remaining[..length]);
        self.offset += length;
        let more = self.offset < self.text.len();
        if !more {
            self.text.clear();
            self.offset = 0;
        }
        (chunk, more)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::flash::{FakeConfigurationStorage, FakeProgramStorage};

    const BASE: u32 = 0x0800_6000;

    fn storages() -> (FakeProgramStorage, FakeConfigurationStorage) {
        (FakeProgramStorage::new(BASE, 0x100), FakeConfigurationStorage::new(64))
    }

    #[test]
    fn records_land_in_program_flash_and_user_data() {
        let (mut program, mut configuration) = storages();
        let mut session = UpdateSession::begin();
        session
            .feed(b":020000040800F2\n:046000000102030492\n\0\0\0\0", &mut program, &mut configuration)
            .unwrap();
        session.feed(b":020000040000FA\n:02001000CDEF32\n", &mut program, &mut configuration).unwrap();
        assert!(program.writing && configuration.writing);
        assert!(session.end(&mut program, &mut configuration));

        assert_eq!(program.writes, vec![(BASE, 0x0201), (BASE + 2, 0x0403)]);
        assert_eq!(&configuration.user[0x10..0x12], &[0xCD, 0xEF]);
        assert!(!program.writing && !configuration.writing);
    }

    #[test]
    fn out_of_range_records_latch_failure_but_keep_decoding() {
        let (mut program, mut configuration) = storages();
        let mut session = UpdateSession::begin();
        session.feed(b":02100000AABB89\n", &mut program, &mut configuration).unwrap();
        assert!(!session.success());
        session.feed(b":020000040800F2\n:046000000102030492\n", &mut program, &mut configuration).unwrap();
        assert!(program.writes.is_empty());
        assert!(!session.end(&mut program, &mut configuration));
    }

    #[test]
    fn storage_failures_latch() {
        let (mut program, mut configuration) = storages();
        program.broken = true;
        let mut session = UpdateSession::begin();
        session.feed(b":020000040800F2\n:046000000102030492\n", &mut program, &mut configuration).unwrap();
        assert!(!session.success());
    }

    #[test]
    fn misaligned_and_odd_records_are_integrity_errors() {
        let (mut program, mut configuration) = storages();
        let mut session = UpdateSession::begin();
        assert_eq!(
            session.feed(b":03000100010203F6\n", &mut program, &mut configuration),
            Err(Error::HexMisaligned)
        );
        let mut session = UpdateSession::begin();
        assert_eq!(
            session.feed(b":03000000010203F7\n", &mut program, &mut configuration),
            Err(Error::HexOddLength)
        );
    }

    #[test]
    fn reads_are_drained_in_text_sized_chunks() {
        let (mut program, mut configuration) = storages();
        program.load(BASE, &(0u8..16).collect::<Vec<u8>>());
        let mut buffer = ReadBuffer::new();
        buffer.load(BASE, &mut program, &mut configuration).unwrap();

        let (first, more) = buffer.next_chunk();
        assert!(more);
        let (second, more) = buffer.next_chunk();
        assert!(!more);

        let mut text = first.to_vec();
        text.extend_from_slice(trim_nul(&second));
        assert_eq!(
            text,
            b":020000040800F2\n:10600000000102030405060708090A0B0C0D0E0F18\n:00000001FF\n".to_vec()
        );
        assert_eq!(buffer.next_chunk(), ([0u8; TEXT_LENGTH], false));
    }

    #[test]
    fn reads_stop_at_the_end_of_their_region() {
        let (mut program, mut configuration) = storages();
        let mut buffer = ReadBuffer::new();
        buffer.load(BASE + 0xFC, &mut program, &mut configuration).unwrap();
        assert_eq!(buffer.text.as_str(), ":020000040800F2\n:0460FC00FFFFFFFFA4\n:00000001FF\n");

        buffer.load(60, &mut program, &mut configuration).unwrap();
        assert_eq!(buffer.text.as_str(), ":04003C00FFFFFFFFC4\n:00000001FF\n");
    }

    #[test]
    fn reads_outside_both_regions_fail() {
        let (mut program, mut configuration) = storages();
        let mut buffer = ReadBuffer::new();
        assert_eq!(buffer.load(0x2000_0000, &mut program, &mut configuration), Err(Error::AddressOutOfRange));
        assert!(buffer.load(0x20, &mut program, &mut configuration).is_ok());
    }
}
