//! Intel HEX record codec.
//!
//! The decoder is fed arbitrary slices of a record stream (records may
//! straddle two frames) and reports data records with their absolute
//! address. The encoder renders a block of memory as a complete record
//! stream, end-of-file record included.
use core::fmt::Write;

use heapless::{String, Vec};
use nom::{bytes::complete::take, number::complete::{be_u16, be_u8}, IResult};

use crate::{error::Error, utilities::buffer::TryCollectSlice};

/// Largest data record the decoder accepts.
pub const MAX_DATA_LENGTH: usize = 64;
/// Data bytes per record emitted by the encoder.
pub const LINE_LENGTH: usize = 16;

const START_CODE: u8 = b':';
// Length, address (2), type and checksum.
const OVERHEAD: usize = 5;
const MAX_RECORD_LENGTH: usize = MAX_DATA_LENGTH + OVERHEAD;
const MAX_DIGITS: usize = 2 * MAX_RECORD_LENGTH;

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const START_SEGMENT_ADDRESS: u8 = 0x03;
const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const START_LINEAR_ADDRESS: u8 = 0x05;

#[derive(Debug, PartialEq, Eq)]
pub enum Record<'a> {
    Data { address: u32, bytes: &'a [u8] },
    EndOfFile,
}

struct RawRecord<'a> {
    offset: u16,
    kind: u8,
    data: &'a [u8],
}

fn parse_record(input: &[u8]) -> IResult<&[u8], RawRecord<'_>> {
    let (input, length) = be_u8(input)?;
    let (input, offset) = be_u16(input)?;
    let (input, kind) = be_u8(input)?;
    let (input, data) = take(length)(input)?;
    let (input, _checksum) = be_u8(input)?;
    Ok((input, RawRecord { offset, kind, data }))
}

fn hex_digit(digit: u8) -> Result<u8, Error> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        _ => Err(Error::HexSyntax),
    }
}

/// Streaming record decoder.
pub struct Decoder {
    digits: Vec<u8, MAX_DIGITS>,
    in_record: bool,
    // Upper address bits from the last extended address record.
    base: u32,
}

impl Default for Decoder {
    fn default() -> Self { Self::new() }
}

impl Decoder {
    pub const fn new() -> Self { Self { digits: Vec::new(), in_record: false, base: 0 } }

    /// Discards any partial record and address state.
    pub fn begin(&mut self) {
        self.digits.clear();
        self.in_record = false;
        self.base = 0;
    }

    /// Consumes a slice of the record stream, handing every completed
    /// data or end-of-file record to `sink`. Line breaks and nul padding
    /// between records are ignored.
    pub fn feed<F>(&mut self, text: &[u8], mut sink: F) -> Result<(), Error>
    where
        F: FnMut(Record<'_>) -> Result<(), Error>,
    {
        for &character in text {
            match character {
                START_CODE => {
                    if self.in_record {
                        return Err(Error::HexIncomplete);
                    }
                    self.in_record = true;
                    self.digits.clear();
                }
                b'\r' | b'\n' | b' ' | 0 if !self.in_record => {}
                _ if !self.in_record => return Err(Error::HexSyntax),
                _ => {
                    hex_digit(character)?;
                    self.digits.push(character).map_err(|_| Error::BufferOverflow)?;
                    if self.record_complete()? {
                        self.in_record = false;
                        self.process(&mut sink)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fails if the stream stopped in the middle of a record.
    pub fn end(&mut self) -> Result<(), Error> {
        let incomplete = self.in_record;
        self.begin();
        if incomplete {
            Err(Error::HexIncomplete)
        } else {
            Ok(())
        }
    }

    fn record_complete(&self) -> Result<bool, Error> {
        if self.digits.len() < 2 {
            return Ok(false);
        }
        let length = (hex_digit(self.digits[0])? << 4 | hex_digit(self.digits[1])?) as usize;
        if length > MAX_DATA_LENGTH {
            return Err(Error::BufferOverflow);
        }
        Ok(self.digits.len() == 2 * (length + OVERHEAD))
    }

    fn process<F>(&mut self, sink: &mut F) -> Result<(), Error>
    where
        F: FnMut(Record<'_>) -> Result<(), Error>,
    {
        let mut bytes = [0u8; MAX_RECORD_LENGTH];
        let count = self
            .digits
            .chunks(2)
            .map(|pair| Ok::<u8, Error>(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?))
            .try_collect_slice(&mut bytes)?;
        let bytes = &bytes[..count];

        if bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte)) != 0 {
            return Err(Error::HexChecksum);
        }
        let (_, record) = parse_record(bytes).map_err(|_| Error::HexSyntax)?;

        match record.kind {
            DATA => sink(Record::Data {
                address: self.base.wrapping_add(record.offset as u32),
                bytes: record.data,
            }),
            END_OF_FILE => sink(Record::EndOfFile),
            EXTENDED_SEGMENT_ADDRESS => {
                self.base = (address_word(record.data)? as u32) << 4;
                Ok(())
            }
            EXTENDED_LINEAR_ADDRESS => {
                self.base = (address_word(record.data)? as u32) << 16;
                Ok(())
            }
            START_SEGMENT_ADDRESS | START_LINEAR_ADDRESS => Ok(()),
            _ => Err(Error::HexRecordType),
        }
    }
}

fn address_word(data: &[u8]) -> Result<u16, Error> {
    match data {
        [high, low] => Ok(u16::from_be_bytes([*high, *low])),
        _ => Err(Error::HexSyntax),
    }
}

fn write_record<const N: usize>(
    out: &mut String<N>,
    kind: u8,
    offset: u16,
    data: &[u8],
) -> Result<(), Error> {
    let [high, low] = offset.to_be_bytes();
    let sum = data
        .iter()
        .fold((data.len() as u8).wrapping_add(high).wrapping_add(low).wrapping_add(kind), |sum, byte| {
            sum.wrapping_add(*byte)
        });
    let checksum = 0u8.wrapping_sub(sum);

    write!(out, ":{:02X}{:04X}{:02X}", data.len(), offset, kind).map_err(|_| Error::BufferOverflow)?;
    for byte in data {
        write!(out, "{:02X}", byte).map_err(|_| Error::BufferOverflow)?;
    }
    write!(out, "{:02X}\n", checksum).map_err(|_| Error::BufferOverflow)
}

/// Renders `bytes`, located at `address`, as data records of
/// [`LINE_LENGTH`] bytes followed by an end-of-file record. An extended
/// linear address record precedes any data above the first 64K.
pub fn encode<const N: usize>(address: u32, bytes: &[u8], out: &mut String<N>) -> Result<(), Error> {
    out.clear();
    let mut upper = 0u16;
    let mut address = address;
    let mut remaining = bytes;

    while !remaining.is_empty() {
        let [segment_high, segment_low, offset_high, offset_low] = address.to_be_bytes();
        let segment = u16::from_be_bytes([segment_high, segment_low]);
        let offset = u16::from_be_bytes([offset_high, offset_low]);
        if segment != upper {
            write_record(out, EXTENDED_LINEAR_ADDRESS, 0, &segment.to_be_bytes())?;
            upper = segment;
        }
        let until_boundary = 0x1_0000 - offset as usize;
        let length = remaining.len().min(LINE_LENGTH).min(until_boundary);
        let (line, rest) = remaining.split_at(length);
        write_record(out, DATA, offset, line)?;
        address = address.wrapping_add(length as u32);
        remaining = rest;
    }

    write_record(out, END_OF_FILE, 0, &[])
}

#[cfg(test)]
mod test {
    use super::*;
    use std::vec::Vec as StdVec;

    fn decode_all(chunks: &[&[u8]]) -> Result<StdVec<(u32, StdVec<u8>)>, Error> {
        let mut decoder = Decoder::new();
        let mut records = StdVec::new();
        for chunk in chunks {
            decoder.feed(chunk, |record| {
                if let Record::Data { address, bytes } = record {
                    records.push((address, bytes.to_vec()));
                }
                Ok(())
            })?;
        }
        decoder.end()?;
        Ok(records)
    }

    #[test]
    fn decoding_a_single_data_record() {
        let records = decode_all(&[b":0400100001020304E2\n"]).unwrap();
        assert_eq!(records, vec![(0x0010, vec![1, 2, 3, 4])]);
    }

    #[test]
    fn records_may_straddle_frames() {
        let records = decode_all(&[b":04001000010", b"20304E2\n:00000001FF\n"]).unwrap();
        assert_eq!(records, vec![(0x0010, vec![1, 2, 3, 4])]);
    }

    #[test]
    fn extended_linear_address_applies_to_following_records() {
        let records = decode_all(&[b":020000040800F2\n", b":0400100001020304E2\n"]).unwrap();
        assert_eq!(records, vec![(0x0800_0010, vec![1, 2, 3, 4])]);
    }

    #[test]
    fn lowercase_digits_and_nul_padding_are_accepted() {
        let records = decode_all(&[b":0400100001020304e2\n\0\0\0\0"]).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        assert_eq!(decode_all(&[b":0400100001020304E3\n"]), Err(Error::HexChecksum));
    }

    #[test]
    fn garbage_between_records_is_rejected() {
        assert_eq!(decode_all(&[b"xx:00000001FF"]), Err(Error::HexSyntax));
        assert_eq!(decode_all(&[b":04001G"]), Err(Error::HexSyntax));
    }

    #[test]
    fn unsupported_record_types_are_rejected() {
        // Type 0x06 with an otherwise valid checksum.
        assert_eq!(decode_all(&[b":00000006FA"]), Err(Error::HexRecordType));
    }

    #[test]
    fn stream_ending_mid_record_is_incomplete() {
        assert_eq!(decode_all(&[b":04001000"]), Err(Error::HexIncomplete));
    }

    #[test]
    fn sink_errors_stop_decoding() {
        let mut decoder = Decoder::new();
        let result = decoder.feed(b":0400100001020304E2\n", |_| Err(Error::HexMisaligned));
        assert_eq!(result, Err(Error::HexMisaligned));
    }

    #[test]
    fn encoding_sixteen_bytes_in_the_first_segment() {
        let bytes: StdVec<u8> = (0u8..16).collect();
        let mut out = String::<256>::new();
        encode(0x0100, &bytes, &mut out).unwrap();
        assert_eq!(out.as_str(), ":10010000000102030405060708090A0B0C0D0E0F77\n:00000001FF\n");
    }

    #[test]
    fn encoding_above_the_first_segment_emits_an_address_record() {
        let mut out = String::<256>::new();
        encode(0x0800_0010, &[1, 2, 3, 4], &mut out).unwrap();
        assert_eq!(out.as_str(), ":020000040800F2\n:0400100001020304E2\n:00000001FF\n");
    }

    #[test]
    fn encoded_records_decode_back_to_the_same_memory() {
        let bytes: StdVec<u8> = (0u8..16).map(|i| i.wrapping_mul(37)).collect();
        let mut out = String::<256>::new();
        encode(0x0801_FFF8, &bytes, &mut out).unwrap();
        let records = decode_all(&[out.as_bytes()]).unwrap();
        assert_eq!(records, vec![
            (0x0801_FFF8, bytes[..8].to_vec()),
            (0x0802_0000, bytes[8..].to_vec()),
        ]);
    }

    #[test]
    fn encoding_into_a_small_buffer_overflows() {
        let mut out = String::<8>::new();
        assert_eq!(encode(0, &[0u8; 16], &mut out), Err(Error::BufferOverflow));
    }
}
