//! Bootloader error types and methods

use crate::log;

/// Top level error type for the bootloader. Protocol rejections are not
/// errors (they travel back to the master as acknowledge statuses); this
/// type covers everything that fails locally.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Error caused by the bus driver
    BusError(&'static str),
    /// Error caused by the program or configuration storage
    StorageError(&'static str),
    /// Error caused by a high level device
    DeviceError(&'static str),
    /// Frame shorter than its class requires
    FrameTooShort,
    /// Frame with a field that can't be represented
    MalformedFrame,
    /// Record whose bytes don't sum to zero
    HexChecksum,
    /// Character outside the record alphabet, or a bad record length
    HexSyntax,
    /// Record type this decoder doesn't understand
    HexRecordType,
    /// Data record starting on an odd address
    HexMisaligned,
    /// Data record with an odd number of bytes
    HexOddLength,
    /// Stream ended in the middle of a record
    HexIncomplete,
    /// Output didn't fit in its fixed capacity buffer
    BufferOverflow,
    /// Address outside both program flash and user data
    AddressOutOfRange,
    /// Stored image CRC doesn't match program flash
    ImageCrcMismatch,
    /// Storage drivers don't cover the configured memory map
    MemoryMapMismatch,
}

pub trait Convertible {
    fn into(self) -> Error;
}

impl<T: Convertible> From<T> for Error {
    fn from(t: T) -> Self { Convertible::into(t) }
}

impl Error {
    /// Reports the error through the logger.
    pub fn report(&self) {
        match self {
            Error::BusError(text) => log::error!("[Bus Error] -> {}", text),
            Error::StorageError(text) => log::error!("[Storage Error] -> {}", text),
            Error::DeviceError(text) => log::error!("[Device Error] -> {}", text),
            Error::FrameTooShort => log::error!("[Codec Error] -> Frame too short for its class"),
            Error::MalformedFrame => log::error!("[Codec Error] -> Malformed frame"),
            Error::HexChecksum => log::error!("[Hex Error] -> Record checksum mismatch"),
            Error::HexSyntax => log::error!("[Hex Error] -> Malformed record"),
            Error::HexRecordType => log::error!("[Hex Error] -> Unsupported record type"),
            Error::HexMisaligned => log::error!("[Hex Error] -> Misaligned record address"),
            Error::HexOddLength => log::error!("[Hex Error] -> Record length not 16 bit aligned"),
            Error::HexIncomplete => log::error!("[Hex Error] -> Stream ended mid record"),
            Error::BufferOverflow => log::error!("[Logic Error] -> Buffer overflow"),
            Error::AddressOutOfRange => log::error!("[Logic Error] -> Address out of range"),
            Error::ImageCrcMismatch => log::error!("[Logic Error] -> Image CRC is invalid"),
            Error::MemoryMapMismatch => log::error!("[Logic Error] -> Storage doesn't match the memory map"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct DriverFault;

    impl Convertible for DriverFault {
        fn into(self) -> Error { Error::BusError("driver fault") }
    }

    fn fallible() -> Result<(), Error> {
        Err::<(), _>(DriverFault)?;
        Ok(())
    }

    #[test]
    fn collaborator_errors_convert_through_question_mark() {
        assert_eq!(fallible(), Err(Error::BusError("driver fault")));
    }
}
