//! Hardware Abstraction Layer, containing the narrow interfaces
//! through which the bootloader reaches its collaborators: the CAN
//! bus driver, program and configuration storage, the CRC engine,
//! reset and watchdog control, thread suspension and the status LED.

pub mod bus;
pub mod crc;
pub mod led;
pub mod storage;
pub mod system;
pub mod time;

#[cfg(not(target_arch = "arm"))]
#[doc(hidden)]
pub mod doubles;
