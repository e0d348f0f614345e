//! # CAN Bootloader Library
//!
//! This crate contains all functionality for the slave side of the
//! CAN field update bootloader in library form: the wire codec, the
//! double buffered transport, the slave protocol state machine and
//! the boot decision driver.
#![cfg_attr(test, allow(unused_imports))]
#![cfg_attr(target_arch = "arm", no_std)]

extern crate static_assertions;

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(not(feature = "defmt"))]
pub(crate) mod log {
    macro_rules! info {
        ($fmt:literal $(, $x:expr )* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use info;
    macro_rules! debug {
        ($fmt:literal $(, $x:expr )* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use debug;
    macro_rules! warner {
        ($fmt:literal $(, $x:expr )* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use warner as warn;
    macro_rules! error {
        ($fmt:literal $(, $x:expr )* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use error;
}

pub mod utilities {
    pub mod buffer;
    pub mod guard;
    pub mod ihex;
    pub mod lfsr;
}

pub mod config;
pub mod devices;
pub mod error;
pub mod hal;
pub mod ports;
