//! Reset, watchdog and scheduling interfaces.
//!
//! A persistent reason register survives watchdog resets and tells the
//! boot decision driver why the previous run ended.
use crate::hal::time::Milliseconds;

/// What caused the last reset. Sampled once at startup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetSource {
    Hardware,
    Software,
    Watchdog,
}

/// Values written to the persistent reason register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Reason {
    /// A boot attempt failed its CRC check.
    NoApplication = 0xCAFE_BABE,
    /// The master asked for the bootloader.
    UserRequest = 0xB0BA_FE77,
    /// The next watchdog reset should boot the application.
    BootApplication = 0xBAAD_F00D,
    /// The bootloader itself stopped making progress.
    TransportFail = 0xACAB_ACAB,
}

impl Reason {
    pub fn from_raw(value: u32) -> Option<Self> {
        [Reason::NoApplication, Reason::UserRequest, Reason::BootApplication, Reason::TransportFail]
            .into_iter()
            .find(|reason| *reason as u32 == value)
    }
}

pub trait ResetContext {
    fn reset_source(&self) -> ResetSource;
    fn read_reason(&self) -> u32;
    fn write_reason(&mut self, value: u32);

    /// Decoded reason, `None` for power-on garbage.
    fn reason(&self) -> Option<Reason> { Reason::from_raw(self.read_reason()) }
    fn set_reason(&mut self, reason: Reason) { self.write_reason(reason as u32) }
}

/// Watchdog windows the bootloader arms.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Period {
    Ms800,
    Ms1600,
    Ms6400,
}

impl Period {
    pub fn duration(&self) -> Milliseconds {
        match self {
            Period::Ms800 => Milliseconds(800),
            Period::Ms1600 => Milliseconds(1600),
            Period::Ms6400 => Milliseconds(6400),
        }
    }
}

pub trait Watchdog {
    /// Arms (or re-arms) the watchdog with a new window. Once enabled it
    /// can't be stopped.
    fn enable(&mut self, period: Period);
    fn reload(&mut self);
}

/// Why a suspended thread woke up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wake {
    /// The receive interrupt completed a frame.
    Resumed,
    Timeout,
}

/// Bounded suspension of the protocol thread.
pub trait Suspend {
    fn suspend(&mut self, timeout: Milliseconds) -> Wake;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reasons_decode_from_raw_register_values() {
        assert_eq!(Reason::from_raw(0xBAAD_F00D), Some(Reason::BootApplication));
        assert_eq!(Reason::from_raw(0xACAB_ACAB), Some(Reason::TransportFail));
        assert_eq!(Reason::from_raw(0), None);
        assert_eq!(Reason::UserRequest as u32, 0xB0BA_FE77);
    }

    #[test]
    fn periods_are_ordered() {
        assert!(Period::Ms800.duration() < Period::Ms1600.duration());
        assert_eq!(Period::Ms6400.duration(), Milliseconds(6400));
    }
}
