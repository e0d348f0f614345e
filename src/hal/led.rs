//! Status LED interface.
//!
//! The bootloader only picks a blink pattern; a separate blinker task
//! plays it. Patterns loop forever.
use crate::hal::time::Milliseconds;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    On(Milliseconds),
    Off(Milliseconds),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pattern {
    /// No master seen yet.
    Waiting,
    /// Master seen, not in maintenance mode.
    Initialized,
    Booting,
    /// Maintenance mode, nobody selected.
    Loading,
    /// Maintenance mode, another module is selected.
    Muted,
    Identify,
    Selected,
}

use Step::{Off, On};

const WAITING: &[Step] = &[On(Milliseconds(75)), Off(Milliseconds(300))];
const INITIALIZED: &[Step] =
    &[On(Milliseconds(75)), Off(Milliseconds(100)), On(Milliseconds(75)), Off(Milliseconds(300))];
const BOOTING: &[Step] = &[
    On(Milliseconds(75)),
    Off(Milliseconds(100)),
    On(Milliseconds(75)),
    Off(Milliseconds(100)),
    On(Milliseconds(75)),
    Off(Milliseconds(300)),
];
const LOADING: &[Step] =
    &[On(Milliseconds(200)), Off(Milliseconds(100)), On(Milliseconds(200)), Off(Milliseconds(500))];
const MUTED: &[Step] = &[On(Milliseconds(200)), Off(Milliseconds(1000))];
const FAST: &[Step] = &[On(Milliseconds(100)), Off(Milliseconds(100))];

impl Pattern {
    pub fn steps(&self) -> &'static [Step] {
        match self {
            Pattern::Waiting => WAITING,
            Pattern::Initialized => INITIALIZED,
            Pattern::Booting => BOOTING,
            Pattern::Loading => LOADING,
            Pattern::Muted => MUTED,
            Pattern::Identify | Pattern::Selected => FAST,
        }
    }
}

pub trait Indicator {
    fn set_pattern(&mut self, pattern: Pattern);
    /// An inactive indicator keeps its pattern but stops driving the LED.
    fn set_active(&mut self, active: bool);
    /// Drives the LED directly, regardless of pattern.
    fn force(&mut self, on: bool);
}
