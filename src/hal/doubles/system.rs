use std::collections::VecDeque;

use crate::hal::{
    system::{Period, ResetContext, ResetSource, Suspend, Wake, Watchdog},
    time::Milliseconds,
};

pub struct FakeResetContext {
    pub source: ResetSource,
    pub register: u32,
}

impl FakeResetContext {
    pub fn new(source: ResetSource, register: u32) -> Self { Self { source, register } }
}

impl ResetContext for FakeResetContext {
    fn reset_source(&self) -> ResetSource { self.source }

    fn read_reason(&self) -> u32 { self.register }

    fn write_reason(&mut self, value: u32) { self.register = value; }
}

#[derive(Default)]
pub struct FakeWatchdog {
    pub periods: Vec<Period>,
    pub reloads: usize,
}

impl FakeWatchdog {
    pub fn period(&self) -> Option<Period> { self.periods.last().copied() }
}

impl Watchdog for FakeWatchdog {
    fn enable(&mut self, period: Period) { self.periods.push(period); }

    fn reload(&mut self) { self.reloads += 1; }
}

/// Replays a fixed list of wake ups, then times out forever.
#[derive(Default)]
pub struct ScriptedScheduler {
    pub script: VecDeque<Wake>,
    pub timeouts: Vec<Milliseconds>,
}

impl ScriptedScheduler {
    pub fn new(script: &[Wake]) -> Self { Self { script: script.iter().copied().collect(), timeouts: Vec::new() } }
}

impl Suspend for ScriptedScheduler {
    fn suspend(&mut self, timeout: Milliseconds) -> Wake {
        self.timeouts.push(timeout);
        self.script.pop_front().unwrap_or(Wake::Timeout)
    }
}
