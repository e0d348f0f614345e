use crate::hal::led::{Indicator, Pattern};

pub struct FakeIndicator {
    pub patterns: Vec<Pattern>,
    pub active: bool,
    pub forced: Vec<bool>,
}

impl Default for FakeIndicator {
    fn default() -> Self { Self { patterns: Vec::new(), active: true, forced: Vec::new() } }
}

impl FakeIndicator {
    pub fn pattern(&self) -> Option<Pattern> { self.patterns.last().copied() }
}

impl Indicator for FakeIndicator {
    fn set_pattern(&mut self, pattern: Pattern) { self.patterns.push(pattern); }

    fn set_active(&mut self, active: bool) { self.active = active; }

    fn force(&mut self, on: bool) { self.forced.push(on); }
}
