use super::error::FakeError;
use crate::hal::{
    bus::{Bus, FrameId},
    time::Milliseconds,
};

/// Records every transmitted frame.
#[derive(Default)]
pub struct FakeBus {
    pub sent: Vec<(FrameId, Vec<u8>, Milliseconds)>,
    pub stopped: bool,
    /// Number of upcoming transmissions that report a busy controller.
    pub busy_for: usize,
    pub broken: bool,
}

impl Bus for FakeBus {
    type Error = FakeError;

    fn transmit(&mut self, id: FrameId, data: &[u8], timeout: Milliseconds) -> nb::Result<(), Self::Error> {
        if self.broken {
            return Err(nb::Error::Other(FakeError));
        }
        if self.busy_for > 0 {
            self.busy_for -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.sent.push((id, data.to_vec(), timeout));
        Ok(())
    }

    fn stop(&mut self) { self.stopped = true; }
}
