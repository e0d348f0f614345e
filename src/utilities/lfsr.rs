//! Galois linear feedback shift register.
//!
//! Cheap pseudo-random numbers for bus address self-assignment and
//! transmit timeout jitter. Modules seed it from their UID, so two
//! modules that power up together still diverge.

/// Feedback polynomial.
pub const POLYNOMIAL: u16 = 0x82EE;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Lfsr {
    state: u16,
}

impl Lfsr {
    /// A zero seed would lock the register, so it's replaced by the polynomial.
    pub const fn new(seed: u16) -> Self {
        Self { state: if seed == 0 { POLYNOMIAL } else { seed } }
    }

    /// Seeds from a 12 byte UID, then advances a UID dependent number of
    /// steps.
    pub fn from_uid(uid: &[u8; 12]) -> Self {
        let mut lfsr = Self::new(u16::from_be_bytes([uid[0], uid[2]]));
        let warm_up = (uid[0] ^ uid[5]) as usize + (uid[2] ^ uid[7]) as usize;
        (0..warm_up).for_each(|_| {
            lfsr.next_value();
        });
        lfsr
    }

    pub fn next_value(&mut self) -> u16 {
        let feedback = self.state & 1 == 0;
        self.state >>= 1;
        if feedback {
            self.state ^= POLYNOMIAL;
        }
        if self.state == 0 {
            self.state = POLYNOMIAL;
        }
        self.state
    }

    pub fn next_byte(&mut self) -> u8 { self.next_value() as u8 }
}

impl Iterator for Lfsr {
    type Item = u16;

    fn next(&mut self) -> Option<u16> { Some(self.next_value()) }
}
