//! Time units.

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Milliseconds(pub u32);

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Milliseconds`
    fn ms(self) -> Milliseconds;
}

impl U32Ext for u32 {
    fn ms(self) -> Milliseconds { Milliseconds(self) }
}
