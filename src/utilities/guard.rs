//! RAII guard that calls a given function when constructed,
//! and another when it drops out of scope.
//!
//! Useful for ensuring cleanup no matter the return path, like turning
//! the status LED back off after a flash write that failed half way.
//!
//! Example
//! ```
//! # use canboot_lib::hal::led::*;
//! # use canboot_lib::hal::doubles::led::*;
//! # use canboot_lib::utilities::guard::*;
//! let mut indicator = FakeIndicator::default();
//! {
//!     // The LED is forced on as soon as the guard is constructed
//!     let _guard = Guard::new(&mut indicator, |i| i.force(true), |i| i.force(false));
//! }
//! // Guard has dropped out of scope here, so the LED is released
//! assert_eq!(indicator.forced, vec![true, false]);
//! ```
use core::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

pub struct Guard<'a, T, F, G>
where
    F: FnOnce(&mut T),
    G: FnOnce(&mut T),
{
    item: &'a mut T,
    on_exit: Option<G>,
    _marker: PhantomData<F>,
}

impl<'a, T, F, G> Guard<'a, T, F, G>
where
    F: FnOnce(&mut T),
    G: FnOnce(&mut T),
{
    pub fn new(item: &'a mut T, on_entry: F, on_exit: G) -> Self {
        on_entry(item);
        Self { item, on_exit: Some(on_exit), _marker: PhantomData }
    }
}

impl<'a, T, F, G> Deref for Guard<'a, T, F, G>
where
    F: FnOnce(&mut T),
    G: FnOnce(&mut T),
{
    type Target = T;
    fn deref(&self) -> &T { &*self.item }
}

impl<'a, T, F, G> DerefMut for Guard<'a, T, F, G>
where
    F: FnOnce(&mut T),
    G: FnOnce(&mut T),
{
    fn deref_mut(&mut self) -> &mut T { &mut *self.item }
}

impl<'a, T, F, G> Drop for Guard<'a, T, F, G>
where
    F: FnOnce(&mut T),
    G: FnOnce(&mut T),
{
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(self.item);
        }
    }
}
