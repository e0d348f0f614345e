//! Handoff for Cortex-M cores.
use core::mem::size_of;

use cortex_m::peripheral::SCB;

use super::Handoff;

/// Owns the system control block, so only one handoff can exist.
pub struct CortexM {
    _scb: SCB,
}

impl CortexM {
    pub fn new(scb: SCB) -> Self { Self { _scb: scb } }
}

impl Handoff for CortexM {
    fn start_application(&mut self, address: u32) -> ! {
        // NOTE(Safety): We are jumping to an entirely different firmware
        // image. Its CRC matched, so the vector table is assumed to be in
        // place. After the interrupts are disabled there is no turning back.
        unsafe {
            let initial_stack_pointer = *(address as *const u32);
            let reset_handler_pointer = *((address as usize + size_of::<u32>()) as *const u32) as *const ();
            let reset_handler = core::mem::transmute::<*const (), fn() -> !>(reset_handler_pointer);
            cortex_m::interrupt::disable();
            (*SCB::PTR).vtor.write(address);
            #[allow(deprecated)]
            cortex_m::register::msp::write(initial_stack_pointer);
            reset_handler()
        }
    }

    fn system_reset(&mut self) -> ! { SCB::sys_reset() }
}
