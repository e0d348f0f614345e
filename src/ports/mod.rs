//! Target specific glue. The generic bootloader decides *how* control
//! should leave it; ports know how to actually hand it over on a given
//! core.
use crate::{
    devices::{
        bootloader::{Bootloader, Exit},
        traits::{ConfigurationFlash, ProgramFlash},
        transport::Transport,
    },
    hal::{
        crc::Crc,
        led::Indicator,
        system::{ResetContext, Suspend, Watchdog},
    },
};

#[cfg(target_arch = "arm")]
pub mod cortex_m;

/// Ways a core can leave the bootloader for good.
pub trait Handoff {
    /// Starts the image whose vector table sits at `address`.
    fn start_application(&mut self, address: u32) -> !;
    fn system_reset(&mut self) -> !;
}

/// Runs the bootloader to completion and carries out its exit.
pub fn run<T, P, C, I, K, R, W, S, H>(bootloader: &mut Bootloader<T, P, C, I, K, R, W, S>, handoff: &mut H) -> !
where
    T: Transport,
    P: ProgramFlash,
    C: ConfigurationFlash,
    I: Indicator,
    K: Crc,
    R: ResetContext,
    W: Watchdog,
    S: Suspend,
    H: Handoff,
{
    match bootloader.run() {
        Exit::StartApplication(address) => handoff.start_application(address),
        Exit::Reset => handoff.system_reset(),
        Exit::AwaitWatchdog => bootloader.await_watchdog(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::{
            bootloader::test::{fixture, valid_crc, with_master, U},
            messages::{Command, Message},
        },
        hal::system::{Reason, ResetSource, Wake},
    };

    struct PanickingHandoff;

    impl Handoff for PanickingHandoff {
        fn start_application(&mut self, address: u32) -> ! { panic!("jump to {:#x}", address) }
        fn system_reset(&mut self) -> ! { panic!("system reset") }
    }

    #[test]
    #[should_panic(expected = "jump to 0x8006000")]
    fn valid_image_is_handed_to_the_core() {
        let mut bootloader =
            fixture(ResetSource::Watchdog, Reason::BootApplication as u32, with_master(), valid_crc(), &[]);
        run(&mut bootloader, &mut PanickingHandoff);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn reset_request_resets_the_core() {
        let mut transport = with_master();
        transport.push(Message::new(5, Command::Select { uid: U, master: 1 }));
        transport.push(Message::new(7, Command::Reset(U)));
        let mut bootloader = fixture(
            ResetSource::Watchdog,
            Reason::UserRequest as u32,
            transport,
            valid_crc(),
            &[Wake::Timeout, Wake::Resumed, Wake::Resumed],
        );
        run(&mut bootloader, &mut PanickingHandoff);
    }
}
