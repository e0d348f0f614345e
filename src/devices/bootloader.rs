//! Boot decision driver.
//!
//! This module decides, on every reset, whether to start the installed
//! application, wait for a master, or serve the bootloader protocol. It
//! owns every watchdog decision. Construction is handled by the `ports`
//! module as it depends on board specific information.
//!
//! The persistent reason register is what keeps the module out of
//! endless bad loops: before arming a watchdog window the driver always
//! records what the next watchdog reset should do.
use nb::block;

use crate::{
    config::{MemoryMap, Timing, DEFAULT_MODULE_NAME},
    devices::{
        identity::ModuleName,
        protocol::{Disposition, SlaveProtocol},
        traits::{ConfigurationFlash, ProgramFlash},
        transport::Transport,
    },
    error::Error,
    hal::{
        crc::Crc,
        led::{Indicator, Pattern},
        system::{Period, Reason, ResetContext, ResetSource, Suspend, Wake, Watchdog},
    },
    log,
};

/// How control leaves the bootloader.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exit {
    /// The image at this address passed its CRC check. The watchdog is
    /// armed and the bus is released.
    StartApplication(u32),
    /// The master asked for a reset.
    Reset,
    /// Nothing left to do but wait for the armed watchdog to fire.
    AwaitWatchdog,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Stage {
    Decide,
    WaitForMaster,
    /// Serving the full protocol. `tick` counts idle wake ups.
    Maintenance { tick: u8 },
    /// Master known, but only bootload requests are honoured.
    Standby { loop_forever: bool },
}

pub struct Bootloader<T, P, C, I, K, R, W, S>
where
    T: Transport,
    P: ProgramFlash,
    C: ConfigurationFlash,
    I: Indicator,
    K: Crc,
    R: ResetContext,
    W: Watchdog,
    S: Suspend,
{
    pub(crate) protocol: SlaveProtocol<T, P, C, I, K>,
    pub(crate) reset: R,
    pub(crate) watchdog: W,
    pub(crate) scheduler: S,
    timing: Timing,
    memory_map: MemoryMap,
    stage: Stage,
    try_boot: bool,
    bootload: bool,
}

impl<T, P, C, I, K, R, W, S> Bootloader<T, P, C, I, K, R, W, S>
where
    T: Transport,
    P: ProgramFlash,
    C: ConfigurationFlash,
    I: Indicator,
    K: Crc,
    R: ResetContext,
    W: Watchdog,
    S: Suspend,
{
    pub fn new(protocol: SlaveProtocol<T, P, C, I, K>, reset: R, watchdog: W, scheduler: S, timing: Timing) -> Self {
        Self {
            protocol,
            reset,
            watchdog,
            scheduler,
            timing,
            memory_map: MemoryMap::default(),
            stage: Stage::Decide,
            try_boot: true,
            bootload: false,
        }
    }

    /// Replaces the generated memory map the storage is checked against
    /// before booting.
    pub fn with_memory_map(self, memory_map: MemoryMap) -> Self { Self { memory_map, ..self } }

    /// Main bootloader routine. Returns only once control must leave the
    /// bootloader.
    pub fn run(&mut self) -> Exit {
        loop {
            if let Some(exit) = self.step() {
                log::info!("Leaving the bootloader: {}", exit);
                return exit;
            }
        }
    }

    /// Advances the decision sequence by at most one suspension.
    pub fn step(&mut self) -> Option<Exit> {
        match self.stage {
            Stage::Decide => self.decide(),
            Stage::WaitForMaster => self.wait_for_master(),
            Stage::Maintenance { tick } => self.maintain(tick),
            Stage::Standby { loop_forever } => self.stand_by(loop_forever),
        }
    }

    /// Sleeps without reloading the watchdog until it resets the module.
    pub fn await_watchdog(&mut self) -> ! {
        loop {
            self.scheduler.suspend(self.timing.halt_sleep);
        }
    }

    fn decide(&mut self) -> Option<Exit> {
        self.protocol.initialize();
        if self.protocol.stored_name().is_blank() {
            let name = ModuleName::new(DEFAULT_MODULE_NAME);
            if let Err(error) = block!(self.protocol.configuration.write_module_name(&name.0)) {
                Error::from(error).report();
            }
        }
        self.watchdog.reload();

        let source = self.reset.reset_source();
        let reason = self.reset.reason();
        log::info!("Reset by {}, reason {}", source, reason);
        match reason {
            Some(Reason::BootApplication) if source == ResetSource::Watchdog => return Some(self.boot()),
            Some(Reason::NoApplication) => {
                self.try_boot = false;
                self.bootload = false;
            }
            Some(Reason::UserRequest) => {
                self.try_boot = false;
                self.bootload = true;
            }
            _ => {}
        }

        self.reset.set_reason(Reason::TransportFail);
        self.watchdog.enable(Period::Ms6400);
        self.stage = Stage::WaitForMaster;
        None
    }

    fn wait_for_master(&mut self) -> Option<Exit> {
        self.protocol.transport.listen_for_master();
        self.watchdog.reload();
        let wake = self.scheduler.suspend(self.timing.master_wait);

        if !self.protocol.transport.is_initialized() {
            if wake == Wake::Timeout && self.try_boot {
                log::info!("No master found, booting");
                return Some(self.boot());
            }
            return None;
        }

        let can_id = self.protocol.configuration.module_configuration().can_id;
        self.protocol.transport.bind(can_id);

        if self.bootload {
            self.protocol.start();
            self.reset.set_reason(Reason::BootApplication);
            self.watchdog.enable(Period::Ms6400);
            self.stage = Stage::Maintenance { tick: 0 };
        } else {
            self.protocol.wait();
            let loop_forever = self.reset.reset_source() == ResetSource::Watchdog;
            if !loop_forever {
                self.reset.set_reason(Reason::BootApplication);
                self.watchdog.enable(Period::Ms1600);
            }
            self.stage = Stage::Standby { loop_forever };
        }
        None
    }

    fn maintain(&mut self, tick: u8) -> Option<Exit> {
        self.watchdog.reload();
        let wake = self.scheduler.suspend(self.timing.protocol_tick);
        // A frame may have completed while awake, so the lanes are drained
        // on either wake before announcing.
        match self.protocol.process_message() {
            Disposition::Continue => (),
            Disposition::Reset => return Some(Exit::Reset),
            Disposition::Bootload => return Some(self.request_bootload()),
        }
        let tick = match wake {
            Wake::Resumed => tick,
            Wake::Timeout => {
                if tick % self.timing.announce_interval.max(1) == 0 {
                    self.protocol.announce();
                }
                tick.wrapping_add(1)
            }
        };
        self.stage = Stage::Maintenance { tick };
        None
    }

    fn stand_by(&mut self, loop_forever: bool) -> Option<Exit> {
        if loop_forever {
            self.watchdog.reload();
        }
        match self.scheduler.suspend(self.timing.protocol_tick) {
            Wake::Resumed if self.protocol.process_bootload_message() == Disposition::Bootload => {
                Some(self.request_bootload())
            }
            _ => None,
        }
    }

    fn request_bootload(&mut self) -> Exit {
        log::info!("Bootload requested");
        self.reset.set_reason(Reason::UserRequest);
        self.watchdog.enable(Period::Ms800);
        Exit::AwaitWatchdog
    }

    /// Starts the application if program flash matches the stored image
    /// CRC and the memory map. The reason register is set to
    /// `NoApplication` first, so a crashing application isn't retried.
    fn boot(&mut self) -> Exit {
        self.protocol.indicator.set_active(true);
        self.protocol.indicator.set_pattern(Pattern::Booting);

        let flash_crc = if self.memory_map.matches(&self.protocol.program, &self.protocol.configuration) {
            self.protocol.program_crc()
        } else {
            Err(Error::MemoryMapMismatch)
        };
        self.reset.set_reason(Reason::NoApplication);
        let image_crc = self.protocol.configuration.module_configuration().image_crc;

        match flash_crc {
            Ok(crc) if crc == image_crc => {
                self.watchdog.enable(Period::Ms6400);
                self.protocol.transport.shutdown();
                let (start, _) = self.protocol.program.range();
                Exit::StartApplication(start)
            }
            result => {
                result.err().unwrap_or(Error::ImageCrcMismatch).report();
                self.watchdog.enable(Period::Ms1600);
                Exit::AwaitWatchdog
            }
        }
    }
}
