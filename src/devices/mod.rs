//! Complex modules with business logic related to the problem
//! domain, that lay on top of abstract drivers. Devices are
//! generic, while board specifics (CAN peripheral, flash layout,
//! jump to application) are handled in the `ports` module.

pub mod bootloader;
pub mod identity;
pub mod messages;
pub mod protocol;
pub mod transport;

/// General purpose traits that summarize requirements on devices.
pub mod traits {
    use crate::{
        error,
        hal::{bus, storage},
    };
    use marker_blanket::marker_blanket;

    /// Program flash must be erasable and writable, and report errors to
    /// the protocol.
    #[marker_blanket]
    pub trait ProgramFlash: storage::ProgramStorage<Error: error::Convertible> {}

    /// Configuration flash must hold the module record and user data,
    /// and report errors to the protocol.
    #[marker_blanket]
    pub trait ConfigurationFlash: storage::ConfigurationStorage<Error: error::Convertible> {}

    /// A supported CAN controller must transmit frames and report errors
    /// to the transport.
    #[marker_blanket]
    pub trait CanBus: bus::Bus<Error: error::Convertible> {}
}
