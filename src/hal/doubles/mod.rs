//! Host fakes for the hardware interfaces, used by the test suite.
pub mod bus;
pub mod error;
pub mod flash;
pub mod led;
pub mod system;
