//! Bus transports.
//!
//! Implementations of the [`crate::hw_trait`] seams: the Linux i2c-dev
//! character device for real hardware, and an in-process simulator of the
//! LiFePO4wered microcontroller for tests and tooling.

pub mod linux;
pub mod sim;

pub use linux::{LinuxI2c, LinuxI2cProvider};
pub use sim::{SimulatedBus, SimulatedPeripheral, Transfer};
