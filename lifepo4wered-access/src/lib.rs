//! Register access to the LiFePO4wered/Pi battery-management
//! microcontroller over Linux I2C.
//!
//! [`Lifepo4wered`] performs single register reads and writes, taking an
//! exclusive lock on the bus for the duration of each call. The bus itself
//! sits behind [`hw_trait::BusProvider`], implemented for real hardware by
//! [`transport::LinuxI2cProvider`] and for tests by
//! [`transport::SimulatedPeripheral`].

pub mod config;
pub mod error;
pub mod hw_trait;
pub mod peripheral;
pub mod tracing;
pub mod transport;

pub use config::AccessConfig;
pub use error::{Error, ErrorKind, Phase, Result};
pub use peripheral::lifepo4wered::{
    read_register_data, write_register_data, Lifepo4wered, LATCH_DELAY, MAX_PAYLOAD,
};
