//! Hardware abstraction layer traits.
//!
//! This module defines the bus interface traits that let the register
//! access code work with different underlying implementations, whether
//! direct Linux hardware access or the in-process simulator.

use nix::errno::Errno;

use crate::error::Result;

/// I2C-specific errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum I2cError {
    /// No acknowledgment from device
    #[error("no acknowledgment from device at address 0x{0:02x}")]
    NoAck(u16),

    /// Bus layer rejected the transfer
    #[error("I/O error: {0}")]
    Io(Errno),

    /// Other I2C error
    #[error("I2C error: {0}")]
    Other(String),
}

impl From<Errno> for I2cError {
    fn from(errno: Errno) -> Self {
        I2cError::Io(errno)
    }
}

/// An open, exclusively held I2C bus.
///
/// Every call is one complete transaction: START, address, data, STOP.
/// Implementations must not merge consecutive calls into a repeated-start
/// transfer, since some peripherals need to see the STOP in between.
pub trait I2c {
    /// Write `data` to the device at `addr`.
    fn write(&mut self, addr: u16, data: &[u8]) -> std::result::Result<(), I2cError>;

    /// Fill `buffer` from the device at `addr`.
    fn read(&mut self, addr: u16, buffer: &mut [u8]) -> std::result::Result<(), I2cError>;
}

/// Source of locked bus handles.
///
/// `open` acquires the bus exclusively and without blocking. The returned
/// handle releases the lock and closes the device when dropped.
pub trait BusProvider {
    type Bus: I2c;

    /// Open and lock bus number `bus`.
    fn open(&self, bus: u8) -> Result<Self::Bus>;
}

impl<P: BusProvider + ?Sized> BusProvider for &P {
    type Bus = P::Bus;

    fn open(&self, bus: u8) -> Result<Self::Bus> {
        (**self).open(bus)
    }
}
