//! LiFePO4wered/Pi microcontroller register access.
//!
//! The microcontroller exposes a flat register file at a fixed I2C
//! address. Reads are two separate transactions: a one-byte write that
//! latches the register pointer, a short pause so the firmware can see the
//! STOP condition and stage its answer, then a plain read. Writes are a
//! single transaction carrying the register byte followed by the payload.
//!
//! Every access opens and locks the bus itself and releases it before
//! returning, on success and failure alike. Register contents are not
//! interpreted here.

use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::AccessConfig;
use crate::error::{Error, Phase, Result};
use crate::hw_trait::{BusProvider, I2c};
use crate::transport::LinuxI2cProvider;

/// Pause between the address latch and the data read.
pub const LATCH_DELAY: Duration = Duration::from_micros(20);

/// Largest payload of a single write; the frame also carries the register.
pub const MAX_PAYLOAD: usize = 255;

const FRAME_SIZE: usize = MAX_PAYLOAD + 1;

/// First half of a register read: nothing has been sent yet.
pub struct RegisterRead<'a, B: I2c> {
    bus: &'a mut B,
    address: u16,
    register: u8,
}

impl<'a, B: I2c> RegisterRead<'a, B> {
    pub fn new(bus: &'a mut B, address: u16, register: u8) -> Self {
        Self {
            bus,
            address,
            register,
        }
    }

    /// Send the register byte and wait out [`LATCH_DELAY`].
    pub fn latch(self) -> Result<LatchedRead<'a, B>> {
        self.bus
            .write(self.address, &[self.register])
            .map_err(Error::transaction(Phase::Latch))?;

        thread::sleep(LATCH_DELAY);

        Ok(LatchedRead {
            bus: self.bus,
            address: self.address,
        })
    }
}

/// Second half of a register read: the pointer is latched.
pub struct LatchedRead<'a, B: I2c> {
    bus: &'a mut B,
    address: u16,
}

impl<B: I2c> LatchedRead<'_, B> {
    /// Read `buffer.len()` bytes from the latched register onwards.
    ///
    /// On error the contents of `buffer` are unspecified.
    pub fn fetch(self, buffer: &mut [u8]) -> Result<()> {
        self.bus
            .read(self.address, buffer)
            .map_err(Error::transaction(Phase::Read))
    }
}

/// Register access to one LiFePO4wered microcontroller.
pub struct Lifepo4wered<P> {
    provider: P,
    config: AccessConfig,
}

impl Lifepo4wered<LinuxI2cProvider> {
    /// Access through `/dev/i2c-N` as described by `config`.
    pub fn linux(config: AccessConfig) -> Self {
        Self::new(LinuxI2cProvider::new(), config)
    }
}

impl<P: BusProvider> Lifepo4wered<P> {
    pub fn new(provider: P, config: AccessConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Read `buffer.len()` bytes starting at `register`.
    ///
    /// If the latch fails the read is never attempted and `buffer` is left
    /// untouched.
    pub fn read(&self, register: u8, buffer: &mut [u8]) -> Result<()> {
        let mut bus = self.provider.open(self.config.bus)?;

        RegisterRead::new(&mut bus, self.config.address, register)
            .latch()?
            .fetch(buffer)?;

        trace!("Read register 0x{:02x}: {:02x?}", register, buffer);
        Ok(())
    }

    /// Write `data` starting at `register`.
    ///
    /// Success means the bus accepted the transaction; nothing is read
    /// back.
    pub fn write(&self, register: u8, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = register;
        frame[1..=data.len()].copy_from_slice(data);
        let frame = &frame[..=data.len()];

        let mut bus = self.provider.open(self.config.bus)?;
        bus.write(self.config.address, frame)
            .map_err(Error::transaction(Phase::Write))?;

        trace!("Wrote register 0x{:02x}: {:02x?}", register, data);
        Ok(())
    }

    /// Read `count` bytes from `register` into the front of `data`.
    ///
    /// Returns `false` on any failure, in which case `data` may hold
    /// partial content.
    pub fn read_data(&self, register: u8, count: u8, data: &mut [u8]) -> bool {
        let result = checked_prefix_mut(data, count).and_then(|buffer| self.read(register, buffer));
        report("read", register, result)
    }

    /// Write the first `count` bytes of `data` to `register`.
    pub fn write_data(&self, register: u8, count: u8, data: &[u8]) -> bool {
        let result = checked_prefix(data, count).and_then(|payload| self.write(register, payload));
        report("write", register, result)
    }
}

/// Read from the LiFePO4wered on the system bus.
///
/// Uses the configuration from [`AccessConfig::load`]; any failure,
/// including an unreadable configuration, yields `false`.
pub fn read_register_data(register: u8, count: u8, data: &mut [u8]) -> bool {
    match AccessConfig::load() {
        Ok(config) => Lifepo4wered::linux(config).read_data(register, count, data),
        Err(err) => report("read", register, Err(err)),
    }
}

/// Write to the LiFePO4wered on the system bus.
pub fn write_register_data(register: u8, count: u8, data: &[u8]) -> bool {
    match AccessConfig::load() {
        Ok(config) => Lifepo4wered::linux(config).write_data(register, count, data),
        Err(err) => report("write", register, Err(err)),
    }
}

fn checked_prefix(data: &[u8], count: u8) -> Result<&[u8]> {
    let len = data.len();
    data.get(..usize::from(count))
        .ok_or(Error::BufferTooSmall {
            len,
            count: count.into(),
        })
}

fn checked_prefix_mut(data: &mut [u8], count: u8) -> Result<&mut [u8]> {
    let len = data.len();
    data.get_mut(..usize::from(count))
        .ok_or(Error::BufferTooSmall {
            len,
            count: count.into(),
        })
}

fn report(op: &str, register: u8, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            debug!("Register 0x{:02x} {} failed: {}", register, op, err);
            false
        }
    }
}
