//! Simulated LiFePO4wered microcontroller.
//!
//! Models the peripheral as a 256-byte register file behind a register
//! pointer. A one-byte write latches the pointer; a longer write latches it
//! and stores the remaining bytes with auto-increment; a read returns bytes
//! from the pointer onwards, also auto-incrementing. The simulator also
//! enforces the exclusive bus lock and records every transfer so tests can
//! check ordering and timing.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::config::AccessConfig;
use crate::error::{Error, Result};
use crate::hw_trait::{BusProvider, I2c, I2cError};

/// One observable step on the simulated bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Open { bus: u8 },
    Write { addr: u16, data: Vec<u8> },
    Read { addr: u16, len: usize },
    Close,
}

struct SimState {
    bus: u8,
    address: u16,
    present: bool,
    registers: [u8; 256],
    pointer: u8,
    nacked_registers: HashSet<u8>,
    nack_reads: bool,
    locked: bool,
    latched_at: Option<Instant>,
    latch_gaps: Vec<Duration>,
    log: Vec<Transfer>,
}

impl SimState {
    fn write(&mut self, addr: u16, data: &[u8]) -> std::result::Result<(), I2cError> {
        self.log.push(Transfer::Write {
            addr,
            data: data.to_vec(),
        });

        if addr != self.address || !self.present {
            return Err(I2cError::NoAck(addr));
        }
        let Some((&register, payload)) = data.split_first() else {
            // Address-only probe
            return Ok(());
        };
        if self.nacked_registers.contains(&register) {
            return Err(I2cError::NoAck(addr));
        }

        self.pointer = register;
        for &byte in payload {
            self.registers[usize::from(self.pointer)] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        }
        if payload.is_empty() {
            self.latched_at = Some(Instant::now());
        }
        Ok(())
    }

    fn read(&mut self, addr: u16, buffer: &mut [u8]) -> std::result::Result<(), I2cError> {
        self.log.push(Transfer::Read {
            addr,
            len: buffer.len(),
        });

        if addr != self.address || !self.present || self.nack_reads {
            return Err(I2cError::NoAck(addr));
        }
        if let Some(latched_at) = self.latched_at.take() {
            self.latch_gaps.push(latched_at.elapsed());
        }

        for byte in buffer.iter_mut() {
            *byte = self.registers[usize::from(self.pointer)];
            self.pointer = self.pointer.wrapping_add(1);
        }
        Ok(())
    }
}

/// Shared handle to a simulated peripheral on a simulated bus.
///
/// Cloning yields another handle to the same peripheral. Use it as the
/// [`BusProvider`] for code under test and keep a clone to inspect and
/// manipulate the device.
#[derive(Clone)]
pub struct SimulatedPeripheral {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPeripheral {
    /// Peripheral at `address` on bus number `bus`, registers zeroed.
    pub fn new(bus: u8, address: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                bus,
                address,
                present: true,
                registers: [0; 256],
                pointer: 0,
                nacked_registers: HashSet::new(),
                nack_reads: false,
                locked: false,
                latched_at: None,
                latch_gaps: Vec::new(),
                log: Vec::new(),
            })),
        }
    }

    /// Peripheral placed where `config` expects it.
    pub fn for_config(config: &AccessConfig) -> Self {
        Self::new(config.bus, config.address)
    }

    /// Preload registers starting at `register`.
    pub fn set_registers(&self, register: u8, values: &[u8]) {
        let mut state = self.state.lock();
        let mut index = register;
        for &value in values {
            state.registers[usize::from(index)] = value;
            index = index.wrapping_add(1);
        }
    }

    /// Current contents of `len` registers starting at `register`.
    pub fn registers(&self, register: u8, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        (0..len)
            .map(|offset| state.registers[(usize::from(register) + offset) % 256])
            .collect()
    }

    /// NACK any write whose first byte selects `register`.
    pub fn nack_register(&self, register: u8) {
        self.state.lock().nacked_registers.insert(register);
    }

    /// NACK every read.
    pub fn set_nack_reads(&self, nack: bool) {
        self.state.lock().nack_reads = nack;
    }

    /// Attach or detach the device; a detached device NACKs everything.
    pub fn set_present(&self, present: bool) {
        self.state.lock().present = present;
    }

    /// Whether a [`SimulatedBus`] currently holds the bus lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Every transfer seen so far, oldest first.
    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().log.clone()
    }

    /// Forget recorded transfers and latch timings.
    pub fn clear_transfers(&self) {
        let mut state = self.state.lock();
        state.log.clear();
        state.latch_gaps.clear();
    }

    /// Time between each address latch and the read that consumed it.
    pub fn latch_gaps(&self) -> Vec<Duration> {
        self.state.lock().latch_gaps.clone()
    }
}

impl BusProvider for SimulatedPeripheral {
    type Bus = SimulatedBus;

    fn open(&self, bus: u8) -> Result<SimulatedBus> {
        let mut state = self.state.lock();
        let path = PathBuf::from(format!("sim/i2c-{bus}"));

        if bus != state.bus {
            return Err(Error::Open {
                path,
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        if state.locked {
            return Err(Error::Busy { path });
        }

        state.locked = true;
        state.log.push(Transfer::Open { bus });
        trace!("Simulated bus {} opened", bus);

        Ok(SimulatedBus {
            state: Arc::clone(&self.state),
        })
    }
}

/// Locked handle on the simulated bus; unlocks when dropped.
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl I2c for SimulatedBus {
    fn write(&mut self, addr: u16, data: &[u8]) -> std::result::Result<(), I2cError> {
        self.state.lock().write(addr, data)
    }

    fn read(&mut self, addr: u16, buffer: &mut [u8]) -> std::result::Result<(), I2cError> {
        self.state.lock().read(addr, buffer)
    }
}

impl Drop for SimulatedBus {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.locked = false;
        state.log.push(Transfer::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_then_read_auto_increments() {
        let sim = SimulatedPeripheral::new(1, 0x43);
        sim.set_registers(0x10, &[1, 2, 3]);

        let mut bus = sim.open(1).unwrap();
        bus.write(0x43, &[0x10]).unwrap();
        let mut buffer = [0; 3];
        bus.read(0x43, &mut buffer).unwrap();
        assert_eq!(buffer, [1, 2, 3]);

        assert_eq!(sim.latch_gaps().len(), 1);
    }

    #[test]
    fn test_write_stores_payload() {
        let sim = SimulatedPeripheral::new(1, 0x43);
        let mut bus = sim.open(1).unwrap();
        bus.write(0x43, &[0xFE, 0xAA, 0xBB, 0xCC]).unwrap();

        // Wraps around past register 0xFF
        assert_eq!(sim.registers(0xFE, 3), vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(sim.registers(0x00, 1), vec![0xCC]);
    }

    #[test]
    fn test_wrong_address_nacks() {
        let sim = SimulatedPeripheral::new(1, 0x43);
        let mut bus = sim.open(1).unwrap();
        assert_eq!(bus.write(0x44, &[0x00]), Err(I2cError::NoAck(0x44)));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let sim = SimulatedPeripheral::new(1, 0x43);

        let held = sim.open(1).unwrap();
        assert!(sim.is_locked());
        assert!(matches!(sim.open(1), Err(Error::Busy { .. })));

        drop(held);
        assert!(!sim.is_locked());
        assert_eq!(
            sim.transfers(),
            vec![Transfer::Open { bus: 1 }, Transfer::Close]
        );
    }

    #[test]
    fn test_unknown_bus() {
        let sim = SimulatedPeripheral::new(1, 0x43);
        assert!(matches!(sim.open(2), Err(Error::Open { .. })));
        assert!(sim.transfers().is_empty());
    }
}
