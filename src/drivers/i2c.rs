//! Inter-chip bus access
//!
//! Bus controllers implement [`I2cBus`]. [`Metered`] wraps one to serialize
//! transactions per bus and count failures in a [`BusMetrics`] sink.

use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

/// Phase of a transaction that was waiting when the bus timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferStage {
    /// Slave address after START
    Start = 1,
    /// Register address
    SubAddress = 2,
    /// Slave address after the repeated START of a read
    RepeatedStart = 3,
    /// Data bytes
    Data = 4,
    /// STOP condition
    Stop = 5,
}

/// I2C error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cError {
    /// The controller did not finish a stage in time
    Timeout { stage: TransferStage },
    /// No such bus
    InvalidBus,
}

/// An I2C bus controller
pub trait I2cBus {
    /// Read `buf.len()` bytes from `slave`, optionally after writing a
    /// register address
    fn read(&self, bus: u8, slave: u8, sub_address: Option<u8>, buf: &mut [u8]) -> Result<(), I2cError>;

    /// Write `buf` to `slave`, optionally preceded by a register address
    fn write(&self, bus: u8, slave: u8, sub_address: Option<u8>, buf: &[u8]) -> Result<(), I2cError>;
}

/// Failure counters for the buses
#[derive(Debug, Default)]
pub struct BusMetrics {
    read_errors: AtomicU32,
    write_errors: AtomicU32,
}

impl BusMetrics {
    pub const fn new() -> Self {
        Self {
            read_errors: AtomicU32::new(0),
            write_errors: AtomicU32::new(0),
        }
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u32 {
        self.write_errors.load(Ordering::Relaxed)
    }

    fn record(counter: &AtomicU32, result: Result<(), I2cError>) -> Result<(), I2cError> {
        if result.is_err() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Serializes transactions on each of `BUSES` buses and counts failures
pub struct Metered<'m, B: I2cBus, const BUSES: usize> {
    bus: B,
    locks: [Mutex<()>; BUSES],
    metrics: &'m BusMetrics,
}

impl<'m, B: I2cBus, const BUSES: usize> Metered<'m, B, BUSES> {
    pub fn new(bus: B, metrics: &'m BusMetrics) -> Self {
        Self {
            bus,
            locks: [const { Mutex::new(()) }; BUSES],
            metrics,
        }
    }

    pub fn metrics(&self) -> &BusMetrics {
        self.metrics
    }

    fn lock(&self, bus: u8) -> Result<spin::MutexGuard<'_, ()>, I2cError> {
        self.locks
            .get(bus as usize)
            .map(Mutex::lock)
            .ok_or(I2cError::InvalidBus)
    }
}

impl<B: I2cBus, const BUSES: usize> I2cBus for Metered<'_, B, BUSES> {
    fn read(&self, bus: u8, slave: u8, sub_address: Option<u8>, buf: &mut [u8]) -> Result<(), I2cError> {
        let result = self.lock(bus).and_then(|_guard| self.bus.read(bus, slave, sub_address, buf));
        if let Err(e) = result {
            log::warn!("I2C{}: read from {:#04x} failed: {:?}", bus, slave, e);
        }
        BusMetrics::record(&self.metrics.read_errors, result)
    }

    fn write(&self, bus: u8, slave: u8, sub_address: Option<u8>, buf: &[u8]) -> Result<(), I2cError> {
        let result = self.lock(bus).and_then(|_guard| self.bus.write(bus, slave, sub_address, buf));
        if let Err(e) = result {
            log::warn!("I2C{}: write to {:#04x} failed: {:?}", bus, slave, e);
        }
        BusMetrics::record(&self.metrics.write_errors, result)
    }
}
