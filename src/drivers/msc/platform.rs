//! Board interface consumed by the MSC driver
//!
//! Everything the driver touches outside its own state goes through
//! [`Platform`]: the controller and DMA register windows, the clock/power
//! manager, cache maintenance, card-detect pins, the activity LED, one-shot
//! timers and scheduler time.

use super::SdError;
use super::regs::{DmaReg, MscReg};
use crate::time::Clock;
#[cfg(feature = "hotswap")]
use crate::time::Tick;

/// Number of card sockets
pub const SLOT_COUNT: usize = 2;

/// One of the card sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    pub const FIRST: Slot = Slot(0);
    pub const SECOND: Slot = Slot(1);

    /// Validate a socket number
    pub const fn new(index: usize) -> Result<Self, SdError> {
        if index < SLOT_COUNT {
            Ok(Slot(index as u8))
        } else {
            Err(SdError::InvalidRequest)
        }
    }

    /// Both sockets, in order
    pub const fn all() -> [Slot; SLOT_COUNT] {
        [Slot::FIRST, Slot::SECOND]
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Controller channel wired to this socket
    ///
    /// The first socket sits on channel 2, the second on channel 1.
    pub const fn channel(self) -> MscChannel {
        MscChannel(2 - self.0)
    }
}

/// Controller channel number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MscChannel(pub u8);

/// DMA channel number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel(pub u8);

/// Transition the card-detect interrupt should fire on next
#[cfg(feature = "hotswap")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardChange {
    Insertion,
    Removal,
}

/// Board services used by the MSC driver
pub trait Platform: Clock + Sync {
    // --- Controller register window ---

    /// Read a controller register
    fn msc_read(&self, channel: MscChannel, reg: MscReg) -> u32;

    /// Write a controller register
    fn msc_write(&self, channel: MscChannel, reg: MscReg, value: u32);

    /// Physical base address of a controller channel, as seen by DMA
    fn msc_phys_base(&self, channel: MscChannel) -> u32;

    // --- DMA ---

    /// Read a DMA channel register
    fn dma_read(&self, channel: DmaChannel, reg: DmaReg) -> u32;

    /// Write a DMA channel register
    fn dma_write(&self, channel: DmaChannel, reg: DmaReg, value: u32);

    /// Ungate the DMA controller clock and enable the channel
    fn dma_enable(&self, channel: DmaChannel);

    /// Translate a CPU address into the physical address DMA uses
    fn phys_addr(&self, addr: usize) -> u32;

    /// Write back and invalidate the data cache lines covering a region
    fn cache_writeback_invalidate(&self, addr: usize, len: usize);

    // --- Clock/power manager ---

    /// Gate or ungate the controller channel's clock
    fn set_controller_clock(&self, channel: MscChannel, on: bool);

    /// Program the controller's source clock for the requested bus rate
    fn set_clock_source(&self, rate_hz: u32);

    // --- Board ---

    /// Drive the disk activity LED
    fn set_activity_led(&self, on: bool);

    /// Sample the card-detect line
    fn card_detect(&self, slot: Slot) -> bool;

    /// Enable the card-detect interrupt for the given transition
    #[cfg(feature = "hotswap")]
    fn arm_card_detect(&self, slot: Slot, next: CardChange);

    /// Arm (or re-arm) the slot's one-shot debounce timer
    ///
    /// When it fires the board calls `SdDriver::on_debounce_expired` with the
    /// same `token`.
    #[cfg(feature = "hotswap")]
    fn arm_debounce(&self, slot: Slot, ticks: Tick, token: u32);
}
