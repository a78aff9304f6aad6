//! MSC (MMC/SD controller) driver
//!
//! Drives SD cards in the two card sockets through the SoC's MMC/SD
//! controller, moving sector data by DMA. Each socket has its own lock that
//! covers a complete transfer or identification; cards are identified lazily
//! on first use and again after every insertion.

pub mod card;
pub mod command;
pub mod dma;
pub mod gateway;
#[cfg(feature = "hotswap")]
pub mod hotplug;
pub mod init;
pub mod platform;
pub mod regs;
pub mod response;
#[cfg(test)]
pub(crate) mod sim;
pub mod worker;

use crate::time::{HZ, PollBudget, Tick};
use card::{BLOCK_SIZE, CardDescriptor, CardVersion, SlotState};
use command::{Command, CommandRequest, DataBuffer, ResponseKind};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use dma::{BounceBuffer, DmaEngine};
use gateway::{ActivityGuard, SlotHost};
use response::{CardState, R1, decode_r1};
use spin::Mutex;

pub use platform::{MscChannel, Platform, SLOT_COUNT, Slot};

/// MSC driver error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// No response captured yet
    NoResponse,
    /// Card: command argument out of range
    AddressOutOfRange,
    /// Card: misaligned address
    AddressError,
    /// Card: block length not allowed
    BlockLenError,
    /// Card: erase command sequence error
    EraseSeqError,
    /// Card: invalid erase block selection
    EraseParam,
    /// Card: write to a protected block
    WpViolation,
    /// Card: lock/unlock command failed
    LockUnlockFailed,
    /// Card: CRC check of the previous command failed
    ComCrcError,
    /// Card: command not legal in the current state
    IllegalCommand,
    /// Card: internal ECC could not correct the data
    CardEccFailed,
    /// Card: internal controller error
    CcError,
    /// Card: unspecified error
    GeneralError,
    /// Card: could not sustain a read stream
    Underrun,
    /// Card: could not sustain a write stream
    Overrun,
    /// Card: CID/CSD overwrite rejected
    CidCsdOverwrite,
    /// Card is not in the expected state
    StateMismatch,
    /// Response does not echo the command sent
    HeaderMismatch,
    /// No response from the card
    Timeout,
    /// Data phase did not complete
    DataTimeout,
    /// CRC error on the response or data
    Crc,
    /// DMA channel did not drain
    DmaTimeout,
    /// Controller or DMA fault
    DriverFailure,
    /// No card in the slot
    NoCard,
    /// Bad arguments from the caller
    InvalidRequest,
    /// Request starts beyond the end of the card
    OutOfRange,
    /// Card could not be identified
    InitFailed,
}

/// Driver tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Polls of the status register before a command is declared lost
    pub command_poll_limit: u32,
    /// Budget for DMA, data-done and program-done waits
    pub data_wait: PollBudget,
    /// Steps the identification state machine may take
    pub init_step_limit: u32,
    /// Settle time after GO_IDLE
    pub init_settle_ticks: Tick,
    /// Pause between ACMD41 queries while the card powers up
    pub op_cond_retry_ticks: Tick,
    /// Card-detect debounce interval
    pub debounce_ticks: Tick,
    /// Inactivity before the storage-idle notification
    pub idle_ticks: Tick,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_poll_limit: 0x3F_FFFF,
            data_wait: PollBudget::Unbounded,
            init_step_limit: 1000,
            init_settle_ticks: HZ / 2,
            op_cond_retry_ticks: HZ / 100,
            debounce_ticks: 3 * HZ / 10,
            idle_ticks: 3 * HZ,
        }
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with every wait bounded, so a broken test fails instead of
    /// hanging
    pub(crate) fn for_tests() -> Self {
        Self {
            command_poll_limit: 1000,
            data_wait: PollBudget::Polls(100_000),
            ..Self::default()
        }
    }
}

/// `last_activity` value before any transfer
const NO_ACTIVITY: u32 = u32::MAX;

/// SD card driver for both sockets
pub struct SdDriver<P: Platform> {
    platform: P,
    config: Config,
    dma: DmaEngine,
    slots: [Mutex<SlotState>; SLOT_COUNT],
    last_activity: AtomicU32,
    idle_notified: AtomicBool,
    first_drive: AtomicUsize,
    #[cfg(feature = "hotswap")]
    hotplug: hotplug::HotplugMonitor,
}

impl<P: Platform> SdDriver<P> {
    pub fn new(platform: P, bounce: &'static mut BounceBuffer, config: Config) -> Self {
        if config.data_wait == PollBudget::Unbounded {
            log::warn!("MSC: data waits are unbounded, a wedged transfer will hang its caller");
        }

        Self {
            platform,
            config,
            dma: DmaEngine::new(bounce),
            slots: [const { Mutex::new(SlotState::new()) }; SLOT_COUNT],
            last_activity: AtomicU32::new(NO_ACTIVITY),
            idle_notified: AtomicBool::new(false),
            first_drive: AtomicUsize::new(0),
            #[cfg(feature = "hotswap")]
            hotplug: hotplug::HotplugMonitor::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Card-detect line state
    pub fn present(&self, slot: Slot) -> bool {
        self.platform.card_detect(slot)
    }

    /// Whether the sockets take hot-plugged cards
    pub fn removable(&self, _slot: Slot) -> bool {
        cfg!(feature = "hotswap")
    }

    /// Register the driver's place in the storage drive table
    ///
    /// Slot `n` becomes drive `first_drive + n`. Returns the number of drives
    /// this driver provides.
    pub fn num_drives(&self, first_drive: usize) -> usize {
        self.first_drive.store(first_drive, Ordering::Release);
        SLOT_COUNT
    }

    /// Storage drive number of a slot
    pub fn drive(&self, slot: Slot) -> usize {
        self.first_drive.load(Ordering::Acquire) + slot.index()
    }

    /// Tick of the most recent data transfer, if any
    pub fn last_activity(&self) -> Option<Tick> {
        match self.last_activity.load(Ordering::Acquire) {
            NO_ACTIVITY => None,
            tick => Some(tick),
        }
    }

    /// Snapshot of what is known about the card in a slot
    pub fn card_info(&self, slot: Slot) -> CardDescriptor {
        self.slots[slot.index()].lock().card
    }

    /// Boot-time initialization of both sockets
    ///
    /// Returns the number of cards identified.
    pub fn init_all(&self) -> usize {
        self.dma.enable_channels(&self.platform);

        let mut ready = 0;
        for slot in Slot::all() {
            match self.init_slot(slot) {
                Ok(()) => ready += 1,
                Err(SdError::NoCard) => log::debug!("MSC: slot {} empty", slot.index()),
                Err(e) => log::error!("MSC: slot {} init failed: {:?}", slot.index(), e),
            }
        }
        ready
    }

    /// Identify the card in a slot from scratch
    pub fn init_slot(&self, slot: Slot) -> Result<(), SdError> {
        let mut state = self.slots[slot.index()].lock();
        self.reinit_locked(slot, &mut state)
    }

    /// Re-identify with the slot lock already held
    fn reinit_locked(&self, slot: Slot, state: &mut SlotState) -> Result<(), SdError> {
        state.card.initialized = false;
        if !self.present(slot) {
            return Err(SdError::NoCard);
        }
        let _activity = ActivityGuard::engage(&self.platform, slot);
        self.host(slot, state).identify()
    }

    fn host<'a>(&'a self, slot: Slot, state: &'a mut SlotState) -> SlotHost<'a, P> {
        SlotHost::new(&self.platform, &self.dma, &self.config, slot, state)
    }

    // ========================================================================
    // Sector I/O
    // ========================================================================

    /// Read `count` sectors starting at `start` into `buf`
    pub fn read_sectors(&self, slot: Slot, start: u32, count: u32, buf: &mut [u8]) -> Result<(), SdError> {
        self.transfer(slot, start, count, DataBuffer::Read(buf))
            .inspect_err(|e| log::error!("MSC: read {}+{} on slot {} failed: {:?}", start, count, slot.index(), e))
    }

    /// Write `count` sectors starting at `start` from `buf`
    pub fn write_sectors(&self, slot: Slot, start: u32, count: u32, buf: &[u8]) -> Result<(), SdError> {
        self.transfer(slot, start, count, DataBuffer::Write(buf))
            .inspect_err(|e| log::error!("MSC: write {}+{} on slot {} failed: {:?}", start, count, slot.index(), e))
    }

    fn transfer(&self, slot: Slot, start: u32, count: u32, data: DataBuffer<'_>) -> Result<(), SdError> {
        let mut state = self.slots[slot.index()].lock();
        let _activity = ActivityGuard::engage(&self.platform, slot);

        if !self.present(slot) {
            return Err(SdError::NoCard);
        }
        let block_count = u16::try_from(count).map_err(|_| SdError::InvalidRequest)?;
        if block_count == 0 || data.len() < count as usize * BLOCK_SIZE {
            return Err(SdError::InvalidRequest);
        }

        if !state.card.initialized {
            if let Err(e) = self.host(slot, &mut state).identify() {
                log::warn!("MSC: slot {} identification failed: {:?}", slot.index(), e);
                return Err(SdError::InitFailed);
            }
        }
        if start >= state.card.block_count {
            return Err(SdError::OutOfRange);
        }

        let card = state.card;
        let mut host = self.host(slot, &mut state);

        let mut req = CommandRequest::new(slot, Command::SendStatus, card.rca, ResponseKind::R1);
        match send_r1(&mut host, &mut req).and_then(|r1| r1.expect_state(CardState::Transfer)) {
            Ok(_) => {}
            Err(SdError::StateMismatch) => {
                log::debug!("MSC: slot {} not in transfer state, continuing", slot.index());
            }
            Err(e) => return Err(e),
        }

        let mut req = CommandRequest::new(slot, Command::SetBlocklen, BLOCK_SIZE as u32, ResponseKind::R1);
        send_r1(&mut host, &mut req)?;

        let arg = match card.version {
            CardVersion::HighCapacity => start,
            CardVersion::Legacy => start.checked_mul(BLOCK_SIZE as u32).ok_or(SdError::OutOfRange)?,
        };
        let cmd = match data {
            DataBuffer::Write(_) => Command::WriteMultipleBlock,
            _ => Command::ReadMultipleBlock,
        };
        let mut req = CommandRequest::new(slot, cmd, arg, ResponseKind::R1)
            .with_data(block_count, BLOCK_SIZE as u16, data);
        send_r1(&mut host, &mut req)?;

        self.last_activity.store(self.platform.current_tick(), Ordering::Release);
        self.idle_notified.store(false, Ordering::Release);

        let mut stop = CommandRequest::new(slot, Command::StopTransmission, 0, ResponseKind::R1b);
        send_r1(&mut host, &mut stop)?;
        Ok(())
    }
}

/// Execute and decode an R1 command
fn send_r1<P: Platform>(host: &mut SlotHost<'_, P>, req: &mut CommandRequest<'_>) -> Result<R1, SdError> {
    host.exec(req)?;
    decode_r1(req)
}
