//! DMA data path between the controller FIFOs and memory
//!
//! Two channels, one per direction, are shared by both slots. Buffers that
//! are not word aligned are staged through a fixed bounce buffer, one
//! capacity-sized chunk at a time.

use super::SdError;
use super::card::BLOCK_SIZE;
use super::platform::{DmaChannel, MscChannel, Platform, Slot};
use super::regs::{DCCSR, DCMD, DmaReg, MscReg, RequestSource};
use crate::time::{PollBudget, poll_until};
use core::sync::atomic::{Ordering, fence};
use spin::Mutex;
use tock_registers::LocalRegisterCopy;

/// Channel moving card data into memory
pub const RX_CHANNEL: DmaChannel = DmaChannel(1);
/// Channel moving memory out to the card
pub const TX_CHANNEL: DmaChannel = DmaChannel(2);

/// Bounce buffer capacity in blocks
pub const BOUNCE_BLOCKS: usize = 256;
/// Bounce buffer capacity in bytes
pub const BOUNCE_LEN: usize = BOUNCE_BLOCKS * BLOCK_SIZE;

/// Word-aligned staging area for misaligned transfers
#[repr(C, align(4))]
pub struct BounceBuffer([u8; BOUNCE_LEN]);

impl BounceBuffer {
    pub const fn new() -> Self {
        Self([0; BOUNCE_LEN])
    }

    #[cfg(test)]
    pub(crate) fn leaked() -> &'static mut Self {
        std::boxed::Box::leak(std::boxed::Box::new(Self::new()))
    }
}

impl Default for BounceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Data direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Card to memory
    Receive,
    /// Memory to card
    Transmit,
}

/// Request line a controller FIFO raises for the given direction
pub fn request_source(channel: MscChannel, direction: Direction) -> Result<RequestSource, SdError> {
    let source = match (channel.0, direction) {
        (0, Direction::Receive) => RequestSource::Msc0In,
        (0, Direction::Transmit) => RequestSource::Msc0Out,
        (1, Direction::Receive) => RequestSource::Msc1In,
        (1, Direction::Transmit) => RequestSource::Msc1Out,
        (2, Direction::Receive) => RequestSource::Msc2In,
        (2, Direction::Transmit) => RequestSource::Msc2Out,
        _ => return Err(SdError::DriverFailure),
    };
    Ok(source)
}

/// One programmed channel run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descriptor {
    source: u32,
    target: u32,
    word_count: u32,
    request: RequestSource,
    direction: Direction,
}

impl Descriptor {
    /// DCMD value: 32-bit units and ports, incrementing the memory side only
    fn command(&self) -> u32 {
        let width = DCMD::SWDH::Bits32 + DCMD::DWDH::Bits32 + DCMD::DS::Bits32;
        match self.direction {
            Direction::Receive => (width + DCMD::DAI::SET).value,
            Direction::Transmit => (width + DCMD::SAI::SET).value,
        }
    }

    fn channel(&self) -> DmaChannel {
        match self.direction {
            Direction::Receive => RX_CHANNEL,
            Direction::Transmit => TX_CHANNEL,
        }
    }
}

fn is_word_aligned(ptr: *const u8, len: usize) -> bool {
    (ptr as usize) & 3 == 0 && len & 3 == 0
}

/// Shared DMA channels plus the bounce buffer
pub struct DmaEngine {
    bounce: Mutex<&'static mut BounceBuffer>,
}

impl DmaEngine {
    pub fn new(bounce: &'static mut BounceBuffer) -> Self {
        Self {
            bounce: Mutex::new(bounce),
        }
    }

    /// Enable both channels
    pub fn enable_channels<P: Platform>(&self, platform: &P) {
        platform.dma_enable(RX_CHANNEL);
        platform.dma_enable(TX_CHANNEL);
    }

    /// Move `buf.len()` bytes from the slot's receive FIFO into `buf`
    pub fn receive<P: Platform>(
        &self,
        platform: &P,
        slot: Slot,
        buf: &mut [u8],
        wait: PollBudget,
    ) -> Result<(), SdError> {
        let mut bounce = self.bounce.lock();
        let channel = slot.channel();
        let fifo = platform.msc_phys_base(channel) + MscReg::RxFifo.offset();
        let request = request_source(channel, Direction::Receive)?;

        let run = |target: &mut [u8]| {
            let addr = target.as_mut_ptr() as usize;
            platform.cache_writeback_invalidate(addr, target.len());
            run_channel(
                platform,
                &Descriptor {
                    source: fifo,
                    target: platform.phys_addr(addr),
                    word_count: target.len().div_ceil(4) as u32,
                    request,
                    direction: Direction::Receive,
                },
                wait,
            )
        };

        if is_word_aligned(buf.as_ptr(), buf.len()) {
            return run(buf);
        }

        log::trace!("MSC{}: misaligned receive of {} bytes", channel.0, buf.len());
        for chunk in buf.chunks_mut(BOUNCE_LEN) {
            let staging = &mut bounce.0[..chunk.len().next_multiple_of(4)];
            run(staging)?;
            chunk.copy_from_slice(&staging[..chunk.len()]);
        }
        Ok(())
    }

    /// Move `buf` out through the slot's transmit FIFO
    pub fn transmit<P: Platform>(
        &self,
        platform: &P,
        slot: Slot,
        buf: &[u8],
        wait: PollBudget,
    ) -> Result<(), SdError> {
        let mut bounce = self.bounce.lock();
        let channel = slot.channel();
        let fifo = platform.msc_phys_base(channel) + MscReg::TxFifo.offset();
        let request = request_source(channel, Direction::Transmit)?;

        let run = |source: &[u8]| {
            let addr = source.as_ptr() as usize;
            platform.cache_writeback_invalidate(addr, source.len());
            run_channel(
                platform,
                &Descriptor {
                    source: platform.phys_addr(addr),
                    target: fifo,
                    word_count: source.len().div_ceil(4) as u32,
                    request,
                    direction: Direction::Transmit,
                },
                wait,
            )
        };

        if is_word_aligned(buf.as_ptr(), buf.len()) {
            return run(buf);
        }

        log::trace!("MSC{}: misaligned transmit of {} bytes", channel.0, buf.len());
        for chunk in buf.chunks(BOUNCE_LEN) {
            let staging = &mut bounce.0[..chunk.len().next_multiple_of(4)];
            staging[..chunk.len()].copy_from_slice(chunk);
            run(&staging[..])?;
        }
        Ok(())
    }
}

/// Program a channel, run it to completion and disable it again
fn run_channel<P: Platform>(
    platform: &P,
    desc: &Descriptor,
    wait: PollBudget,
) -> Result<(), SdError> {
    let channel = desc.channel();

    platform.dma_write(channel, DmaReg::Dccsr, 0);
    platform.dma_write(channel, DmaReg::Dsar, desc.source);
    platform.dma_write(channel, DmaReg::Dtar, desc.target);
    platform.dma_write(channel, DmaReg::Dtcr, desc.word_count);
    platform.dma_write(channel, DmaReg::Drsr, desc.request as u32);
    platform.dma_write(channel, DmaReg::Dcmd, desc.command());
    platform.dma_write(channel, DmaReg::Dccsr, (DCCSR::NDES::SET + DCCSR::EN::SET).value);

    let done = poll_until(platform, wait, || {
        platform.dma_read(channel, DmaReg::Dtcr) == 0
    });
    let csr = LocalRegisterCopy::<u32, DCCSR::Register>::new(platform.dma_read(channel, DmaReg::Dccsr));
    platform.dma_write(channel, DmaReg::Dccsr, 0);
    fence(Ordering::SeqCst);

    if !done {
        log::error!(
            "DMA{}: {} words still pending, giving up",
            channel.0,
            platform.dma_read(channel, DmaReg::Dtcr)
        );
        return Err(SdError::DmaTimeout);
    }
    if csr.is_set(DCCSR::AR) || csr.is_set(DCCSR::HLT) {
        log::error!("DMA{}: channel error (DCCSR={:#x})", channel.0, csr.get());
        return Err(SdError::DriverFailure);
    }
    Ok(())
}
