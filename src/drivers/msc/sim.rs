//! Simulated board and SD cards for driver tests
//!
//! Models the controller at register level: commands execute when the clock
//! is started with START_OP, responses come out of RES one half-word at a
//! time, and DMA channels move data between caller memory and the card's
//! data stream. The card side follows the SD state machine closely enough
//! for identification, selection and multi-block transfers.

use super::card::BLOCK_SIZE;
use super::card::tests::insert_bits;
use super::dma::BounceBuffer;
#[cfg(feature = "hotswap")]
use super::platform::CardChange;
use super::platform::{DmaChannel, MscChannel, Platform, SLOT_COUNT, Slot};
use super::regs::{DCCSR, DmaReg, IREG, MscReg, RequestSource, STAT, STRPCL};
use super::response::CardStatus;
use super::{Config, SdDriver};
use crate::time::{Clock, Tick};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::vec;
use std::vec::Vec;
use tock_registers::LocalRegisterCopy;

/// Driver over a simulated board with test tunables
pub(crate) fn driver(board: SimBoard) -> SdDriver<SimBoard> {
    SdDriver::new(board, BounceBuffer::leaked(), Config::for_tests())
}

const PHYS_MEMORY_BASE: u32 = 0x8000_0000;
const PHYS_MSC_BASE: u32 = 0x1002_1000;
const MSC_CHANNELS: usize = 3;
const DMA_CHANNELS: usize = 6;

const STATE_IDLE: u32 = 0;
const STATE_READY: u32 = 1;
const STATE_IDENT: u32 = 2;
const STATE_STANDBY: u32 = 3;
const STATE_TRANSFER: u32 = 4;

// ============================================================================
// Card
// ============================================================================

#[derive(Debug)]
enum Reply {
    Silent,
    Short([u8; 5]),
    Long([u8; 17]),
}

/// A simulated SD card
#[derive(Debug, Clone)]
pub(crate) struct SimCard {
    blocks: u32,
    high_capacity: bool,
    high_speed: bool,
    broken_switch: bool,
    busy_polls: u32,
    status_on: Option<(u8, CardStatus)>,
    data: Vec<u8>,
    state: u32,
    app_cmd: bool,
    switched: bool,
}

impl SimCard {
    pub(crate) const RCA: u16 = 0xB368;

    fn new(blocks: u32, high_capacity: bool) -> Self {
        Self {
            blocks,
            high_capacity,
            high_speed: true,
            broken_switch: false,
            busy_polls: 0,
            status_on: None,
            data: vec![0; blocks as usize * BLOCK_SIZE],
            state: STATE_IDLE,
            app_cmd: false,
            switched: false,
        }
    }

    /// SDHC card; `blocks` must be a multiple of 1024
    pub(crate) fn high_capacity(blocks: u32) -> Self {
        Self::new(blocks, true)
    }

    /// Version 1.x standard-capacity card; `blocks` must be a multiple of 4
    pub(crate) fn legacy(blocks: u32) -> Self {
        Self::new(blocks, false)
    }

    pub(crate) fn with_high_speed(mut self, supported: bool) -> Self {
        self.high_speed = supported;
        self
    }

    /// CMD6 answers with an error status
    pub(crate) fn with_broken_switch(mut self) -> Self {
        self.broken_switch = true;
        self
    }

    /// Report busy for this many ACMD41 queries (`u32::MAX`: forever)
    pub(crate) fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Add status bits to every response to command `index`
    pub(crate) fn with_status_on(mut self, index: u8, status: CardStatus) -> Self {
        self.status_on = Some((index, status));
        self
    }

    pub(crate) fn cid(&self) -> [u32; 4] {
        let mut cid = [0u32; 4];
        insert_bits(&mut cid, 127, 8, 0x03);
        insert_bits(&mut cid, 119, 16, u16::from_be_bytes(*b"SD") as u32);
        for (i, c) in b"SIM01".iter().enumerate() {
            insert_bits(&mut cid, 103 - 8 * i as u32, 8, *c as u32);
        }
        insert_bits(&mut cid, 55, 32, 0x1234_5678);
        cid
    }

    fn csd(&self) -> [u32; 4] {
        let mut csd = [0u32; 4];
        insert_bits(&mut csd, 103, 8, 0x32);
        if self.high_capacity {
            insert_bits(&mut csd, 127, 2, 1);
            insert_bits(&mut csd, 69, 22, self.blocks / 1024 - 1);
        } else {
            insert_bits(&mut csd, 83, 4, 9);
            insert_bits(&mut csd, 73, 12, self.blocks / 4 - 1);
            insert_bits(&mut csd, 49, 3, 0);
        }
        csd
    }

    fn status(&self, index: u8) -> u32 {
        let mut status = self.state << 9;
        if self.state == STATE_TRANSFER {
            status |= CardStatus::READY_FOR_DATA.bits();
        }
        if self.app_cmd {
            status |= CardStatus::APP_CMD.bits();
        }
        if let Some((on, extra)) = self.status_on {
            if on == index {
                status |= extra.bits();
            }
        }
        status
    }

    fn r1(&self, index: u8) -> Reply {
        let s = self.status(index).to_be_bytes();
        Reply::Short([index, s[0], s[1], s[2], s[3]])
    }

    fn long(register: [u32; 4]) -> Reply {
        let mut bytes = [0u8; 17];
        bytes[0] = 0x3F;
        for (i, word) in register.iter().enumerate() {
            bytes[1 + 4 * i..5 + 4 * i].copy_from_slice(&word.to_be_bytes());
        }
        Reply::Long(bytes)
    }

    /// First block addressed by a data command, if the address is valid
    fn block_of(&self, arg: u32) -> Option<u32> {
        if self.high_capacity {
            Some(arg)
        } else if arg % BLOCK_SIZE as u32 == 0 {
            Some(arg / BLOCK_SIZE as u32)
        } else {
            None
        }
    }

    fn switch_status(&mut self, arg: u32) -> Vec<u8> {
        let mut status = vec![0u8; 64];
        status[13] = if self.high_speed { 0x03 } else { 0x01 };
        if arg & (1 << 31) != 0 && arg & 0xF == 1 && self.high_speed {
            self.switched = true;
        }
        status
    }
}

// ============================================================================
// Board State
// ============================================================================

#[derive(Debug)]
enum Stream {
    Read { data: Vec<u8>, pos: usize },
    Write { start: usize, data: Vec<u8>, expected: usize },
}

#[derive(Debug, Default)]
struct ChannelSim {
    regs: [u32; 16],
    stat: u32,
    ireg: u32,
    clock_running: bool,
    response: VecDeque<u16>,
    stream: Option<Stream>,
    clock_gate: bool,
}

#[derive(Debug, Default)]
struct SlotSim {
    card: Option<SimCard>,
    detect: bool,
    commands: Vec<(u8, u32)>,
    crc_fault: bool,
    open_transfer: bool,
    #[cfg(feature = "hotswap")]
    armed_detect: Option<CardChange>,
}

#[derive(Debug, Default)]
struct BoardState {
    channels: [ChannelSim; MSC_CHANNELS],
    slots: [SlotSim; SLOT_COUNT],
    dma: [[u32; 6]; DMA_CHANNELS],
    dma_enabled: [bool; DMA_CHANNELS],
    dma_memory: [usize; DMA_CHANNELS],
    stall_dma: bool,
    phys_map: Vec<usize>,
    clock_source: u32,
    led: bool,
    tick: Tick,
    msc_accesses: usize,
    violations: usize,
    #[cfg(feature = "hotswap")]
    armed_debounce: Vec<(Slot, Tick, u32)>,
}

/// A simulated board with two card sockets
#[derive(Debug, Default)]
pub(crate) struct SimBoard {
    state: Mutex<BoardState>,
}

fn slot_of(channel: MscChannel) -> Option<usize> {
    Slot::all()
        .iter()
        .position(|slot| slot.channel() == channel)
}

fn dma_index(reg: DmaReg) -> usize {
    match reg {
        DmaReg::Dsar => 0,
        DmaReg::Dtar => 1,
        DmaReg::Dtcr => 2,
        DmaReg::Drsr => 3,
        DmaReg::Dccsr => 4,
        DmaReg::Dcmd => 5,
    }
}

impl SimBoard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut BoardState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub(crate) fn with_card(self, slot: Slot, card: SimCard) -> Self {
        self.insert(slot, card);
        self
    }

    /// Put a card in and raise the detect line
    pub(crate) fn insert(&self, slot: Slot, card: SimCard) {
        self.with(|b| {
            let s = &mut b.slots[slot.index()];
            s.card = Some(card);
            s.detect = true;
        });
    }

    /// Pull the card out and drop the detect line
    pub(crate) fn remove(&self, slot: Slot) {
        self.with(|b| {
            let s = &mut b.slots[slot.index()];
            s.card = None;
            s.detect = false;
        });
    }

    pub(crate) fn set_detect(&self, slot: Slot, level: bool) {
        self.with(|b| b.slots[slot.index()].detect = level);
    }

    pub(crate) fn peek(&self, channel: MscChannel, reg: MscReg) -> u32 {
        self.with(|b| b.channels[channel.0 as usize].regs[reg.offset() as usize / 4])
    }

    pub(crate) fn dma_peek(&self, channel: DmaChannel, reg: DmaReg) -> u32 {
        self.with(|b| b.dma[channel.0 as usize][dma_index(reg)])
    }

    pub(crate) fn dma_enabled(&self, channel: DmaChannel) -> bool {
        self.with(|b| b.dma_enabled[channel.0 as usize])
    }

    /// CPU address of the memory side of the channel's last run
    pub(crate) fn last_dma_memory(&self, channel: DmaChannel) -> usize {
        self.with(|b| b.dma_memory[channel.0 as usize])
    }

    pub(crate) fn clock_source(&self) -> u32 {
        self.with(|b| b.clock_source)
    }

    pub(crate) fn led_on(&self) -> bool {
        self.with(|b| b.led)
    }

    pub(crate) fn controller_clock_on(&self, channel: MscChannel) -> bool {
        self.with(|b| b.channels[channel.0 as usize].clock_gate)
    }

    /// Fail the next command on the slot with a response CRC error
    pub(crate) fn inject_crc_error(&self, slot: Slot) {
        self.with(|b| b.slots[slot.index()].crc_fault = true);
    }

    /// Keep DMA channels from making progress
    pub(crate) fn stall_dma(&self, stall: bool) {
        self.with(|b| b.stall_dma = stall);
    }

    /// Every command the slot saw, as (index, argument)
    pub(crate) fn commands(&self, slot: Slot) -> Vec<(u8, u32)> {
        self.with(|b| b.slots[slot.index()].commands.clone())
    }

    pub(crate) fn clear_commands(&self, slot: Slot) {
        self.with(|b| b.slots[slot.index()].commands.clear());
    }

    pub(crate) fn card_switched_high_speed(&self, slot: Slot) -> bool {
        self.with(|b| b.slots[slot.index()].card.as_ref().is_some_and(|c| c.switched))
    }

    /// Contents of `count` blocks of the slot's card
    pub(crate) fn card_bytes(&self, slot: Slot, start: u32, count: usize) -> Vec<u8> {
        self.with(|b| {
            let card = b.slots[slot.index()].card.as_ref();
            let begin = start as usize * BLOCK_SIZE;
            card.map(|c| c.data[begin..begin + count * BLOCK_SIZE].to_vec())
                .unwrap_or_default()
        })
    }

    /// Controller register reads and writes so far
    pub(crate) fn msc_accesses(&self) -> usize {
        self.with(|b| b.msc_accesses)
    }

    /// Commands that arrived in the middle of another caller's transfer
    pub(crate) fn violations(&self) -> usize {
        self.with(|b| b.violations)
    }

    #[cfg(feature = "hotswap")]
    pub(crate) fn armed_debounce(&self) -> Vec<(Slot, Tick, u32)> {
        self.with(|b| b.armed_debounce.clone())
    }

    #[cfg(feature = "hotswap")]
    pub(crate) fn armed_detect(&self, slot: Slot) -> Option<CardChange> {
        self.with(|b| b.slots[slot.index()].armed_detect)
    }

    pub(crate) fn advance(&self, ticks: Tick) {
        self.with(|b| b.tick = b.tick.wrapping_add(ticks));
    }

    pub(crate) fn now(&self) -> Tick {
        self.with(|b| b.tick)
    }
}

// ============================================================================
// Controller Model
// ============================================================================

impl BoardState {
    fn strpcl(&mut self, ch: usize, value: u32) {
        let strpcl = LocalRegisterCopy::<u32, STRPCL::Register>::new(value);

        if strpcl.is_set(STRPCL::RESET) {
            let channel = &mut self.channels[ch];
            channel.stat = 0;
            channel.ireg = 0;
            channel.response.clear();
            channel.stream = None;
            channel.clock_running = false;
        }
        match strpcl.read_as_enum(STRPCL::CLOCK_CONTROL) {
            Some(STRPCL::CLOCK_CONTROL::Value::Stop) => self.channels[ch].clock_running = false,
            Some(STRPCL::CLOCK_CONTROL::Value::Start) => self.channels[ch].clock_running = true,
            None => {}
        }
        if strpcl.is_set(STRPCL::START_OP) {
            self.execute(ch);
        }
    }

    fn execute(&mut self, ch: usize) {
        let regs = self.channels[ch].regs;
        let index = regs[MscReg::Cmd.offset() as usize / 4] as u8;
        let arg = regs[MscReg::Arg.offset() as usize / 4];
        let block_len = regs[MscReg::Blklen.offset() as usize / 4] as usize;
        let blocks = regs[MscReg::Nob.offset() as usize / 4] as usize;

        let channel = &mut self.channels[ch];
        channel.response.clear();
        channel.stream = None;
        channel.stat = STAT::END_CMD_RES::SET.value;
        channel.ireg |= IREG::END_CMD_RES::SET.value;

        let Some(slot_idx) = slot_of(MscChannel(ch as u8)) else {
            channel.stat |= STAT::TIME_OUT_RES::SET.value;
            return;
        };
        let slot = &mut self.slots[slot_idx];
        slot.commands.push((index, arg));

        if slot.open_transfer && index != 12 {
            self.violations += 1;
        }
        if slot.crc_fault {
            slot.crc_fault = false;
            channel.stat |= STAT::CRC_RES_ERR::SET.value;
            return;
        }
        let Some(card) = slot.card.as_mut() else {
            channel.stat |= STAT::TIME_OUT_RES::SET.value;
            return;
        };

        let app = core::mem::take(&mut card.app_cmd);
        let mut stream = None;
        let reply = match (index, app) {
            (0, _) => {
                card.state = STATE_IDLE;
                card.switched = false;
                Reply::Silent
            }
            (8, _) if card.high_capacity => {
                let a = arg.to_be_bytes();
                Reply::Short([8, a[0], a[1], a[2], a[3]])
            }
            (55, _) => {
                card.app_cmd = true;
                card.r1(55)
            }
            (41, true) => {
                let mut ocr = 0x00FF_8000;
                if card.busy_polls == 0 {
                    ocr |= 1 << 31;
                    if card.high_capacity {
                        ocr |= 1 << 30;
                    }
                    card.state = STATE_READY;
                } else if card.busy_polls != u32::MAX {
                    card.busy_polls -= 1;
                }
                let o = u32::to_be_bytes(ocr);
                Reply::Short([0x3F, o[0], o[1], o[2], o[3]])
            }
            (2, _) if card.state != STATE_TRANSFER => {
                card.state = STATE_IDENT;
                SimCard::long(card.cid())
            }
            (3, _) if card.state == STATE_IDENT => {
                card.state = STATE_STANDBY;
                let rca = SimCard::RCA.to_be_bytes();
                let s = ((STATE_IDENT << 9) as u16).to_be_bytes();
                Reply::Short([3, rca[0], rca[1], s[0], s[1]])
            }
            (9, _) if card.state == STATE_STANDBY && arg >> 16 == SimCard::RCA as u32 => {
                SimCard::long(card.csd())
            }
            (7, _) if arg >> 16 == SimCard::RCA as u32 => {
                let reply = card.r1(7);
                card.state = STATE_TRANSFER;
                reply
            }
            (6, true) | (13, _) | (16, _) => card.r1(index),
            (6, false) if card.state == STATE_TRANSFER => {
                let data = card.switch_status(arg);
                stream = Some(Stream::Read { data, pos: 0 });
                if card.broken_switch {
                    let s = (card.status(6) | CardStatus::ILLEGAL_COMMAND.bits()).to_be_bytes();
                    Reply::Short([6, s[0], s[1], s[2], s[3]])
                } else {
                    card.r1(6)
                }
            }
            (18, _) | (25, _) => {
                let len = blocks * block_len;
                let mut reply = card.r1(index);
                let start = card
                    .block_of(arg)
                    .filter(|&b| b as usize + blocks <= card.blocks as usize)
                    .map(|b| b as usize * BLOCK_SIZE);
                if start.is_none() {
                    let s = (card.status(index) | CardStatus::OUT_OF_RANGE.bits()).to_be_bytes();
                    reply = Reply::Short([index, s[0], s[1], s[2], s[3]]);
                }
                stream = Some(match (index, start) {
                    (18, Some(start)) => Stream::Read {
                        data: card.data[start..start + len].to_vec(),
                        pos: 0,
                    },
                    (18, None) => Stream::Read {
                        data: vec![0; len],
                        pos: 0,
                    },
                    (_, start) => Stream::Write {
                        start: start.unwrap_or(usize::MAX),
                        data: Vec::new(),
                        expected: len,
                    },
                });
                slot.open_transfer = true;
                reply
            }
            (12, _) => {
                slot.open_transfer = false;
                channel.ireg |= IREG::PRG_DONE::SET.value;
                channel.stat |= STAT::PRG_DONE::SET.value;
                card.r1(12)
            }
            _ => Reply::Silent,
        };

        match reply {
            Reply::Silent => {
                if index != 0 {
                    channel.stat |= STAT::TIME_OUT_RES::SET.value;
                }
            }
            Reply::Short(b) => {
                channel.response.extend([
                    u16::from_be_bytes([b[0], b[1]]),
                    u16::from_be_bytes([b[2], b[3]]),
                    b[4] as u16,
                ]);
            }
            Reply::Long(b) => {
                for pair in b[..16].chunks(2) {
                    channel.response.push_back(u16::from_be_bytes([pair[0], pair[1]]));
                }
            }
        }
        channel.stream = stream;
    }

    fn msc_read(&mut self, ch: usize, reg: MscReg) -> u32 {
        let channel = &mut self.channels[ch];
        match reg {
            MscReg::Stat => {
                let mut stat = channel.stat;
                if channel.clock_running {
                    stat |= STAT::CLK_EN::SET.value;
                }
                stat
            }
            MscReg::Ireg => channel.ireg,
            MscReg::Res => channel.response.pop_front().unwrap_or(0) as u32,
            other => channel.regs[other.offset() as usize / 4],
        }
    }

    fn msc_write(&mut self, ch: usize, reg: MscReg, value: u32) {
        match reg {
            MscReg::Strpcl => self.strpcl(ch, value),
            MscReg::Ireg => self.channels[ch].ireg &= !value,
            other => self.channels[ch].regs[other.offset() as usize / 4] = value,
        }
    }

    // ========================================================================
    // DMA Model
    // ========================================================================

    fn unmap(&self, phys: u32) -> Option<usize> {
        let index = phys.checked_sub(PHYS_MEMORY_BASE)? as usize >> 2;
        self.phys_map.get(index).copied()
    }

    fn run_dma(&mut self, dch: usize) {
        let [src, dst, words, request, _, _] = self.dma[dch];
        let len = words as usize * 4;

        let (msc, receive) = match request {
            r if r == RequestSource::Msc0In as u32 => (0, true),
            r if r == RequestSource::Msc0Out as u32 => (0, false),
            r if r == RequestSource::Msc1In as u32 => (1, true),
            r if r == RequestSource::Msc1Out as u32 => (1, false),
            r if r == RequestSource::Msc2In as u32 => (2, true),
            r if r == RequestSource::Msc2Out as u32 => (2, false),
            _ => return self.dma_fault(dch),
        };
        let fifo_reg = if receive { MscReg::RxFifo } else { MscReg::TxFifo };
        let fifo = PHYS_MSC_BASE + msc as u32 * 0x1000 + fifo_reg.offset();
        let memory = if receive { dst } else { src };
        let fifo_side = if receive { src } else { dst };
        let Some(addr) = self.unmap(memory).filter(|_| fifo_side == fifo) else {
            return self.dma_fault(dch);
        };
        self.dma_memory[dch] = addr;

        let channel = &mut self.channels[msc];
        let progress = match (&mut channel.stream, receive) {
            (Some(Stream::Read { data, pos }), true) if *pos + len <= data.len().next_multiple_of(4) => {
                let take = len.min(data.len() - *pos);
                // SAFETY: the driver holds the buffer behind `addr` for the
                // duration of the run and it is at least `len` bytes long
                unsafe { core::ptr::copy_nonoverlapping(data[*pos..].as_ptr(), addr as *mut u8, take) };
                *pos += take;
                Some(*pos == data.len())
            }
            (Some(Stream::Write { data, expected, .. }), false) if data.len() + len <= *expected => {
                // SAFETY: as above, for a buffer the driver only reads
                let src = unsafe { core::slice::from_raw_parts(addr as *const u8, len) };
                data.extend_from_slice(src);
                Some(data.len() == *expected)
            }
            _ => None,
        };
        let Some(finished) = progress else {
            return self.dma_fault(dch);
        };

        let channel = &mut self.channels[msc];
        if finished {
            match channel.stream.take() {
                Some(Stream::Write { start, data, .. }) => {
                    if let Some(card) = self.slots[slot_of(MscChannel(msc as u8)).unwrap_or(0)].card.as_mut() {
                        if let Some(dest) = card.data.get_mut(start..start.saturating_add(data.len())) {
                            dest.copy_from_slice(&data);
                        }
                    }
                    channel.ireg |= (IREG::DATA_TRAN_DONE::SET + IREG::PRG_DONE::SET).value;
                }
                _ => channel.ireg |= IREG::DATA_TRAN_DONE::SET.value,
            }
            channel.stat |= STAT::DATA_TRAN_DONE::SET.value;
        }

        self.dma[dch][dma_index(DmaReg::Dtcr)] = 0;
        self.dma[dch][dma_index(DmaReg::Dccsr)] |= DCCSR::TT::SET.value;
    }

    fn dma_fault(&mut self, dch: usize) {
        self.dma[dch][dma_index(DmaReg::Dccsr)] |= (DCCSR::AR::SET + DCCSR::HLT::SET).value;
        self.dma[dch][dma_index(DmaReg::Dtcr)] = 0;
    }
}

impl Clock for SimBoard {
    fn current_tick(&self) -> Tick {
        self.now()
    }

    fn sleep(&self, ticks: Tick) {
        self.advance(ticks);
    }
}

impl Platform for SimBoard {
    fn msc_read(&self, channel: MscChannel, reg: MscReg) -> u32 {
        self.with(|b| {
            b.msc_accesses += 1;
            b.msc_read(channel.0 as usize, reg)
        })
    }

    fn msc_write(&self, channel: MscChannel, reg: MscReg, value: u32) {
        self.with(|b| {
            b.msc_accesses += 1;
            b.msc_write(channel.0 as usize, reg, value)
        })
    }

    fn msc_phys_base(&self, channel: MscChannel) -> u32 {
        PHYS_MSC_BASE + channel.0 as u32 * 0x1000
    }

    fn dma_read(&self, channel: DmaChannel, reg: DmaReg) -> u32 {
        self.dma_peek(channel, reg)
    }

    fn dma_write(&self, channel: DmaChannel, reg: DmaReg, value: u32) {
        self.with(|b| {
            let dch = channel.0 as usize;
            b.dma[dch][dma_index(reg)] = value;
            if reg == DmaReg::Dccsr && value & DCCSR::EN::SET.value != 0 && !b.stall_dma {
                b.run_dma(dch);
            }
        })
    }

    fn dma_enable(&self, channel: DmaChannel) {
        self.with(|b| b.dma_enabled[channel.0 as usize] = true);
    }

    fn phys_addr(&self, addr: usize) -> u32 {
        self.with(|b| {
            let index = match b.phys_map.iter().position(|&a| a == addr) {
                Some(index) => index,
                None => {
                    b.phys_map.push(addr);
                    b.phys_map.len() - 1
                }
            };
            PHYS_MEMORY_BASE + (index as u32) * 4
        })
    }

    fn cache_writeback_invalidate(&self, _addr: usize, _len: usize) {}

    fn set_controller_clock(&self, channel: MscChannel, on: bool) {
        self.with(|b| b.channels[channel.0 as usize].clock_gate = on);
    }

    fn set_clock_source(&self, rate_hz: u32) {
        self.with(|b| b.clock_source = rate_hz);
    }

    fn set_activity_led(&self, on: bool) {
        self.with(|b| b.led = on);
    }

    fn card_detect(&self, slot: Slot) -> bool {
        self.with(|b| b.slots[slot.index()].detect)
    }

    #[cfg(feature = "hotswap")]
    fn arm_card_detect(&self, slot: Slot, next: CardChange) {
        self.with(|b| b.slots[slot.index()].armed_detect = Some(next));
    }

    #[cfg(feature = "hotswap")]
    fn arm_debounce(&self, slot: Slot, ticks: Tick, token: u32) {
        self.with(|b| b.armed_debounce.push((slot, ticks, token)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reply_is_packed_into_three_halfwords() {
        let board = SimBoard::new().with_card(Slot::FIRST, SimCard::high_capacity(1024));
        let ch = Slot::FIRST.channel();
        board.msc_write(ch, MscReg::Cmd, 8);
        board.msc_write(ch, MscReg::Arg, 0x1AA);
        board.msc_write(ch, MscReg::Strpcl, (STRPCL::CLOCK_CONTROL::Start + STRPCL::START_OP::SET).value);

        assert_ne!(board.msc_read(ch, MscReg::Stat) & STAT::END_CMD_RES::SET.value, 0);
        assert_eq!(board.msc_read(ch, MscReg::Res), 0x0800);
        assert_eq!(board.msc_read(ch, MscReg::Res), 0x0001);
        assert_eq!(board.msc_read(ch, MscReg::Res), 0x00AA);
    }

    #[test]
    fn ireg_is_write_one_to_clear() {
        let board = SimBoard::new();
        let ch = MscChannel(1);
        board.msc_write(ch, MscReg::Strpcl, (STRPCL::CLOCK_CONTROL::Start + STRPCL::START_OP::SET).value);
        assert_ne!(board.msc_read(ch, MscReg::Ireg), 0);
        board.msc_write(ch, MscReg::Ireg, 0xFFFF);
        assert_eq!(board.msc_read(ch, MscReg::Ireg), 0);
    }
}
