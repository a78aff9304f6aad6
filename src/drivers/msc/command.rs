//! SD command set and the command executor

use super::SdError;
use super::gateway::SlotHost;
use super::platform::Platform;
use super::regs::{CMDAT, IREG, IREG_CLEAR_ALL, MscReg, STAT};
use crate::time::{PollBudget, poll_until};
use tock_registers::LocalRegisterCopy;

/// Raw response buffer size
pub const RESPONSE_LEN: usize = 18;

/// ACMD6 argument selecting the 4-bit bus
pub const BUS_WIDTH_4BIT: u32 = 2;

/// Interrupts left unmasked while a command runs
const IMASK_COMMAND: u32 = !(IREG::DATA_TRAN_DONE::SET.value
    | IREG::PRG_DONE::SET.value
    | IREG::END_CMD_RES::SET.value);

/// Commands the driver issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Controller reset followed by GO_IDLE with the initialization clocks
    ControllerReset,
    /// CMD0
    GoIdleState,
    /// CMD2
    AllSendCid,
    /// CMD3
    SendRelativeAddr,
    /// CMD6
    SwitchFunc,
    /// CMD7
    SelectCard,
    /// CMD8
    SendIfCond,
    /// CMD9
    SendCsd,
    /// CMD12
    StopTransmission,
    /// CMD13
    SendStatus,
    /// CMD16
    SetBlocklen,
    /// CMD18
    ReadMultipleBlock,
    /// CMD25
    WriteMultipleBlock,
    /// ACMD6
    AppSetBusWidth,
    /// ACMD41
    AppSendOpCond,
    /// CMD55
    AppCmd,
}

/// What a command does on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Controller reset plus broadcast
    Reset,
    /// Broadcast or addressed command without data
    Control,
    /// Card to host data phase
    ReadData,
    /// Host to card data phase
    WriteData,
    /// Ends an open multi-block transfer
    StopTransfer,
}

impl Command {
    /// Index sent on the wire
    pub const fn index(self) -> u8 {
        match self {
            Command::ControllerReset | Command::GoIdleState => 0,
            Command::AllSendCid => 2,
            Command::SendRelativeAddr => 3,
            Command::SwitchFunc | Command::AppSetBusWidth => 6,
            Command::SelectCard => 7,
            Command::SendIfCond => 8,
            Command::SendCsd => 9,
            Command::StopTransmission => 12,
            Command::SendStatus => 13,
            Command::SetBlocklen => 16,
            Command::ReadMultipleBlock => 18,
            Command::WriteMultipleBlock => 25,
            Command::AppSendOpCond => 41,
            Command::AppCmd => 55,
        }
    }

    pub const fn class(self) -> CommandClass {
        match self {
            Command::ControllerReset => CommandClass::Reset,
            Command::SwitchFunc | Command::ReadMultipleBlock => CommandClass::ReadData,
            Command::WriteMultipleBlock => CommandClass::WriteData,
            Command::StopTransmission => CommandClass::StopTransfer,
            _ => CommandClass::Control,
        }
    }
}

/// Expected response format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None,
    R1,
    /// R1 followed by busy signalling on DAT0
    R1b,
    R2,
    R3,
    R6,
}

impl ResponseKind {
    fn format(self) -> tock_registers::fields::FieldValue<u32, CMDAT::Register> {
        match self {
            ResponseKind::None => CMDAT::RESPONSE_FORMAT::NoResponse,
            ResponseKind::R1 => CMDAT::RESPONSE_FORMAT::R1,
            ResponseKind::R1b => CMDAT::RESPONSE_FORMAT::R1 + CMDAT::BUSY::SET,
            ResponseKind::R2 => CMDAT::RESPONSE_FORMAT::R2,
            ResponseKind::R3 => CMDAT::RESPONSE_FORMAT::R3,
            ResponseKind::R6 => CMDAT::RESPONSE_FORMAT::R6,
        }
    }

    fn halfwords(self) -> usize {
        match self {
            ResponseKind::None => 0,
            ResponseKind::R2 => 8,
            _ => 3,
        }
    }
}

/// Caller memory for a command's data phase
#[derive(Debug)]
pub enum DataBuffer<'b> {
    None,
    Read(&'b mut [u8]),
    Write(&'b [u8]),
}

impl DataBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            DataBuffer::None => 0,
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One command in flight
#[derive(Debug)]
pub struct CommandRequest<'b> {
    pub slot: super::platform::Slot,
    pub command: Command,
    pub arg: u32,
    pub response_kind: ResponseKind,
    pub block_count: u16,
    pub block_len: u16,
    pub data: DataBuffer<'b>,
    pub response: [u8; RESPONSE_LEN],
    /// `Err(NoResponse)` until a response has been captured
    pub result: Result<(), SdError>,
}

impl<'b> CommandRequest<'b> {
    pub fn new(
        slot: super::platform::Slot,
        command: Command,
        arg: u32,
        response_kind: ResponseKind,
    ) -> Self {
        Self {
            slot,
            command,
            arg,
            response_kind,
            block_count: 0,
            block_len: 0,
            data: DataBuffer::None,
            response: [0; RESPONSE_LEN],
            result: Err(SdError::NoResponse),
        }
    }

    /// Attach a data phase of `block_count` blocks of `block_len` bytes
    pub fn with_data(mut self, block_count: u16, block_len: u16, data: DataBuffer<'b>) -> Self {
        self.block_count = block_count;
        self.block_len = block_len;
        self.data = data;
        self
    }

    /// Bytes moved by the data phase
    pub fn transfer_len(&self) -> usize {
        self.block_count as usize * self.block_len as usize
    }
}

// ============================================================================
// Command Execution
// ============================================================================

impl<P: Platform> SlotHost<'_, P> {
    /// Execute one command, including its data phase
    ///
    /// Any failure is also recorded in `req.result`, so decoding the request
    /// afterwards reports the same error.
    pub(crate) fn exec(&mut self, req: &mut CommandRequest<'_>) -> Result<(), SdError> {
        req.result = Err(SdError::NoResponse);
        let outcome = self.exec_inner(req);
        if let Err(err) = outcome {
            req.result = Err(err);
        }
        outcome
    }

    fn exec_inner(&mut self, req: &mut CommandRequest<'_>) -> Result<(), SdError> {
        let class = req.command.class();

        if class == CommandClass::Reset {
            self.state.flags.wide_bus = false;
            self.reset_controller()?;
            self.set_clock(super::gateway::CLOCK_SLOW)?;
            self.stop_clock()?;
        }
        if req.command == Command::AppSetBusWidth {
            self.state.flags.wide_bus = req.arg == BUS_WIDTH_4BIT;
            log::debug!(
                "MSC{}: {}-bit bus",
                self.channel().0,
                if self.state.flags.wide_bus { 4 } else { 1 }
            );
        }

        self.stop_clock()?;
        self.write_reg(MscReg::Ireg, IREG_CLEAR_ALL);
        self.write_reg(MscReg::Imask, IMASK_COMMAND);

        let cmdat = self.compose_cmdat(req);
        self.write_reg(MscReg::Cmd, req.command.index() as u32);
        self.write_reg(MscReg::Arg, req.arg);
        self.write_reg(MscReg::Blklen, req.block_len as u32);
        self.write_reg(MscReg::Nob, req.block_count as u32);
        self.write_reg(MscReg::Cmdat, cmdat.get());

        log::debug!(
            "MSC{}: CMD{} arg={:#010x} cmdat={:#x}",
            self.channel().0,
            req.command.index(),
            req.arg,
            cmdat.get()
        );

        self.start_clock();

        let budget = PollBudget::Polls(self.config.command_poll_limit);
        if !poll_until(self.platform, budget, || self.status().is_set(STAT::END_CMD_RES)) {
            log::warn!("MSC{}: CMD{} never completed", self.channel().0, req.command.index());
            return Err(SdError::Timeout);
        }
        self.write_reg(MscReg::Ireg, IREG::END_CMD_RES::SET.value);

        self.check_status()?;

        if req.response_kind == ResponseKind::None {
            return Ok(());
        }

        self.read_response(req);
        req.result = Ok(());

        self.data_phase(req)
    }

    fn compose_cmdat(&self, req: &CommandRequest<'_>) -> LocalRegisterCopy<u32, CMDAT::Register> {
        let mut cmdat = LocalRegisterCopy::<u32, CMDAT::Register>::new(0);

        if self.state.flags.wide_bus {
            cmdat.modify(CMDAT::BUS_WIDTH::FourBit);
        }
        match req.command.class() {
            CommandClass::Reset => cmdat.modify(CMDAT::INIT::SET),
            CommandClass::ReadData => cmdat.modify(CMDAT::DATA_EN::SET + CMDAT::DMA_EN::SET),
            CommandClass::WriteData => {
                cmdat.modify(CMDAT::DATA_EN::SET + CMDAT::WRITE::SET + CMDAT::DMA_EN::SET)
            }
            CommandClass::Control | CommandClass::StopTransfer => {}
        }
        cmdat.modify(req.response_kind.format());
        cmdat
    }

    /// Classify the status register after end-of-command
    fn check_status(&self) -> Result<(), SdError> {
        let stat = self.status();

        if stat.is_set(STAT::TIME_OUT_RES) {
            return Err(SdError::Timeout);
        }
        if stat.is_set(STAT::TIME_OUT_READ) {
            return Err(SdError::DataTimeout);
        }
        if stat.read(STAT::CRC_WRITE_ERROR) != 0
            || stat.is_set(STAT::CRC_READ_ERROR)
            || stat.is_set(STAT::CRC_RES_ERR)
        {
            log::warn!("MSC{}: CRC error (STAT={:#x})", self.channel().0, stat.get());
            return Err(SdError::Crc);
        }
        Ok(())
    }

    /// Drain the response FIFO into the raw buffer
    ///
    /// Short responses arrive as three half-words, the last carrying only
    /// its low byte. Long responses arrive as eight full half-words.
    fn read_response(&self, req: &mut CommandRequest<'_>) {
        let halfwords = req.response_kind.halfwords();
        let mut bytes = req.response.iter_mut();

        for i in 0..halfwords {
            let data = self.read_reg(MscReg::Res) as u16;
            let short_tail = halfwords == 3 && i == 2;
            if !short_tail {
                if let Some(b) = bytes.next() {
                    *b = (data >> 8) as u8;
                }
            }
            if let Some(b) = bytes.next() {
                *b = data as u8;
            }
        }
    }

    fn data_phase(&mut self, req: &mut CommandRequest<'_>) -> Result<(), SdError> {
        let class = req.command.class();
        let len = req.transfer_len();
        let channel = self.channel();

        match class {
            CommandClass::ReadData => {
                let DataBuffer::Read(buf) = &mut req.data else {
                    return Err(SdError::InvalidRequest);
                };
                let buf = buf.get_mut(..len).ok_or(SdError::InvalidRequest)?;
                self.dma.receive(self.platform, self.slot, buf, self.config.data_wait)?;
            }
            CommandClass::WriteData => {
                let DataBuffer::Write(buf) = &req.data else {
                    return Err(SdError::InvalidRequest);
                };
                let buf = buf.get(..len).ok_or(SdError::InvalidRequest)?;
                self.dma.transmit(self.platform, self.slot, buf, self.config.data_wait)?;
            }
            _ => {}
        }

        if matches!(class, CommandClass::ReadData | CommandClass::WriteData) {
            self.wait_irq(IREG::DATA_TRAN_DONE::SET.value).map_err(|e| {
                log::warn!("MSC{}: data phase of CMD{} stalled", channel.0, req.command.index());
                e
            })?;
        }
        if matches!(class, CommandClass::WriteData | CommandClass::StopTransfer) {
            self.wait_irq(IREG::PRG_DONE::SET.value)?;
        }
        Ok(())
    }

    /// Wait for an interrupt flag, then acknowledge it
    fn wait_irq(&self, flag: u32) -> Result<(), SdError> {
        if !poll_until(self.platform, self.config.data_wait, || {
            self.read_reg(MscReg::Ireg) & flag != 0
        }) {
            return Err(SdError::DataTimeout);
        }
        self.write_reg(MscReg::Ireg, flag);
        Ok(())
    }
}
