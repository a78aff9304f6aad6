//! Card identification and selection
//!
//! Identification is an explicit state machine. Each [`SlotHost::step`]
//! consumes the response to the command the previous step issued, decides
//! the next state from that state plus the decoded response, and issues at
//! most one new command. Once a card reaches [`InitState::Ready`] it is
//! selected: high-speed switching for high-capacity cards, then the 4-bit
//! bus.

use super::SdError;
use super::card::CardVersion;
use super::command::{BUS_WIDTH_4BIT, Command, CommandRequest, DataBuffer, ResponseKind};
use super::gateway::{CLOCK_FAST, CLOCK_HIGH, SlotHost};
use super::platform::Platform;
use super::response::{decode_r1, decode_r2, decode_r3, decode_r6};

/// CMD8 argument: 2.7-3.6 V, check pattern 0xAA
const IF_COND_ARG: u32 = 0x1AA;
/// ACMD41 argument: high capacity supported, 3.2-3.4 V window
const OP_COND_ARG: u32 = 0x4030_0000;
/// OCR bit set once the card has finished powering up
const OCR_POWERED_UP: u32 = 1 << 31;

/// ACMD41 queries before identification restarts from GO_IDLE
const MAX_OP_COND_ATTEMPTS: u8 = 100;
/// High-speed capability checks per identification
const MAX_SWITCH_PROBES: u8 = 2;

/// CMD6 returns a 512-bit status block
const SWITCH_STATUS_LEN: usize = 64;
/// Function group 1 (access mode) sits in the lowest argument nibble
const ACCESS_MODE_GROUP: u32 = 0;
/// Access mode function 1: high speed
const HIGH_SPEED_FUNCTION: u32 = 1;

/// CMD6 operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    /// Query support without changing anything
    Check = 0,
    /// Switch to the function
    Set = 1,
}

/// CMD6 argument selecting `function` in `group`, leaving other groups unchanged
pub fn switch_arg(mode: SwitchMode, group: u32, function: u32) -> u32 {
    let shift = group * 4;
    let arg = ((mode as u32) << 31) | 0x00FF_FFFF;
    (arg & !(0xF << shift)) | ((function & 0xF) << shift)
}

/// Which half of the ACMD41 exchange was sent last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageStep {
    /// CMD55 prefix
    AppPrefix,
    /// ACMD41 query
    OpCond,
}

/// Identification progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// GO_IDLE sent
    Idle,
    /// CMD8 sent
    CheckInterface,
    /// Negotiating the operating voltage
    NegotiateVoltage { attempts: u8, awaiting: VoltageStep },
    /// CMD2 sent
    ReadCid,
    /// CMD3 sent
    AssignAddress,
    /// CMD9 sent
    ReadCsd,
    Ready,
    Failed,
}

impl InitState {
    /// Command whose response this state consumes
    fn consumes(self) -> Option<Command> {
        match self {
            InitState::Idle => Some(Command::GoIdleState),
            InitState::CheckInterface => Some(Command::SendIfCond),
            InitState::NegotiateVoltage {
                awaiting: VoltageStep::AppPrefix,
                ..
            } => Some(Command::AppCmd),
            InitState::NegotiateVoltage {
                awaiting: VoltageStep::OpCond,
                ..
            } => Some(Command::AppSendOpCond),
            InitState::ReadCid => Some(Command::AllSendCid),
            InitState::AssignAddress => Some(Command::SendRelativeAddr),
            InitState::ReadCsd => Some(Command::SendCsd),
            InitState::Ready | InitState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InitState::Ready | InitState::Failed)
    }
}

impl<P: Platform> SlotHost<'_, P> {
    /// Replace `req` with a fresh command and execute it
    ///
    /// Failures are left in `req.result` for the next step to decode.
    fn issue(&mut self, req: &mut CommandRequest<'static>, command: Command, arg: u32, kind: ResponseKind) {
        *req = CommandRequest::new(self.slot, command, arg, kind);
        let _ = self.exec(req);
    }

    /// Advance identification by one command
    pub(crate) fn step(&mut self, state: InitState, req: &mut CommandRequest<'static>) -> InitState {
        if state.consumes() != Some(req.command) {
            log::error!(
                "MSC{}: identification in {:?} got response to {:?}",
                self.channel().0,
                state,
                req.command
            );
            return InitState::Failed;
        }

        match state {
            InitState::Idle => {
                self.issue(req, Command::SendIfCond, IF_COND_ARG, ResponseKind::R1);
                InitState::CheckInterface
            }

            InitState::CheckInterface => {
                // Version 1.x cards do not answer CMD8; carry on regardless
                let _ = decode_r1(req);
                self.issue(req, Command::AppCmd, 0, ResponseKind::R1);
                InitState::NegotiateVoltage {
                    attempts: 0,
                    awaiting: VoltageStep::AppPrefix,
                }
            }

            InitState::NegotiateVoltage {
                attempts,
                awaiting: VoltageStep::AppPrefix,
            } => {
                let _ = decode_r1(req);
                if attempts < MAX_OP_COND_ATTEMPTS {
                    self.issue(req, Command::AppSendOpCond, OP_COND_ARG, ResponseKind::R3);
                    InitState::NegotiateVoltage {
                        attempts: attempts + 1,
                        awaiting: VoltageStep::OpCond,
                    }
                } else {
                    log::warn!(
                        "MSC{}: card still busy after {} ACMD41, restarting",
                        self.channel().0,
                        attempts
                    );
                    self.issue(req, Command::GoIdleState, 0, ResponseKind::None);
                    InitState::Idle
                }
            }

            InitState::NegotiateVoltage {
                attempts,
                awaiting: VoltageStep::OpCond,
            } => {
                let ocr = match decode_r3(req) {
                    Ok(r3) => r3.ocr,
                    Err(e) => {
                        log::warn!("MSC{}: ACMD41 failed: {:?}", self.channel().0, e);
                        return InitState::Failed;
                    }
                };
                self.state.card.ocr = ocr;

                if ocr & OCR_POWERED_UP == 0 {
                    self.platform.sleep(self.config.op_cond_retry_ticks);
                    self.issue(req, Command::AppCmd, 0, ResponseKind::R1);
                    InitState::NegotiateVoltage {
                        attempts,
                        awaiting: VoltageStep::AppPrefix,
                    }
                } else {
                    self.state.flags.wide_bus = true;
                    self.issue(req, Command::AllSendCid, 0, ResponseKind::R2);
                    InitState::ReadCid
                }
            }

            InitState::ReadCid => match decode_r2(req) {
                Ok(cid) => {
                    self.state.card.cid = cid;
                    log::debug!(
                        "MSC{}: CID {:08x}{:08x}{:08x}{:08x}",
                        self.channel().0,
                        cid[0],
                        cid[1],
                        cid[2],
                        cid[3]
                    );
                    self.issue(req, Command::SendRelativeAddr, 0, ResponseKind::R6);
                    InitState::AssignAddress
                }
                Err(e) => {
                    log::warn!("MSC{}: CMD2 failed: {:?}", self.channel().0, e);
                    InitState::Failed
                }
            },

            InitState::AssignAddress => match decode_r6(req) {
                Ok(r6) => {
                    let rca = (r6.rca as u32) << 16;
                    self.state.card.rca = rca;
                    log::debug!("MSC{}: RCA {:#06x}", self.channel().0, r6.rca);
                    self.issue(req, Command::SendCsd, rca, ResponseKind::R2);
                    InitState::ReadCsd
                }
                Err(e) => {
                    log::warn!("MSC{}: CMD3 failed: {:?}", self.channel().0, e);
                    InitState::Failed
                }
            },

            InitState::ReadCsd => {
                let csd = match decode_r2(req) {
                    Ok(csd) => csd,
                    Err(e) => {
                        log::warn!("MSC{}: CMD9 failed: {:?}", self.channel().0, e);
                        return InitState::Failed;
                    }
                };
                let card = &mut self.state.card;
                card.csd = csd;
                card.apply_csd();
                self.state.flags.high_capacity = card.version == CardVersion::HighCapacity;

                match self.set_clock(CLOCK_FAST) {
                    Ok(()) => InitState::Ready,
                    Err(_) => InitState::Failed,
                }
            }

            InitState::Ready | InitState::Failed => state,
        }
    }

    /// Identify and select the card, leaving it ready for data transfers
    pub(crate) fn identify(&mut self) -> Result<(), SdError> {
        self.state.reset();
        self.hardware_init()?;

        let mut req = CommandRequest::new(self.slot, Command::ControllerReset, 0, ResponseKind::None);
        self.issue(&mut req, Command::ControllerReset, 0, ResponseKind::None);
        self.issue(&mut req, Command::GoIdleState, 0, ResponseKind::None);
        self.platform.sleep(self.config.init_settle_ticks);

        let mut state = InitState::Idle;
        for _ in 0..self.config.init_step_limit {
            state = self.step(state, &mut req);
            if state.is_terminal() {
                break;
            }
        }
        if state != InitState::Ready {
            log::warn!("MSC{}: card identification failed ({:?})", self.channel().0, state);
            return Err(SdError::InitFailed);
        }

        self.select_card()?;

        let card = &self.state.card;
        let name = card.product_name();
        log::info!(
            "MSC{}: {} card {} \"{}\", {} blocks ({} MiB)",
            self.channel().0,
            match card.version {
                CardVersion::HighCapacity => "SDHC",
                CardVersion::Legacy => "SD",
            },
            card.manufacturer_id(),
            core::str::from_utf8(&name).unwrap_or("?"),
            card.block_count,
            card.capacity_bytes() >> 20
        );
        Ok(())
    }

    /// Select the card, switch to high speed if supported and widen the bus
    fn select_card(&mut self) -> Result<(), SdError> {
        let rca = self.state.card.rca;

        let mut req = CommandRequest::new(self.slot, Command::SelectCard, rca, ResponseKind::R1b);
        self.exec(&mut req)?;
        decode_r1(&req)?;

        if self.state.flags.high_capacity && self.probe_high_speed() {
            self.switch_function(SwitchMode::Set, ACCESS_MODE_GROUP, HIGH_SPEED_FUNCTION)?;
            self.set_clock(CLOCK_HIGH)?;
            log::debug!("MSC{}: high speed enabled", self.channel().0);
        }

        let mut req = CommandRequest::new(self.slot, Command::AppCmd, rca, ResponseKind::R1);
        self.exec(&mut req)?;
        decode_r1(&req)?;

        let mut req =
            CommandRequest::new(self.slot, Command::AppSetBusWidth, BUS_WIDTH_4BIT, ResponseKind::R1);
        self.exec(&mut req)?;
        decode_r1(&req)?;

        self.state.card.initialized = true;
        Ok(())
    }

    /// Ask whether the card supports high speed, within the probe budget
    fn probe_high_speed(&mut self) -> bool {
        while self.state.flags.switch_probes < MAX_SWITCH_PROBES {
            self.state.flags.switch_probes += 1;
            match self.switch_function(SwitchMode::Check, ACCESS_MODE_GROUP, HIGH_SPEED_FUNCTION) {
                Ok(status) => return status[13] & 0x02 != 0,
                Err(e) => log::warn!("MSC{}: switch check failed: {:?}", self.channel().0, e),
            }
        }
        false
    }

    /// Issue CMD6 and return its status block
    fn switch_function(
        &mut self,
        mode: SwitchMode,
        group: u32,
        function: u32,
    ) -> Result<[u8; SWITCH_STATUS_LEN], SdError> {
        let mut status = [0u8; SWITCH_STATUS_LEN];
        {
            let arg = switch_arg(mode, group, function);
            let mut req = CommandRequest::new(self.slot, Command::SwitchFunc, arg, ResponseKind::R1)
                .with_data(1, SWITCH_STATUS_LEN as u16, DataBuffer::Read(&mut status));
            self.exec(&mut req)?;
            decode_r1(&req)?;
        }
        Ok(status)
    }
}
