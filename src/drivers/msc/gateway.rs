//! Controller clock, reset and interrupt plumbing
//!
//! [`SlotHost`] bundles everything one operation on a slot needs: the board,
//! the shared DMA engine, the tunables and the slot's locked state. Its
//! methods are split across this module (register access, clocks, reset),
//! `command` (command execution) and `init` (card identification).

use super::card::SlotState;
use super::dma::DmaEngine;
use super::platform::{MscChannel, Platform, Slot};
use super::regs::{CLKRT, IMASK_ALL, IREG_CLEAR_ALL, MscReg, STAT, STRPCL};
use super::{Config, SdError};
use crate::time::{PollBudget, poll_until};
use tock_registers::LocalRegisterCopy;

/// Identification-mode bus clock
pub const CLOCK_SLOW: u32 = 400_000;
/// Default-speed bus clock
pub const CLOCK_FAST: u32 = 24_000_000;
/// High-speed bus clock
pub const CLOCK_HIGH: u32 = 48_000_000;

/// Response timeout, in bus clocks
const RESPONSE_TIMEOUT: u32 = 0xFF;
/// Read data timeout, in bus clocks
const READ_TIMEOUT: u32 = 0xFFFF;

const CLOCK_STOP_POLLS: u32 = 1000;
const RESET_POLLS: u32 = 1000;

/// CLKRT value dividing `source_hz` down to no more than `rate_hz`
pub fn clock_divider(source_hz: u32, rate_hz: u32) -> u32 {
    let mut clkrt = 0;
    let mut clk = source_hz;
    while rate_hz < clk && clkrt < 7 {
        clkrt += 1;
        clk >>= 1;
    }
    clkrt
}

/// Context for one operation on one slot
pub(crate) struct SlotHost<'a, P: Platform> {
    pub(crate) platform: &'a P,
    pub(crate) dma: &'a DmaEngine,
    pub(crate) config: &'a Config,
    pub(crate) slot: Slot,
    pub(crate) state: &'a mut SlotState,
}

impl<'a, P: Platform> SlotHost<'a, P> {
    pub(crate) fn new(
        platform: &'a P,
        dma: &'a DmaEngine,
        config: &'a Config,
        slot: Slot,
        state: &'a mut SlotState,
    ) -> Self {
        Self {
            platform,
            dma,
            config,
            slot,
            state,
        }
    }

    pub(crate) fn channel(&self) -> MscChannel {
        self.slot.channel()
    }

    // ========================================================================
    // Register Access
    // ========================================================================

    pub(crate) fn read_reg(&self, reg: MscReg) -> u32 {
        self.platform.msc_read(self.channel(), reg)
    }

    pub(crate) fn write_reg(&self, reg: MscReg, value: u32) {
        self.platform.msc_write(self.channel(), reg, value);
    }

    pub(crate) fn status(&self) -> LocalRegisterCopy<u32, STAT::Register> {
        LocalRegisterCopy::new(self.read_reg(MscReg::Stat))
    }

    // ========================================================================
    // Clock Control
    // ========================================================================

    /// Stop the bus clock and wait for it to settle
    pub(crate) fn stop_clock(&self) -> Result<(), SdError> {
        self.write_reg(MscReg::Strpcl, STRPCL::CLOCK_CONTROL::Stop.value);

        let stopped = poll_until(self.platform, PollBudget::Polls(CLOCK_STOP_POLLS), || {
            !self.status().is_set(STAT::CLK_EN)
        });
        if !stopped {
            log::warn!("MSC{}: clock did not stop", self.channel().0);
            return Err(SdError::Timeout);
        }
        Ok(())
    }

    /// Start the bus clock and issue the programmed command
    pub(crate) fn start_clock(&self) {
        self.write_reg(
            MscReg::Strpcl,
            (STRPCL::CLOCK_CONTROL::Start + STRPCL::START_OP::SET).value,
        );
    }

    /// Set the bus clock rate
    ///
    /// The source clock the divider works from depends on the card's
    /// protocol version.
    pub(crate) fn set_clock(&self, rate_hz: u32) -> Result<(), SdError> {
        self.stop_clock()?;
        self.platform.set_clock_source(rate_hz);

        let source = if self.state.flags.high_capacity {
            CLOCK_HIGH
        } else {
            CLOCK_FAST
        };
        let clkrt = clock_divider(source, rate_hz);
        self.write_reg(MscReg::Clkrt, CLKRT::CLK_RATE.val(clkrt).value);

        log::debug!(
            "MSC{}: clock {} Hz (source {} Hz, CLKRT={})",
            self.channel().0,
            rate_hz,
            source,
            clkrt
        );
        Ok(())
    }

    // ========================================================================
    // Reset and Interrupts
    // ========================================================================

    /// Reset the controller channel
    pub(crate) fn reset_controller(&self) -> Result<(), SdError> {
        self.write_reg(MscReg::Strpcl, STRPCL::RESET::SET.value);

        let done = poll_until(self.platform, PollBudget::Polls(RESET_POLLS), || {
            !self.status().is_set(STAT::IS_RESETTING)
        });
        if !done {
            log::error!("MSC{}: controller reset timed out", self.channel().0);
            return Err(SdError::DriverFailure);
        }
        Ok(())
    }

    /// Mask every interrupt source and acknowledge pending flags
    pub(crate) fn mask_interrupts(&self) {
        self.write_reg(MscReg::Imask, IMASK_ALL);
        self.write_reg(MscReg::Ireg, IREG_CLEAR_ALL);
    }

    /// Bring the channel to a known idle state
    pub(crate) fn hardware_init(&self) -> Result<(), SdError> {
        self.reset_controller()?;
        self.write_reg(MscReg::Resto, RESPONSE_TIMEOUT);
        self.write_reg(MscReg::Rdto, READ_TIMEOUT);
        self.mask_interrupts();
        self.stop_clock()?;

        #[cfg(feature = "hotswap")]
        {
            use super::platform::CardChange;
            let next = if self.platform.card_detect(self.slot) {
                CardChange::Removal
            } else {
                CardChange::Insertion
            };
            self.platform.arm_card_detect(self.slot, next);
        }

        Ok(())
    }
}

/// Keeps a slot's controller clock and the activity LED on while held
pub(crate) struct ActivityGuard<'a, P: Platform> {
    platform: &'a P,
    channel: MscChannel,
}

impl<'a, P: Platform> ActivityGuard<'a, P> {
    pub(crate) fn engage(platform: &'a P, slot: Slot) -> Self {
        let channel = slot.channel();
        platform.set_controller_clock(channel, true);
        platform.set_activity_led(true);
        Self { platform, channel }
    }
}

impl<P: Platform> Drop for ActivityGuard<'_, P> {
    fn drop(&mut self) {
        self.platform.set_activity_led(false);
        self.platform.set_controller_clock(self.channel, false);
    }
}
